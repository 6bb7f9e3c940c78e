//! Config subcommand handlers.

use std::path::Path;

use hwlink_config::{Config, ConfigError};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

pub fn handle(
    args: ConfigArgs,
    path: &Path,
    loaded: Result<Config, ConfigError>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let cfg = loaded?;
            let out = match global.output {
                OutputFormat::Text => {
                    let body = toml::to_string_pretty(&cfg).map_err(ConfigError::from)?;
                    format!("# {}\n{body}", path.display())
                }
                format => output::render_single(format, &cfg, |_| String::new())?,
            };
            output::print_output(out.trim_end());
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&path.display().to_string());
            Ok(())
        }

        ConfigCommand::Init { force } => {
            hwlink_config::init_config(path, force)?;
            eprintln!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}
