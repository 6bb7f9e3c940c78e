mod cli;
mod commands;
mod error;
mod output;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use hwlink_config::{Config, ConfigError, LogFormat};

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_path = cli
        .global
        .config
        .clone()
        .unwrap_or_else(hwlink_config::config_path);
    let config = hwlink_config::load_config_from(&config_path);

    // Logs go to stderr; stdout is reserved for command output.
    let log_format = config.as_ref().map_or(LogFormat::Text, |c| c.log_format);
    init_tracing(cli.global.verbose, log_format);

    if let Err(err) = run(cli, config_path, config).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, format: LogFormat) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn run(
    cli: Cli,
    config_path: PathBuf,
    config: Result<Config, ConfigError>,
) -> Result<(), CliError> {
    match cli.command {
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "hwlink", &mut std::io::stdout());
            Ok(())
        }

        // Config commands must work even when the file fails to load.
        Command::Config(args) => {
            commands::config_cmd::handle(args, &config_path, config, &cli.global)
        }

        cmd => {
            let config = config?;
            tracing::debug!(command = ?cmd, path = %config_path.display(), "dispatching command");
            commands::dispatch(cmd, &config, &cli.global).await
        }
    }
}
