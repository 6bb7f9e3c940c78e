//! Clap derive structures for the `hwlink` CLI.
//!
//! Also compiled by `build.rs`, so it must only depend on clap and
//! clap_complete.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// hwlink -- keep a USB signing device connected and talk to it
#[derive(Debug, Parser)]
#[command(
    name = "hwlink",
    version,
    about = "Manage the connection to a USB hardware signing device",
    long_about = "Tracks plug/unplug of a hardware signing device, keeps its transport alive,\n\
        and bridges address and signing requests to it.\n\n\
        `hwlink serve` speaks JSON lines on stdin/stdout for use from another process.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "HWLINK_CONFIG", global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output format for one-shot commands
    #[arg(long, short = 'o', default_value = "text", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Bridge requests and notifications over stdin/stdout as JSON lines
    Serve(ServeArgs),

    /// Print notifications as they happen
    Watch(WatchArgs),

    /// Fetch the address at the configured derivation path
    Address(RequestArgs),

    /// Sign a hex-encoded unsigned transaction
    Sign(SignArgs),

    /// Manage the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct DeviceArgs {
    /// Use a simulated device instead of USB hardware
    #[arg(long)]
    pub simulate: bool,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Exit after this many notifications
    #[arg(long, short = 'n', value_name = "N")]
    pub count: Option<usize>,
}

#[derive(Debug, Args)]
pub struct RequestArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Seconds to wait for the device transport
    #[arg(long, default_value = "10", value_name = "SECS")]
    pub wait: u64,
}

#[derive(Debug, Args)]
pub struct SignArgs {
    /// Unsigned transaction, hex-encoded
    #[arg(value_name = "HEX")]
    pub tx: String,

    #[command(flatten)]
    pub request: RequestArgs,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the resolved configuration
    Show,

    /// Print the config file path
    Path,

    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
