//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` variants into user-facing errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use hwlink_config::ConfigError;
use hwlink_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const DEVICE: i32 = 3;
    pub const NOT_CONNECTED: i32 = 4;
    pub const BUSY: i32 = 5;
    pub const CONFIG: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Device connection ────────────────────────────────────────────
    #[error("No hardware driver backend is compiled into this build")]
    #[diagnostic(
        code(hwlink::no_backend),
        help("Run with --simulate to use the built-in simulated device.")
    )]
    NoBackend,

    #[error("No device transport within {seconds}s")]
    #[diagnostic(
        code(hwlink::timeout),
        help("Plug in and unlock the device, or raise --wait.")
    )]
    Timeout { seconds: u64 },

    #[error("No device transport")]
    #[diagnostic(
        code(hwlink::not_connected),
        help("Plug in and unlock the device, then retry.")
    )]
    NotConnected,

    #[error("Device is busy with another request")]
    #[diagnostic(
        code(hwlink::busy),
        help("Wait for the pending request to finish on the device.")
    )]
    Busy,

    #[error("Device transport failed: {message}")]
    #[diagnostic(code(hwlink::transport))]
    Transport { message: String },

    // ── Device responses ─────────────────────────────────────────────
    #[error("Device returned {status} ({code:#06x})")]
    #[diagnostic(code(hwlink::device), help("{hint}"))]
    Device {
        status: String,
        code: u16,
        hint: String,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(hwlink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(hwlink::config),
        help("Check the file shown by `hwlink config path` and any HWLINK_* variables.")
    )]
    Config(#[from] ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(hwlink::json))]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(hwlink::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoBackend | Self::Transport { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NotConnected => exit_code::NOT_CONNECTED,
            Self::Busy => exit_code::BUSY,
            Self::Device { .. } => exit_code::DEVICE,
            Self::Validation { .. } => exit_code::USAGE,
            Self::Config(_) => exit_code::CONFIG,
            Self::Io(_) | Self::Json(_) | Self::Internal(_) => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NoTransport => CliError::NotConnected,
            CoreError::Busy => CliError::Busy,

            CoreError::Device { status } => {
                let hint = match status {
                    hwlink_core::DeviceStatus::AppDoesNotSeemToBeOpen => {
                        "Open the signing app on the device."
                    }
                    hwlink_core::DeviceStatus::TransactionRejected => {
                        "The request was rejected on the device."
                    }
                    _ => "Check the device screen for details.",
                };
                CliError::Device {
                    status: status.name().into(),
                    code: status.code(),
                    hint: hint.into(),
                }
            }

            CoreError::MalformedInput { message } => CliError::Validation {
                field: "transaction".into(),
                reason: message,
            },

            CoreError::TransportOpenFailed { reason } => CliError::Transport { message: reason },
            CoreError::Transport(e) => CliError::Transport {
                message: e.to_string(),
            },
        }
    }
}
