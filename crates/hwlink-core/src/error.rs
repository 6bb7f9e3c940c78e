// ── Core error types ──
//
// Errors surfaced by the device manager. Gateway operations always return
// one of these to the caller; transport-open and keepalive failures are
// logged and recovered inside the manager instead.

use thiserror::Error;

use crate::model::DeviceStatus;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Session errors ───────────────────────────────────────────────
    #[error("No device transport")]
    NoTransport,

    #[error("Device is busy with another request")]
    Busy,

    #[error("Failed to open device transport: {reason}")]
    TransportOpenFailed { reason: String },

    // ── Device errors ────────────────────────────────────────────────
    #[error("Device responded with {status}")]
    Device { status: DeviceStatus },

    #[error("Malformed input: {message}")]
    MalformedInput { message: String },

    // ── Transport errors (mid-operation) ─────────────────────────────
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CoreError {
    /// The raw device return code, for `Device` errors.
    pub fn return_code(&self) -> Option<u16> {
        match self {
            Self::Device { status } => Some(status.code()),
            _ => None,
        }
    }

    /// Whether the caller may simply retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy | Self::NoTransport)
    }
}

/// Errors raised by a [`Transport`](crate::transport::Transport) or
/// [`TransportDriver`](crate::transport::TransportDriver).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Device disconnected")]
    Disconnected,

    #[error("Transport I/O error: {message}")]
    Io { message: String },

    #[error("Cannot open device: {message}")]
    Open { message: String },

    #[error("Unexpected device response: {message}")]
    Protocol { message: String },
}

impl TransportError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_exposes_return_code() {
        let err = CoreError::Device {
            status: DeviceStatus::from_code(0x6e00),
        };
        assert_eq!(err.return_code(), Some(0x6e00));
        assert_eq!(
            err.to_string(),
            "Device responded with AppDoesNotSeemToBeOpen (0x6e00)"
        );
    }

    #[test]
    fn transport_errors_pass_through_display() {
        let err = CoreError::from(TransportError::Disconnected);
        assert_eq!(err.to_string(), "Device disconnected");
        assert!(err.return_code().is_none());
    }

    #[test]
    fn busy_and_no_transport_are_retryable() {
        assert!(CoreError::Busy.is_retryable());
        assert!(CoreError::NoTransport.is_retryable());
        assert!(
            !CoreError::MalformedInput {
                message: "bad hex".into()
            }
            .is_retryable()
        );
    }
}
