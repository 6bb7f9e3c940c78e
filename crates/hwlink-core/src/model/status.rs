// ── Device return codes ──
//
// Status words returned by the signing app. Codes outside the known
// table decode to `UnknownDeviceStatus` instead of an unnamed value.

use std::fmt;

use strum::IntoStaticStr;

/// Decoded device return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum DeviceStatus {
    NoErrors,
    DeviceIsBusy,
    ExecutionError,
    WrongLength,
    ErrorDerivingKeys,
    EmptyBuffer,
    OutputBufferTooSmall,
    DataIsInvalid,
    ConditionsNotSatisfied,
    TransactionRejected,
    BadKeyHandle,
    InvalidP1P2,
    InstructionNotSupported,
    AppDoesNotSeemToBeOpen,
    UnknownError,
    SignVerifyError,
    #[strum(serialize = "UnknownDeviceStatus")]
    Unknown(u16),
}

impl DeviceStatus {
    pub const fn from_code(code: u16) -> Self {
        match code {
            0x9000 => Self::NoErrors,
            0x9001 => Self::DeviceIsBusy,
            0x6400 => Self::ExecutionError,
            0x6700 => Self::WrongLength,
            0x6802 => Self::ErrorDerivingKeys,
            0x6982 => Self::EmptyBuffer,
            0x6983 => Self::OutputBufferTooSmall,
            0x6984 => Self::DataIsInvalid,
            0x6985 => Self::ConditionsNotSatisfied,
            0x6986 => Self::TransactionRejected,
            0x6a80 => Self::BadKeyHandle,
            0x6b00 => Self::InvalidP1P2,
            0x6d00 => Self::InstructionNotSupported,
            0x6e00 => Self::AppDoesNotSeemToBeOpen,
            0x6f00 => Self::UnknownError,
            0x6f01 => Self::SignVerifyError,
            other => Self::Unknown(other),
        }
    }

    pub const fn code(self) -> u16 {
        match self {
            Self::NoErrors => 0x9000,
            Self::DeviceIsBusy => 0x9001,
            Self::ExecutionError => 0x6400,
            Self::WrongLength => 0x6700,
            Self::ErrorDerivingKeys => 0x6802,
            Self::EmptyBuffer => 0x6982,
            Self::OutputBufferTooSmall => 0x6983,
            Self::DataIsInvalid => 0x6984,
            Self::ConditionsNotSatisfied => 0x6985,
            Self::TransactionRejected => 0x6986,
            Self::BadKeyHandle => 0x6a80,
            Self::InvalidP1P2 => 0x6b00,
            Self::InstructionNotSupported => 0x6d00,
            Self::AppDoesNotSeemToBeOpen => 0x6e00,
            Self::UnknownError => 0x6f00,
            Self::SignVerifyError => 0x6f01,
            Self::Unknown(code) => code,
        }
    }

    /// Stable name, e.g. `"AppDoesNotSeemToBeOpen"`.
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn is_success(self) -> bool {
        self == Self::NoErrors
    }

    /// Statuses meaning the device could not parse the supplied payload.
    pub fn is_malformed_input(self) -> bool {
        matches!(
            self,
            Self::DataIsInvalid | Self::WrongLength | Self::EmptyBuffer
        )
    }
}

impl From<u16> for DeviceStatus {
    fn from(code: u16) -> Self {
        Self::from_code(code)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#06x})", self.name(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_survive_decoding() {
        for code in [0x9000, 0x6984, 0x6e00, 0x6f01] {
            assert_eq!(DeviceStatus::from_code(code).code(), code);
        }
        assert!(DeviceStatus::from_code(0x9000).is_success());
    }

    #[test]
    fn unmapped_code_gets_named_fallback() {
        let status = DeviceStatus::from_code(0x5515);
        assert_eq!(status, DeviceStatus::Unknown(0x5515));
        assert_eq!(status.name(), "UnknownDeviceStatus");
        assert_eq!(status.code(), 0x5515);
        assert_eq!(status.to_string(), "UnknownDeviceStatus (0x5515)");
    }

    #[test]
    fn payload_rejections_are_malformed_input() {
        assert!(DeviceStatus::DataIsInvalid.is_malformed_input());
        assert!(DeviceStatus::EmptyBuffer.is_malformed_input());
        assert!(!DeviceStatus::TransactionRejected.is_malformed_input());
    }
}
