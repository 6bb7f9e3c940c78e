// ── Notification events ──

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::DeviceStatus;

/// What a [`NotificationEvent`] reports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum EventKind {
    /// A device was attached and its transport is being opened.
    WaitingTransport,
    /// A transport is open and requests may be issued.
    HasTransport,
    /// The device is gone and did not come back within the debounce window.
    Disconnected,
    /// Result of a keepalive probe; carries the device return code.
    DeviceStatus,
}

/// Immutable record delivered to every subscriber, in emission order.
///
/// Wire shape: `{ "kind": "device-status", "returnCode": 36864 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code: Option<u16>,
}

impl NotificationEvent {
    pub const fn new(kind: EventKind) -> Self {
        Self {
            kind,
            return_code: None,
        }
    }

    pub const fn device_status(status: DeviceStatus) -> Self {
        Self {
            kind: EventKind::DeviceStatus,
            return_code: Some(status.code()),
        }
    }

    /// Decoded status for `device-status` events.
    pub fn status(&self) -> Option<DeviceStatus> {
        self.return_code.map(DeviceStatus::from_code)
    }
}

impl From<EventKind> for NotificationEvent {
    fn from(kind: EventKind) -> Self {
        Self::new(kind)
    }
}
