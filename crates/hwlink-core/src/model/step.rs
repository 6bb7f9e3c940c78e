// ── Consumer-side connect progress ──
//
// What a UI shows while waiting for the user to plug in, unlock and open
// the signing app. Derived purely from the notification stream.

use serde::{Deserialize, Serialize};
use strum::Display;

use super::{DeviceStatus, EventKind, NotificationEvent};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ConnectStep {
    #[default]
    Disconnected,
    ConnectedAppClosed,
    ConnectedAppOpen,
    ActionComplete,
}

impl ConnectStep {
    /// Fold one notification into the current step.
    pub fn apply(self, event: &NotificationEvent) -> Self {
        if event.kind == EventKind::Disconnected {
            return Self::Disconnected;
        }
        if self == Self::ActionComplete || event.kind != EventKind::DeviceStatus {
            return self;
        }
        match event.status() {
            Some(DeviceStatus::AppDoesNotSeemToBeOpen) => Self::ConnectedAppClosed,
            Some(DeviceStatus::NoErrors) => Self::ConnectedAppOpen,
            _ => self,
        }
    }

    /// Mark the pending address/sign action as done.
    pub fn complete(self) -> Self {
        Self::ActionComplete
    }

    /// Whether a gateway request is expected to succeed from here.
    pub fn ready(self) -> bool {
        self == Self::ConnectedAppOpen
    }
}
