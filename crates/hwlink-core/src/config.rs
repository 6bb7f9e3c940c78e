// ── Runtime manager configuration ──
//
// Describes *how* the device manager behaves: keepalive cadence,
// disconnect debounce, and the key path requested from the device.
// Never touches disk -- `hwlink-config` builds one and hands it in.

use std::time::Duration;

use crate::model::DerivationPath;

/// Default keepalive interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default window during which a disconnect may still be superseded by a replug.
pub const DEFAULT_DISCONNECT_DEBOUNCE: Duration = Duration::from_secs(1);

/// Configuration for a single [`DeviceManager`](crate::DeviceManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// How often the keepalive poller probes the device. Zero disables polling.
    pub poll_interval: Duration,
    /// How long a transport-level disconnect waits before it is reported.
    pub disconnect_debounce: Duration,
    /// Key path used for both address retrieval and signing.
    pub derivation_path: DerivationPath,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            disconnect_debounce: DEFAULT_DISCONNECT_DEBOUNCE,
            derivation_path: DerivationPath::stacks_default(),
        }
    }
}

impl ManagerConfig {
    /// Whether the keepalive poller should run at all.
    pub fn polling_enabled(&self) -> bool {
        !self.poll_interval.is_zero()
    }
}
