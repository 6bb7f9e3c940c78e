// ── Keepalive poller ──
//
// Some HID drivers only notice an unplugged device on the next I/O
// attempt. A cheap version request every few seconds makes them fire the
// disconnect notification promptly. A failed probe is only logged; the
// state machine reacts to the driver's notification, not to the poll.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::error::TransportError;
use crate::manager::DeviceManager;
use crate::model::{DeviceStatus, NotificationEvent};

/// Why a keepalive tick did not touch the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoSession,
    Reconnecting,
    Busy,
}

/// Result of one keepalive tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Skipped(SkipReason),
    /// The device answered; a `device-status` event was emitted.
    Reported(DeviceStatus),
    Failed(TransportError),
}

impl DeviceManager {
    /// Run one keepalive tick now.
    pub async fn poll_now(&self) -> PollOutcome {
        let inner = &self.inner;

        let Some(session) = inner.session.load_full() else {
            return PollOutcome::Skipped(SkipReason::NoSession);
        };
        if inner.reconnecting.load(Ordering::Acquire) {
            return PollOutcome::Skipped(SkipReason::Reconnecting);
        }
        if inner.busy.is_set() {
            trace!("keepalive skipped: request in flight");
            return PollOutcome::Skipped(SkipReason::Busy);
        }
        let Ok(_io) = inner.io.try_lock() else {
            return PollOutcome::Skipped(SkipReason::Busy);
        };

        match inner.app.get_version(session.transport()).await {
            Ok(version) => {
                let current = (*inner.session.load())
                    .as_ref()
                    .is_some_and(|s| s.generation == session.generation);
                if current {
                    self.emit(NotificationEvent::device_status(version.status));
                }
                trace!(status = %version.status, "keepalive");
                PollOutcome::Reported(version.status)
            }
            Err(e) => {
                warn!(error = %e, "keepalive probe failed");
                PollOutcome::Failed(e)
            }
        }
    }
}

/// Probe the device every `period` until cancelled.
pub(crate) async fn keepalive_task(
    manager: DeviceManager,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = manager.poll_now() => {}
                }
            }
        }
    }
}
