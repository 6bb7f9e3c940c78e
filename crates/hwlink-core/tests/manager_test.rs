#![allow(clippy::unwrap_used, clippy::expect_used)]

// End-to-end lifecycle tests against the simulated device. All tests run
// on a paused clock so debounce windows and keepalive periods elapse
// instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use hwlink_core::sim::{SimApp, SimDevice};
use hwlink_core::{
    ConnectStep, ConnectionState, CoreError, DeviceManager, DeviceStatus, EventKind,
    EventSubscription, ManagerConfig, PollOutcome, SkipReason, TransportError,
};
use pretty_assertions::assert_eq;
use tokio_test::assert_ok;

// ── Helpers ─────────────────────────────────────────────────────────

fn quiet_config() -> ManagerConfig {
    ManagerConfig {
        poll_interval: Duration::ZERO,
        ..ManagerConfig::default()
    }
}

fn setup(config: ManagerConfig) -> (Arc<SimDevice>, DeviceManager, EventSubscription) {
    let device = SimDevice::new(7);
    let manager = DeviceManager::new(config, device.driver(), SimApp::shared());
    let events = manager.subscribe();
    (device, manager, events)
}

async fn reach(manager: &DeviceManager, state: ConnectionState) {
    let mut rx = manager.watch_state();
    tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .expect("manager dropped");
}

async fn connected(config: ManagerConfig) -> (Arc<SimDevice>, DeviceManager, EventSubscription) {
    let (device, manager, mut events) = setup(config);
    manager.enable().await.expect("enable");
    device.plug();
    reach(&manager, ConnectionState::Connected).await;
    events.drain();
    (device, manager, events)
}

fn kinds(events: &mut EventSubscription) -> Vec<EventKind> {
    events.drain().into_iter().map(|e| e.kind).collect()
}

// ── Connection lifecycle ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn plugging_in_opens_a_transport() {
    let (device, manager, mut events) = setup(quiet_config());
    assert_eq!(manager.connection_state(), ConnectionState::NotListening);

    manager.enable().await.expect("enable");
    assert_eq!(manager.connection_state(), ConnectionState::Listening);
    assert!(!manager.has_session());

    device.plug();
    reach(&manager, ConnectionState::Connected).await;

    assert_eq!(
        kinds(&mut events),
        vec![EventKind::WaitingTransport, EventKind::HasTransport]
    );
    assert!(manager.has_session());
    assert_eq!(device.open_count(), 1);
    // Hotplug is only watched while no transport is open.
    assert_eq!(device.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn device_already_attached_is_picked_up_on_enable() {
    let (device, manager, mut events) = setup(quiet_config());
    device.plug();

    manager.enable().await.expect("enable");
    reach(&manager, ConnectionState::Connected).await;

    assert_eq!(
        kinds(&mut events),
        vec![EventKind::WaitingTransport, EventKind::HasTransport]
    );
}

#[tokio::test(start_paused = true)]
async fn enable_is_idempotent() {
    let (device, manager, _events) = setup(quiet_config());
    manager.enable().await.expect("first enable");
    manager.enable().await.expect("second enable");

    assert!(manager.is_enabled().await);
    assert_eq!(device.listener_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unplug_reports_disconnected_after_debounce() {
    let (device, manager, mut events) = connected(quiet_config()).await;

    device.unplug();
    reach(&manager, ConnectionState::Disconnected).await;
    assert!(!manager.has_session());
    assert!(kinds(&mut events).is_empty());

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(kinds(&mut events).is_empty());

    reach(&manager, ConnectionState::Listening).await;
    assert_eq!(kinds(&mut events), vec![EventKind::Disconnected]);
}

#[tokio::test(start_paused = true)]
async fn replug_within_debounce_suppresses_disconnected() {
    let (device, manager, mut events) = connected(quiet_config()).await;
    device.set_open_delay(Duration::from_millis(100));

    let mut rx = manager.watch_state();
    let mut seen = vec![*rx.borrow_and_update()];
    let states = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = *rx.borrow_and_update();
            seen.push(state);
            if state == ConnectionState::Connected {
                break;
            }
        }
        seen
    });

    device.unplug();
    reach(&manager, ConnectionState::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    device.plug();
    reach(&manager, ConnectionState::AwaitingTransport).await;
    reach(&manager, ConnectionState::Connected).await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(
        states.await.expect("join"),
        vec![
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::AwaitingTransport,
            ConnectionState::Connected,
        ]
    );
    assert_eq!(
        kinds(&mut events),
        vec![EventKind::WaitingTransport, EventKind::HasTransport]
    );
    assert_eq!(manager.connection_state(), ConnectionState::Connected);
    assert_eq!(device.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn replug_after_disconnect_reconnects() {
    let (device, manager, mut events) = connected(quiet_config()).await;

    device.unplug();
    reach(&manager, ConnectionState::Disconnected).await;
    reach(&manager, ConnectionState::Listening).await;
    assert_eq!(device.listener_count(), 1);

    device.plug();
    reach(&manager, ConnectionState::Connected).await;

    assert_eq!(
        kinds(&mut events),
        vec![
            EventKind::Disconnected,
            EventKind::WaitingTransport,
            EventKind::HasTransport,
        ]
    );
    assert_eq!(device.open_count(), 2);
    assert_ok!(manager.request_address().await);
}

#[tokio::test(start_paused = true)]
async fn failed_open_waits_for_a_replug() {
    let (device, manager, mut events) = setup(quiet_config());
    device.fail_next_opens(u32::MAX);
    manager.enable().await.expect("enable");

    device.plug();
    tokio::time::sleep(Duration::from_secs(5)).await;

    // The fresh subscription replays the attached device; it is not retried.
    assert_eq!(manager.connection_state(), ConnectionState::Listening);
    assert_eq!(kinds(&mut events), vec![EventKind::WaitingTransport]);
    assert_eq!(device.open_count(), 0);
    assert_eq!(device.listener_count(), 1);

    device.fail_next_opens(0);
    device.unplug();
    device.plug();
    reach(&manager, ConnectionState::Connected).await;

    assert_eq!(
        kinds(&mut events),
        vec![EventKind::WaitingTransport, EventKind::HasTransport]
    );
    assert_eq!(device.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn device_pulled_during_open_is_picked_up_when_it_returns() {
    let (device, manager, mut events) = setup(quiet_config());
    device.set_open_delay(Duration::from_millis(100));
    manager.enable().await.expect("enable");

    device.plug();
    reach(&manager, ConnectionState::AwaitingTransport).await;
    // No subscription while opening, so the removal goes unseen.
    device.unplug();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(manager.connection_state(), ConnectionState::Listening);

    device.plug();
    reach(&manager, ConnectionState::Connected).await;

    assert_eq!(
        kinds(&mut events),
        vec![
            EventKind::WaitingTransport,
            EventKind::WaitingTransport,
            EventKind::HasTransport,
        ]
    );
    assert_eq!(device.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn disable_tears_everything_down() {
    let (device, manager, mut events) = connected(quiet_config()).await;

    manager.disable().await;

    assert_eq!(manager.connection_state(), ConnectionState::NotListening);
    assert!(!manager.is_enabled().await);
    assert!(!manager.has_session());
    assert_eq!(device.listener_count(), 0);
    assert!(matches!(
        manager.request_address().await,
        Err(CoreError::NoTransport)
    ));

    // Nothing fires later either.
    device.unplug();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(kinds(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn disable_during_debounce_cancels_the_pending_disconnect() {
    let (device, manager, mut events) = connected(quiet_config()).await;

    device.unplug();
    reach(&manager, ConnectionState::Disconnected).await;
    manager.disable().await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(kinds(&mut events).is_empty());
    assert_eq!(manager.connection_state(), ConnectionState::NotListening);
}

#[tokio::test(start_paused = true)]
async fn manager_can_be_enabled_again_after_disable() {
    let (device, manager, mut events) = connected(quiet_config()).await;
    manager.disable().await;

    manager.enable().await.expect("re-enable");
    reach(&manager, ConnectionState::Connected).await;

    assert_eq!(
        kinds(&mut events),
        vec![EventKind::WaitingTransport, EventKind::HasTransport]
    );
    assert_eq!(device.open_count(), 2);
}

// ── Keepalive ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn poll_reports_app_state() {
    let (device, manager, mut events) = connected(quiet_config()).await;
    let mut step = ConnectStep::default();

    device.set_app_open(false);
    assert_eq!(
        manager.poll_now().await,
        PollOutcome::Reported(DeviceStatus::AppDoesNotSeemToBeOpen)
    );
    for event in events.drain() {
        step = step.apply(&event);
    }
    assert_eq!(step, ConnectStep::ConnectedAppClosed);

    device.set_app_open(true);
    assert_eq!(
        manager.poll_now().await,
        PollOutcome::Reported(DeviceStatus::NoErrors)
    );
    for event in events.drain() {
        step = step.apply(&event);
    }
    assert!(step.ready());
}

#[tokio::test(start_paused = true)]
async fn unknown_return_codes_keep_their_value() {
    let (device, manager, mut events) = connected(quiet_config()).await;
    device.set_version_status(Some(0x6a99));

    manager.poll_now().await;

    let event = events.try_recv().expect("device-status event");
    assert_eq!(event.kind, EventKind::DeviceStatus);
    assert_eq!(event.return_code, Some(0x6a99));
    assert_eq!(event.status().map(DeviceStatus::name), Some("UnknownDeviceStatus"));
}

#[tokio::test(start_paused = true)]
async fn poll_skips_without_a_session() {
    let (_device, manager, mut events) = setup(quiet_config());
    manager.enable().await.expect("enable");

    assert_eq!(
        manager.poll_now().await,
        PollOutcome::Skipped(SkipReason::NoSession)
    );
    assert!(events.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn keepalive_ticks_on_its_own() {
    let config = ManagerConfig {
        poll_interval: Duration::from_secs(2),
        ..ManagerConfig::default()
    };
    let (_device, _manager, mut events) = connected(config).await;

    tokio::time::sleep(Duration::from_millis(4100)).await;

    let statuses: Vec<_> = events.drain().iter().filter_map(|e| e.status()).collect();
    assert_eq!(statuses, vec![DeviceStatus::NoErrors, DeviceStatus::NoErrors]);
}

#[tokio::test(start_paused = true)]
async fn poll_surfaces_a_lazy_disconnect() {
    let (device, manager, mut events) = connected(quiet_config()).await;
    device.set_lazy_disconnect(true);

    device.unplug();
    tokio::time::sleep(Duration::from_secs(3)).await;
    // The driver has not noticed yet.
    assert_eq!(manager.connection_state(), ConnectionState::Connected);

    assert_eq!(
        manager.poll_now().await,
        PollOutcome::Failed(TransportError::Disconnected)
    );
    reach(&manager, ConnectionState::Disconnected).await;
    assert_eq!(
        manager.poll_now().await,
        PollOutcome::Skipped(SkipReason::NoSession)
    );

    reach(&manager, ConnectionState::Listening).await;
    assert_eq!(kinds(&mut events), vec![EventKind::Disconnected]);
}

#[tokio::test(start_paused = true)]
async fn background_keepalive_notices_a_lazy_disconnect() {
    let config = ManagerConfig {
        poll_interval: Duration::from_secs(2),
        ..ManagerConfig::default()
    };
    let (device, manager, mut events) = connected(config).await;
    device.set_lazy_disconnect(true);

    device.unplug();
    reach(&manager, ConnectionState::Disconnected).await;
    reach(&manager, ConnectionState::Listening).await;

    assert_eq!(kinds(&mut events), vec![EventKind::Disconnected]);
}

// ── Request gateway ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn requests_need_a_transport() {
    let (_device, manager, _events) = setup(quiet_config());
    manager.enable().await.expect("enable");

    let err = manager.request_address().await.expect_err("no device");
    assert!(matches!(err, CoreError::NoTransport));
    assert!(err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn address_request_round_trip() {
    let (_device, manager, _events) = connected(quiet_config()).await;

    let info = assert_ok!(manager.request_address().await);

    assert!(info.address.starts_with("SP"));
    assert_eq!(info.public_key.len(), 66);
    assert_eq!(info.chain_code.len(), 64);
    assert!(!manager.is_busy());

    // Deterministic for a given device and path.
    let again = assert_ok!(manager.request_address().await);
    assert_eq!(info, again);
}

#[tokio::test(start_paused = true)]
async fn sign_request_round_trip() {
    let (_device, manager, _events) = connected(quiet_config()).await;

    let sig = assert_ok!(manager.request_sign("000000000104").await);

    assert_eq!(sig.post_sign_hash.len(), 64);
    assert_eq!(sig.signature_compact.len(), 130);
    assert_eq!(sig.signature_vrs.len(), 130);
    assert!(sig.signature_der.starts_with("30"));
}

#[tokio::test(start_paused = true)]
async fn malformed_transactions_are_rejected() {
    let (_device, manager, _events) = connected(quiet_config()).await;

    assert!(matches!(
        manager.request_sign("not hex").await,
        Err(CoreError::MalformedInput { .. })
    ));
    // Unknown transaction version byte.
    assert!(matches!(
        manager.request_sign("ff01").await,
        Err(CoreError::MalformedInput { .. })
    ));
    assert!(!manager.is_busy());
}

#[tokio::test(start_paused = true)]
async fn closed_app_fails_requests_with_its_code() {
    let (device, manager, _events) = connected(quiet_config()).await;
    device.set_app_open(false);

    let err = manager.request_address().await.expect_err("app closed");
    assert_eq!(err.return_code(), Some(0x6e00));
    assert!(!manager.is_busy());
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_fail_fast_with_busy() {
    let (device, manager, _events) = connected(quiet_config()).await;
    device.set_latency(Duration::from_secs(1));

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.request_address().await })
    };
    while !manager.is_busy() {
        tokio::task::yield_now().await;
    }

    assert!(matches!(
        manager.request_address().await,
        Err(CoreError::Busy)
    ));
    assert_eq!(
        manager.poll_now().await,
        PollOutcome::Skipped(SkipReason::Busy)
    );

    let info = first.await.expect("join");
    assert!(info.is_ok());
    assert!(!manager.is_busy());
    assert_eq!(device.max_concurrent_exchanges(), 1);
}

#[tokio::test(start_paused = true)]
async fn keepalive_stays_off_the_device_during_a_sign() {
    let config = ManagerConfig {
        poll_interval: Duration::from_millis(500),
        ..ManagerConfig::default()
    };
    let (device, manager, mut events) = connected(config).await;
    device.set_latency(Duration::from_millis(1750));
    let before = device.exchange_count();

    let signature = manager.request_sign("0000000001").await;

    assert_ok!(signature);
    assert_eq!(device.exchange_count(), before + 1);
    assert_eq!(device.max_concurrent_exchanges(), 1);
    assert!(events.drain().iter().all(|e| e.status().is_none()));
}

#[tokio::test(start_paused = true)]
async fn request_fails_when_device_vanishes_mid_call() {
    let (device, manager, _events) = connected(quiet_config()).await;
    device.set_latency(Duration::from_secs(1));

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.request_address().await })
    };
    while !manager.is_busy() {
        tokio::task::yield_now().await;
    }
    device.unplug();

    let result = pending.await.expect("join");
    assert!(matches!(
        result,
        Err(CoreError::Transport(TransportError::Disconnected))
    ));
    assert!(!manager.is_busy());
    reach(&manager, ConnectionState::Listening).await;
}

// ── Wire shape ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn notification_wire_shape() {
    let (device, manager, mut events) = setup(quiet_config());
    manager.enable().await.expect("enable");
    device.plug();
    reach(&manager, ConnectionState::Connected).await;
    device.set_app_open(false);
    manager.poll_now().await;

    let wire: Vec<String> = events
        .drain()
        .iter()
        .map(|e| serde_json::to_string(e).expect("serialize"))
        .collect();
    insta::assert_snapshot!(wire.join("\n"), @r#"
    {"kind":"waiting-transport"}
    {"kind":"has-transport"}
    {"kind":"device-status","returnCode":28160}
    "#);
}
