// ── Device manager ──
//
// Full lifecycle management for one hardware signing device. A single
// owner task drives the connection state machine; the keepalive poller
// and the request gateway only ever read the current Session.

use std::collections::VecDeque;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwapOption;
use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ManagerConfig;
use crate::error::{CoreError, TransportError};
use crate::gateway::BusyToken;
use crate::model::NotificationEvent;
use crate::poller::keepalive_task;
use crate::state::{ConnectionState, Effect, Input, transition};
use crate::stream::{EventBus, EventSubscription, SubscriptionId};
use crate::transport::{
    DeviceApp, DeviceDescriptor, HotplugEvent, HotplugSubscription, Transport, TransportDriver,
};

type OpenFuture = BoxFuture<'static, Result<Box<dyn Transport>, TransportError>>;

// ── Session ──────────────────────────────────────────────────────

/// The one open transport, plus the generation it was opened in.
pub(crate) struct Session {
    pub(crate) generation: u64,
    transport: Box<dyn Transport>,
}

impl Session {
    pub(crate) fn new(generation: u64, transport: Box<dyn Transport>) -> Self {
        Self {
            generation,
            transport,
        }
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }
}

// ── DeviceManager ────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ManagerInner>`. Instances never share
/// state, so several managers (e.g. in tests) can coexist.
#[derive(Clone)]
pub struct DeviceManager {
    pub(crate) inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    pub(crate) config: ManagerConfig,
    driver: Arc<dyn TransportDriver>,
    pub(crate) app: Arc<dyn DeviceApp>,
    state: watch::Sender<ConnectionState>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) session: ArcSwapOption<Session>,
    /// Set by gateway operations for their whole duration.
    pub(crate) busy: BusyToken,
    /// Serializes device round trips between the poller and the gateway.
    pub(crate) io: Mutex<()>,
    /// Set between a transport disconnect and the next successful open.
    pub(crate) reconnecting: AtomicBool,
    running: Mutex<Option<Running>>,
}

struct Running {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl DeviceManager {
    /// Create a manager. Does NOT listen for devices -- call
    /// [`enable()`](Self::enable) to start.
    pub fn new(
        config: ManagerConfig,
        driver: Arc<dyn TransportDriver>,
        app: Arc<dyn DeviceApp>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::NotListening);

        Self {
            inner: Arc::new(ManagerInner {
                config,
                driver,
                app,
                state,
                bus: Arc::new(EventBus::default()),
                session: ArcSwapOption::empty(),
                busy: BusyToken::default(),
                io: Mutex::new(()),
                reconnecting: AtomicBool::new(false),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Subscribe to hotplug events and start the background tasks.
    ///
    /// Idempotent: enabling an enabled manager does nothing. Fails only if
    /// the driver refuses the hotplug subscription.
    pub async fn enable(&self) -> Result<(), CoreError> {
        let mut running = self.inner.running.lock().await;
        if running.is_some() {
            trace!("enable: already listening");
            return Ok(());
        }

        let mut machine = Machine::new(Arc::clone(&self.inner));
        if let Err(e) = machine.apply(Input::Enable) {
            self.inner.state.send_replace(ConnectionState::NotListening);
            return Err(e.into());
        }

        let cancel = CancellationToken::new();
        let mut handles = vec![tokio::spawn(machine.run(cancel.clone()))];

        if self.inner.config.polling_enabled() {
            handles.push(tokio::spawn(keepalive_task(
                self.clone(),
                self.inner.config.poll_interval,
                cancel.clone(),
            )));
        }

        *running = Some(Running { cancel, handles });
        info!("listening for devices");
        Ok(())
    }

    /// Stop listening, close the Session and cancel pending timers.
    ///
    /// In-flight gateway operations are left to finish on their own.
    pub async fn disable(&self) {
        let Some(running) = self.inner.running.lock().await.take() else {
            trace!("disable: not listening");
            return;
        };

        running.cancel.cancel();
        for handle in running.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }

        // The owner task normally tears down on its own; this covers a task
        // that died before it could.
        if let Some(session) = self.inner.session.swap(None) {
            session.transport.close().await;
        }
        self.inner.reconnecting.store(false, Ordering::Release);
        self.inner.state.send_replace(ConnectionState::NotListening);
        info!("stopped listening for devices");
    }

    pub async fn is_enabled(&self) -> bool {
        self.inner.running.lock().await.is_some()
    }

    // ── Observation ──────────────────────────────────────────────

    /// Snapshot of the current lifecycle state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to lifecycle state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Attach to the notification stream. No past events are replayed.
    pub fn subscribe(&self) -> EventSubscription {
        self.inner.bus.subscribe()
    }

    /// Detach a subscription by id. Dropping the subscription works too.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.bus.unsubscribe(id)
    }

    /// Whether a transport is currently open.
    pub fn has_session(&self) -> bool {
        self.inner.session.load().is_some()
    }

    /// Whether a gateway operation currently holds the device.
    pub fn is_busy(&self) -> bool {
        self.inner.busy.is_set()
    }

    pub(crate) fn emit(&self, event: NotificationEvent) {
        self.inner.bus.emit(event);
    }
}

// ── Owner task ───────────────────────────────────────────────────

/// State owned by the task that drives the connection state machine.
struct Machine {
    inner: Arc<ManagerInner>,
    state: ConnectionState,
    hotplug: Option<HotplugSubscription>,
    /// Events replayed by the current subscription, not yet handled.
    backlog: VecDeque<HotplugEvent>,
    /// Device from the add event currently being handled.
    added: Option<DeviceDescriptor>,
    /// Device whose transport is being opened.
    target: Option<DeviceDescriptor>,
    /// Device whose last open failed. Its add events are ignored until
    /// the driver reports it removed.
    unopenable: Option<DeviceDescriptor>,
    opening: Option<OpenFuture>,
    /// Transport that finished opening, waiting for `StoreSession`.
    opened: Option<Box<dyn Transport>>,
    disconnect: Option<CancellationToken>,
    debounce: Option<Pin<Box<Sleep>>>,
    generation: u64,
}

impl Machine {
    fn new(inner: Arc<ManagerInner>) -> Self {
        Self {
            inner,
            state: ConnectionState::NotListening,
            hotplug: None,
            backlog: VecDeque::new(),
            added: None,
            target: None,
            unopenable: None,
            opening: None,
            opened: None,
            disconnect: None,
            debounce: None,
            generation: 0,
        }
    }

    async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = wait_disconnect(self.disconnect.as_ref()) => {
                    info!(generation = self.generation, "device transport disconnected");
                    self.inner.reconnecting.store(true, Ordering::Release);
                    self.handle(Input::TransportDisconnected);
                }
                result = wait_open(&mut self.opening) => {
                    self.opening = None;
                    self.on_open_result(result);
                }
                () = wait_debounce(&mut self.debounce) => {
                    self.debounce = None;
                    self.handle(Input::DebounceElapsed);
                }
                event = next_hotplug(&mut self.backlog, &mut self.hotplug) => self.on_hotplug(event),
            }
        }

        if let Some(session) = self.inner.session.swap(None) {
            session.transport.close().await;
        }
        self.handle(Input::Disable);
        debug!("device owner task stopped");
    }

    fn on_hotplug(&mut self, event: Option<HotplugEvent>) {
        match event {
            Some(HotplugEvent::Added(device)) => {
                if self.unopenable.as_ref() == Some(&device) {
                    trace!(path = %device.path, "ignoring add for a device that failed to open");
                    return;
                }
                debug!(path = %device.path, "device added");
                self.added = Some(device);
                self.handle(Input::DeviceAdded);
                self.added = None;
            }
            Some(HotplugEvent::Removed(device)) => {
                debug!(path = %device.path, "device removed");
                if self.unopenable.as_ref() == Some(&device) {
                    self.unopenable = None;
                }
                self.handle(Input::DeviceRemoved);
            }
            None => {
                warn!("hotplug source closed the subscription");
                self.hotplug = None;
            }
        }
    }

    fn on_open_result(&mut self, result: Result<Box<dyn Transport>, TransportError>) {
        let device = self.target.take();
        match result {
            Ok(transport) => {
                self.opened = Some(transport);
                self.handle(Input::TransportOpened);
                if let Some(stale) = self.opened.take() {
                    debug!("closing transport opened after leaving awaiting-transport");
                    tokio::spawn(async move { stale.close().await });
                }
            }
            Err(e) => {
                let err = CoreError::TransportOpenFailed {
                    reason: e.to_string(),
                };
                warn!(error = %err, "returning to listening");
                // Set before resubscribing so the replayed add is skipped.
                self.unopenable = device;
                self.handle(Input::TransportOpenFailed);
            }
        }
    }

    /// Apply an input from the event loop, logging effect failures.
    fn handle(&mut self, input: Input) {
        if let Err(e) = self.apply(input) {
            warn!(error = %e, ?input, "state machine effect failed");
        }
    }

    fn apply(&mut self, input: Input) -> Result<(), TransportError> {
        let from = self.state;
        let t = transition(from, input);
        if t.is_noop(from) {
            trace!(state = %from, ?input, "input ignored");
            return Ok(());
        }

        debug!(from = %from, to = %t.next, ?input, "transition");
        self.state = t.next;

        let mut first_err = None;
        for effect in t.effects {
            if let Err(e) = self.perform(effect) {
                first_err.get_or_insert(e);
            }
        }
        self.publish();
        first_err.map_or(Ok(()), Err)
    }

    fn perform(&mut self, effect: Effect) -> Result<(), TransportError> {
        match effect {
            Effect::SubscribeHotplug => {
                if self.hotplug.is_none() {
                    let mut rx = self.inner.driver.listen()?;
                    while let Ok(event) = rx.try_recv() {
                        self.backlog.push_back(event);
                    }
                    // A device that failed to open and is no longer attached
                    // may come back; its next add is a real plug.
                    if let Some(device) = &self.unopenable {
                        let attached = self
                            .backlog
                            .iter()
                            .any(|e| matches!(e, HotplugEvent::Added(d) if d == device));
                        if !attached {
                            self.unopenable = None;
                        }
                    }
                    self.hotplug = Some(rx);
                    trace!(replayed = self.backlog.len(), "hotplug subscription created");
                }
            }
            Effect::UnsubscribeHotplug => {
                self.hotplug = None;
                self.backlog.clear();
            }
            Effect::Emit(kind) => {
                // Consumers reacting to an event must see the new state.
                self.publish();
                self.inner.bus.emit(kind.into());
            }
            Effect::StartDebounce => {
                let window = self.inner.config.disconnect_debounce;
                self.debounce = Some(Box::pin(tokio::time::sleep(window)));
            }
            Effect::CancelDebounce => {
                if self.debounce.take().is_some() {
                    debug!("pending disconnect superseded");
                }
            }
            Effect::OpenTransport => {
                let device = self
                    .added
                    .clone()
                    .ok_or_else(|| TransportError::Open {
                        message: "no device to open".into(),
                    })?;
                self.target = Some(device.clone());
                let driver = Arc::clone(&self.inner.driver);
                self.opening = Some(Box::pin(async move { driver.open(&device).await }));
            }
            Effect::StoreSession => {
                let Some(transport) = self.opened.take() else {
                    return Err(TransportError::Open {
                        message: "no transport to store".into(),
                    });
                };
                self.generation += 1;
                self.disconnect = Some(transport.disconnect_signal());
                self.inner
                    .session
                    .store(Some(Arc::new(Session::new(self.generation, transport))));
                self.inner.reconnecting.store(false, Ordering::Release);
                info!(generation = self.generation, "device transport open");
            }
            Effect::ClearSession => {
                self.disconnect = None;
                self.opening = None;
                self.target = None;
                if let Some(session) = self.inner.session.swap(None) {
                    tokio::spawn(async move { session.transport.close().await });
                }
                if self.state == ConnectionState::NotListening {
                    self.inner.reconnecting.store(false, Ordering::Release);
                }
            }
        }
        Ok(())
    }

    fn publish(&self) {
        let state = self.state;
        self.inner.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }
}

// ── Select helpers ───────────────────────────────────────────────

async fn wait_disconnect(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => pending().await,
    }
}

async fn wait_open(
    opening: &mut Option<OpenFuture>,
) -> Result<Box<dyn Transport>, TransportError> {
    match opening {
        Some(fut) => fut.as_mut().await,
        None => pending().await,
    }
}

async fn wait_debounce(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

async fn next_hotplug(
    backlog: &mut VecDeque<HotplugEvent>,
    subscription: &mut Option<HotplugSubscription>,
) -> Option<HotplugEvent> {
    if let Some(event) = backlog.pop_front() {
        return Some(event);
    }
    match subscription {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}
