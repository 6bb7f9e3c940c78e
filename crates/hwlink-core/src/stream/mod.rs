// ── Notification fan-out ──
//
// Every subscriber owns an unbounded queue, so events are never dropped
// or coalesced. Fan-out happens under one lock, which gives all
// subscribers the same global order even with several emitters.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;
use tracing::trace;

use crate::model::NotificationEvent;

/// Handle identifying one subscription, for explicit detaching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub(crate) struct EventBus {
    inner: Mutex<BusInner>,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<NotificationEvent>)>,
}

impl EventBus {
    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe(self: &Arc<Self>) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.push((id, tx));
        trace!(?id, "subscriber attached");

        EventSubscription {
            id,
            receiver: rx,
            bus: Arc::downgrade(self),
        }
    }

    /// Detach a subscriber. Returns `false` if it was already gone.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sub, _)| *sub != id);
        before != inner.subscribers.len()
    }

    /// Deliver `event` to every attached subscriber, in registration order.
    pub(crate) fn emit(&self, event: NotificationEvent) {
        let mut inner = self.lock();
        trace!(kind = %event.kind, subscribers = inner.subscribers.len(), "emit");
        // Receivers dropped without unsubscribing are pruned here.
        inner.subscribers.retain(|(_, tx)| tx.send(event).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

/// A live subscription to the notification stream.
///
/// Receives every event emitted after it was created. Dropping it
/// detaches from the broadcaster.
pub struct EventSubscription {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<NotificationEvent>,
    bus: Weak<EventBus>,
}

impl EventSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event. Returns `None` once detached and drained.
    pub async fn recv(&mut self) -> Option<NotificationEvent> {
        self.receiver.recv().await
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<NotificationEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything queued right now.
    pub fn drain(&mut self) -> Vec<NotificationEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Stream for EventSubscription {
    type Item = NotificationEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}
