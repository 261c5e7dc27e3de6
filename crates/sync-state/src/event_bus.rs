//! In-process sync event distribution
//!
//! The bus is created per signed-in session and dropped on sign-out; it is
//! never a global. Delivery is synchronous on the publishing task, in
//! subscription order. Each handler is isolated: an `Err` or a panic is
//! logged and delivery continues with the next handler.
//!
//! There is no replay. A subscriber only sees events published after it
//! subscribed.

use chat_client::MessageSummary;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::failure::{FailureClass, FailureKind};
use crate::list_store::ConversationListSnapshot;

/// Events produced by the poller
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A conversation's newest message changed since the previous poll
    MessageReceived {
        /// Conversation the message belongs to
        convo_id: String,
        /// The new message
        message: MessageSummary,
    },
    /// A new conversation list snapshot was applied
    ConversationListUpdated(Arc<ConversationListSnapshot>),
    /// A poll failed
    PollFailed {
        /// Failure category
        kind: FailureKind,
        /// Retry class of `kind`
        class: FailureClass,
        /// Consecutive failures including this one
        attempt: u32,
        /// `false` once polling has halted until the engine is restarted
        will_retry: bool,
    },
    /// The first poll after a failure streak succeeded
    PollRecovered,
}

impl SyncEvent {
    /// Kind tag of this event
    pub fn kind(&self) -> EventKind {
        match self {
            SyncEvent::MessageReceived { .. } => EventKind::MessageReceived,
            SyncEvent::ConversationListUpdated(_) => EventKind::ConversationListUpdated,
            SyncEvent::PollFailed { .. } => EventKind::PollFailed,
            SyncEvent::PollRecovered => EventKind::PollRecovered,
        }
    }
}

/// Event kinds a handler can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`SyncEvent::MessageReceived`]
    MessageReceived,
    /// [`SyncEvent::ConversationListUpdated`]
    ConversationListUpdated,
    /// [`SyncEvent::PollFailed`]
    PollFailed,
    /// [`SyncEvent::PollRecovered`]
    PollRecovered,
}

type Handler = dyn Fn(&SyncEvent) -> anyhow::Result<()> + Send + Sync;

struct Subscriber {
    id: u64,
    filter: Option<EventKind>,
    handler: Arc<Handler>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl BusInner {
    fn remove(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }
}

/// Publish/subscribe channel for [`SyncEvent`]s
///
/// # Example
///
/// ```
/// use sync_state::event_bus::{EventBus, EventKind, SyncEvent};
///
/// let bus = EventBus::new();
/// let _subscription = bus.subscribe(EventKind::PollRecovered, |_event| {
///     println!("back online");
///     Ok(())
/// });
///
/// assert_eq!(bus.publish(SyncEvent::PollRecovered), 1);
/// ```
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to events of `kind`
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add(Some(kind), Arc::new(handler))
    }

    /// Subscribe `handler` to every event
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add(None, Arc::new(handler))
    }

    fn add(&self, filter: Option<EventKind>, handler: Arc<Handler>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().push(Subscriber {
            id,
            filter,
            handler,
        });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every matching subscriber
    ///
    /// Returns the number of handlers that completed without error.
    pub fn publish(&self, event: SyncEvent) -> usize {
        let kind = event.kind();
        // Snapshot so handlers may (un)subscribe without affecting this pass
        let handlers: Vec<(u64, Arc<Handler>)> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.filter.map_or(true, |filter| filter == kind))
            .map(|s| (s.id, Arc::clone(&s.handler)))
            .collect();

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    tracing::warn!(subscriber = id, ?kind, error = %err, "sync event handler failed");
                }
                Err(_) => {
                    tracing::error!(subscriber = id, ?kind, "sync event handler panicked");
                }
            }
        }
        delivered
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Drop every subscription (session teardown)
    pub fn clear(&self) {
        self.inner.subscribers.lock().clear();
    }
}

/// Handle returned by [`EventBus::subscribe`]
///
/// Dropping the handle unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the handler"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Remove the handler from the bus
    pub fn unsubscribe(self) {
        // Drop does the work
    }

    /// Whether the handler is still registered
    pub fn is_active(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|bus| bus.subscribers.lock().iter().any(|s| s.id == self.id))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
