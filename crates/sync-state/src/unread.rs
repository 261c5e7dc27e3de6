//! Unread message badge
//!
//! The badge observes [`SyncEvent::ConversationListUpdated`] and recomputes
//! the total unread count from each snapshot. Muted conversations do not
//! contribute. The value is exposed as a capped [`UnreadDisplay`].
//!
//! Snapshots reach the bus from both the poller and local mark-read, so a
//! snapshot older than the last one applied is ignored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::event_bus::{EventBus, EventKind, Subscription, SyncEvent};
use crate::list_store::ConversationListSnapshot;

/// Maximum unread count to show (displays as "30+")
pub const MAX_DISPLAY_COUNT: u32 = 30;

/// Unread count display value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnreadDisplay {
    /// No unread messages
    #[default]
    None,
    /// Specific count (1-29)
    Count(u32),
    /// 30 or more unread messages
    Many,
}

impl UnreadDisplay {
    /// Create from a numeric count
    pub fn from_count(count: u32) -> Self {
        match count {
            0 => UnreadDisplay::None,
            n if n >= MAX_DISPLAY_COUNT => UnreadDisplay::Many,
            n => UnreadDisplay::Count(n),
        }
    }

    /// Check if there are any unread messages
    pub fn has_unread(&self) -> bool {
        !matches!(self, UnreadDisplay::None)
    }

    /// Numeric count (0 for `None`, the cap for `Many`)
    pub fn count(&self) -> u32 {
        match self {
            UnreadDisplay::None => 0,
            UnreadDisplay::Count(n) => *n,
            UnreadDisplay::Many => MAX_DISPLAY_COUNT,
        }
    }
}

impl std::fmt::Display for UnreadDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnreadDisplay::None => Ok(()),
            UnreadDisplay::Count(n) => write!(f, "{}", n),
            UnreadDisplay::Many => write!(f, "{}+", MAX_DISPLAY_COUNT),
        }
    }
}

/// Unread-messages badge fed by the event bus
///
/// # Example
///
/// ```
/// use sync_state::event_bus::EventBus;
/// use sync_state::unread::{UnreadBadge, UnreadDisplay};
///
/// let bus = EventBus::new();
/// let badge = UnreadBadge::new(&bus);
/// assert_eq!(badge.get(), UnreadDisplay::None);
/// ```
pub struct UnreadBadge {
    tx: Arc<watch::Sender<UnreadDisplay>>,
    applied_version: Arc<AtomicU64>,
    _subscription: Subscription,
}

impl UnreadBadge {
    /// Create a badge subscribed to `bus`
    pub fn new(bus: &EventBus) -> Self {
        let (tx, _) = watch::channel(UnreadDisplay::None);
        let tx = Arc::new(tx);

        let applied_version = Arc::new(AtomicU64::new(0));

        let handler_tx = Arc::clone(&tx);
        let handler_version = Arc::clone(&applied_version);
        let subscription = bus.subscribe(EventKind::ConversationListUpdated, move |event| {
            if let SyncEvent::ConversationListUpdated(snapshot) = event {
                let version = snapshot.version();
                if handler_version.fetch_max(version, Ordering::AcqRel) <= version {
                    update(&handler_tx, snapshot);
                }
            }
            Ok(())
        });

        Self {
            tx,
            applied_version,
            _subscription: subscription,
        }
    }

    /// Current badge value
    pub fn get(&self) -> UnreadDisplay {
        *self.tx.borrow()
    }

    /// Subscribe to badge changes
    pub fn subscribe(&self) -> watch::Receiver<UnreadDisplay> {
        self.tx.subscribe()
    }

    /// Reset to no unread messages (sign-out)
    pub fn reset(&self) {
        self.applied_version.store(0, Ordering::Release);
        set(&self.tx, UnreadDisplay::None);
    }
}

fn update(tx: &watch::Sender<UnreadDisplay>, snapshot: &ConversationListSnapshot) {
    set(tx, UnreadDisplay::from_count(snapshot.total_unread(false)));
}

fn set(tx: &watch::Sender<UnreadDisplay>, value: UnreadDisplay) {
    let changed = tx.send_if_modified(|current| {
        if *current == value {
            return false;
        }
        *current = value;
        true
    });
    if changed {
        let unread = value.count();
        tracing::debug!(unread, "unread badge changed");
    }
}
