//! Materialized conversation list
//!
//! The store holds an immutable [`ConversationListSnapshot`] behind an `Arc`.
//! Every change builds a new snapshot and swaps it in wholesale, so a reader
//! holding a snapshot never sees a partially applied update.

use chat_client::{Conversation, MessageSummary};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;

use crate::activity::CurrentConvoTracker;

/// Immutable point-in-time view of the conversation list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationListSnapshot {
    conversations: Vec<Conversation>,
    index: HashMap<String, usize>,
    version: u64,
    synced_at: Option<DateTime<Utc>>,
}

impl ConversationListSnapshot {
    fn build(conversations: Vec<Conversation>, version: u64) -> Self {
        let index = conversations
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
        Self {
            conversations,
            index,
            version,
            synced_at: Some(Utc::now()),
        }
    }

    /// Conversations in server order
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    /// Look up a conversation by ID
    pub fn get(&self, convo_id: &str) -> Option<&Conversation> {
        self.index.get(convo_id).map(|&i| &self.conversations[i])
    }

    /// Number of conversations
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Monotonic version, 0 before the first successful poll
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Wall-clock time this snapshot was built
    pub fn synced_at(&self) -> Option<DateTime<Utc>> {
        self.synced_at
    }

    /// Sum of unread counts, optionally skipping muted conversations
    pub fn total_unread(&self, include_muted: bool) -> u32 {
        self.conversations
            .iter()
            .filter(|c| include_muted || !c.muted)
            .map(|c| c.unread_count)
            .fold(0u32, u32::saturating_add)
    }
}

/// Result of reconciling a poll response
#[derive(Debug, Clone)]
pub struct ListChange {
    /// The snapshot now installed
    pub snapshot: Arc<ConversationListSnapshot>,
    /// Conversations whose newest message changed, with that message.
    /// Empty for the first snapshot of a session.
    pub new_messages: Vec<(String, MessageSummary)>,
}

/// Ordered, keyed conversation list for the signed-in session
pub struct ConversationListStore {
    current: RwLock<Arc<ConversationListSnapshot>>,
    tx: watch::Sender<Arc<ConversationListSnapshot>>,
    convo: Arc<CurrentConvoTracker>,
}

impl ConversationListStore {
    /// Create an empty store that reads focus from `convo`
    pub fn new(convo: Arc<CurrentConvoTracker>) -> Self {
        let empty = Arc::new(ConversationListSnapshot::default());
        let (tx, _) = watch::channel(Arc::clone(&empty));
        Self {
            current: RwLock::new(empty),
            tx,
            convo,
        }
    }

    /// Current snapshot
    pub fn get_snapshot(&self) -> Arc<ConversationListSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Subscribe to snapshot replacements
    pub fn subscribe(&self) -> watch::Receiver<Arc<ConversationListSnapshot>> {
        self.tx.subscribe()
    }

    /// Replace the list with a poll result
    ///
    /// Returns `None` when the result matches the current snapshot. The
    /// conversation currently open is treated as read.
    pub fn reconcile(&self, conversations: Vec<Conversation>) -> Option<ListChange> {
        let open = self.convo.get();
        let mut seen = HashSet::with_capacity(conversations.len());
        let mut normalized = Vec::with_capacity(conversations.len());

        for mut conversation in conversations {
            // Pages can overlap when the list shifts between requests
            if !seen.insert(conversation.id.clone()) {
                continue;
            }
            if open.as_deref() == Some(conversation.id.as_str()) {
                conversation.unread_count = 0;
            }
            normalized.push(conversation);
        }

        let mut current = self.current.write();
        if current.version > 0 && current.conversations == normalized {
            return None;
        }

        let new_messages = if current.version == 0 {
            Vec::new()
        } else {
            newest_message_changes(&current, &normalized)
        };

        let snapshot = Arc::new(ConversationListSnapshot::build(normalized, current.version + 1));
        *current = Arc::clone(&snapshot);
        drop(current);

        self.tx.send_replace(Arc::clone(&snapshot));
        tracing::debug!(
            version = snapshot.version,
            conversations = snapshot.len(),
            new_messages = new_messages.len(),
            "conversation list replaced"
        );

        Some(ListChange {
            snapshot,
            new_messages,
        })
    }

    /// Zero the unread count of `convo_id` locally
    ///
    /// Returns the new snapshot, or `None` if nothing changed.
    pub fn mark_read(&self, convo_id: &str) -> Option<Arc<ConversationListSnapshot>> {
        let mut current = self.current.write();
        let position = *current.index.get(convo_id)?;
        if current.conversations[position].unread_count == 0 {
            return None;
        }

        let mut conversations = current.conversations.clone();
        conversations[position].unread_count = 0;
        let snapshot = Arc::new(ConversationListSnapshot::build(conversations, current.version + 1));
        *current = Arc::clone(&snapshot);
        drop(current);

        self.tx.send_replace(Arc::clone(&snapshot));
        Some(snapshot)
    }

    /// Drop all data (sign-out)
    pub fn clear(&self) {
        let empty = Arc::new(ConversationListSnapshot::default());
        *self.current.write() = Arc::clone(&empty);
        self.tx.send_replace(empty);
    }
}

fn newest_message_changes(
    previous: &ConversationListSnapshot,
    next: &[Conversation],
) -> Vec<(String, MessageSummary)> {
    next.iter()
        .filter_map(|conversation| {
            let latest = conversation.latest_message()?;
            let before = previous.get(&conversation.id).and_then(Conversation::latest_message);
            match before {
                Some(old) if old.id == latest.id => None,
                _ => Some((conversation.id.clone(), latest.clone())),
            }
        })
        .collect()
}
