//! Direct-message sync engine
//!
//! This crate keeps a signed-in account's conversation list current by
//! polling the chat service at a cadence chosen from what the user is
//! looking at, backing off on transient failures and halting on fatal ones.
//! Outcomes are distributed in-process through a per-session [`EventBus`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod activity;
pub mod config;
pub mod drafts;
pub mod error;
pub mod event_bus;
pub mod failure;
pub mod list_store;
pub mod poller;
pub mod session;
pub mod unread;

pub use activity::{ActivityMonitor, ActivityState, AppActivityTracker, CurrentConvoTracker};
pub use config::SyncConfig;
pub use drafts::MessageDraftStore;
pub use error::{Result, SyncError};
pub use event_bus::{EventBus, EventKind, Subscription, SyncEvent};
pub use failure::{classify, FailureClass, FailureKind, RetryBudget};
pub use list_store::{ConversationListSnapshot, ConversationListStore, ListChange};
pub use poller::{ConvoPoller, PollCycle, PollPhase};
pub use session::SyncSession;
pub use unread::{UnreadBadge, UnreadDisplay};
