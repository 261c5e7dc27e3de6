//! Per-session composition root
//!
//! A [`SyncSession`] owns every sync component for one signed-in account.
//! Construction order is explicit: the event bus and both trackers first,
//! then the stores and badge, and the poller last since it depends on all
//! of them. Signing out consumes the session.

use chat_client::{ChatApi, ChatApiError, SendAck, MAX_MESSAGE_LENGTH};
use std::sync::Arc;
use std::time::Duration;

use crate::activity::{ActivityMonitor, AppActivityTracker, CurrentConvoTracker};
use crate::config::SyncConfig;
use crate::drafts::MessageDraftStore;
use crate::error::{Result, SyncError};
use crate::event_bus::{EventBus, SyncEvent};
use crate::list_store::ConversationListStore;
use crate::poller::ConvoPoller;
use crate::unread::UnreadBadge;

/// Sync engine for one signed-in account
pub struct SyncSession {
    self_did: String,
    api: Arc<dyn ChatApi>,
    bus: EventBus,
    app_activity: Arc<AppActivityTracker>,
    current_convo: Arc<CurrentConvoTracker>,
    list_store: Arc<ConversationListStore>,
    drafts: Arc<MessageDraftStore>,
    badge: UnreadBadge,
    poller: ConvoPoller,
}

impl SyncSession {
    /// Build a session for `self_did`
    ///
    /// Fails if `config` does not validate. Polling does not begin until
    /// [`start`](Self::start).
    pub fn new(api: Arc<dyn ChatApi>, config: SyncConfig, self_did: impl Into<String>) -> Result<Self> {
        config.validate()?;
        let self_did = self_did.into();

        let bus = EventBus::new();
        let app_activity = Arc::new(AppActivityTracker::new());
        let current_convo = Arc::new(CurrentConvoTracker::new());
        let monitor = ActivityMonitor::new(
            Arc::clone(&app_activity),
            Arc::clone(&current_convo),
            config.inactivity_threshold,
        );

        let list_store = Arc::new(ConversationListStore::new(Arc::clone(&current_convo)));
        let drafts = Arc::new(MessageDraftStore::new());
        let badge = UnreadBadge::new(&bus);

        let poller = ConvoPoller::new(
            Arc::clone(&api),
            config,
            monitor,
            Arc::clone(&list_store),
            bus.clone(),
            self_did.clone(),
        );

        tracing::debug!(did = %self_did, "sync session created");
        Ok(Self {
            self_did,
            api,
            bus,
            app_activity,
            current_convo,
            list_store,
            drafts,
            badge,
            poller,
        })
    }

    /// Begin polling
    pub fn start(&self) -> bool {
        self.poller.start()
    }

    /// Stop polling, keeping all data
    pub fn stop(&self) {
        self.poller.stop();
    }

    /// Tear the session down
    ///
    /// Stops polling and drops all session data and subscriptions.
    pub fn sign_out(self) {
        self.poller.stop();
        self.current_convo.clear();
        self.app_activity.set_list_visible(false);
        self.list_store.clear();
        self.drafts.clear_all();
        self.badge.reset();
        self.bus.clear();
        tracing::info!(did = %self.self_did, "sync session signed out");
    }

    /// Poll now (manual refresh)
    pub fn force_refresh(&self) -> bool {
        self.poller.force_poll()
    }

    /// Navigate into `convo_id`
    ///
    /// Marks the conversation read locally and publishes the updated list, so
    /// every list observer sees the zeroed count. Fails if another
    /// conversation is still open.
    pub fn open_conversation(&self, convo_id: &str) -> Result<()> {
        self.current_convo.set(convo_id)?;
        if let Some(snapshot) = self.list_store.mark_read(convo_id) {
            self.bus.publish(SyncEvent::ConversationListUpdated(snapshot));
        }
        Ok(())
    }

    /// Navigate out of the open conversation
    pub fn close_conversation(&self) {
        self.current_convo.clear();
    }

    /// Send `text` to `convo_id`
    ///
    /// On success the conversation's draft is cleared and a poll is forced
    /// so the list reflects the sent message.
    pub async fn send_message(&self, convo_id: &str, text: &str) -> Result<SendAck> {
        let length = text.chars().count();
        if length > MAX_MESSAGE_LENGTH {
            return Err(SyncError::MessageTooLong {
                length,
                max: MAX_MESSAGE_LENGTH,
            });
        }

        let ack = self.api.send_message(convo_id, text).await?;
        self.drafts.clear_draft(convo_id);
        self.poller.force_poll();

        tracing::debug!(%convo_id, message_id = %ack.message_id, "message sent");
        Ok(ack)
    }

    /// DID of the signed-in account
    pub fn self_did(&self) -> &str {
        &self.self_did
    }

    /// Event bus for this session
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Conversation list
    pub fn list_store(&self) -> &Arc<ConversationListStore> {
        &self.list_store
    }

    /// Message drafts
    pub fn drafts(&self) -> &Arc<MessageDraftStore> {
        &self.drafts
    }

    /// Open-conversation tracker
    pub fn current_convo(&self) -> &Arc<CurrentConvoTracker> {
        &self.current_convo
    }

    /// Foreground / list-visibility tracker
    pub fn app_activity(&self) -> &Arc<AppActivityTracker> {
        &self.app_activity
    }

    /// Unread badge
    pub fn badge(&self) -> &UnreadBadge {
        &self.badge
    }

    /// The poller
    pub fn poller(&self) -> &ConvoPoller {
        &self.poller
    }

    /// Failure that halted polling, if any; restart with [`start`](Self::start)
    /// after re-authenticating
    pub fn fatal_error(&self) -> Option<ChatApiError> {
        self.poller.fatal_error()
    }

    /// Interval armed for the next poll
    pub fn next_interval(&self) -> Option<Duration> {
        self.poller.cycle().interval
    }
}
