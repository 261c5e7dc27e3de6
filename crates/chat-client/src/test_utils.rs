//! Test utilities and fixtures for chat sync testing
//!
//! This module provides a scripted [`ChatApi`] implementation and a few
//! conversation fixtures. Enabled for other crates through the `test-utils`
//! feature.

#![allow(dead_code)] // Test utilities may not all be used yet

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;

use crate::api::ChatApi;
use crate::error::{ChatApiError, Result, TransportErrorKind};
use crate::types::{ChatMember, Conversation, ConversationPage, MessageSummary, SendAck};

/// DID used for the signed-in account in fixtures
pub const SELF_DID: &str = "did:plc:self";

/// Fixed base timestamp for deterministic fixtures
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Member fixture
pub fn member(name: &str) -> ChatMember {
    ChatMember::new(format!("did:plc:{}", name), format!("{}.bsky.social", name))
}

/// Conversation between self and `peer` whose newest message is `message_id`
pub fn conversation(id: &str, peer: &str, message_id: &str, unread: u32) -> Conversation {
    let seq: i64 = message_id
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .unwrap_or(0);
    let sent_at = base_time() + ChronoDuration::minutes(seq);

    Conversation::new(id, vec![member("self"), member(peer)])
        .with_message(MessageSummary::new(
            message_id,
            format!("message {}", message_id),
            format!("did:plc:{}", peer),
            sent_at,
        ))
        .with_unread(unread)
}

/// Single-page response holding `conversations`
pub fn page(conversations: Vec<Conversation>) -> ConversationPage {
    ConversationPage {
        conversations,
        cursor: None,
    }
}

/// A retryable connection failure
pub fn network_error() -> ChatApiError {
    ChatApiError::transport(TransportErrorKind::Connect, "connection refused")
}

/// A fatal authorization failure
pub fn auth_error() -> ChatApiError {
    ChatApiError::xrpc(401, "ExpiredToken", "Token has expired")
}

enum Scripted {
    Ready(Result<ConversationPage>),
    Held(oneshot::Receiver<()>, Result<ConversationPage>),
}

struct ScriptState {
    queue: VecDeque<Scripted>,
    fallback: Result<ConversationPage>,
    calls: Vec<Instant>,
    cursors: Vec<Option<String>>,
    sent: Vec<(String, String)>,
}

/// [`ChatApi`] that replays scripted responses
///
/// Responses are consumed in order; once the script runs dry every fetch
/// returns the fallback (an empty page unless changed). Call instants use
/// `tokio::time::Instant`, so they line up with paused test time.
pub struct ScriptedChatApi {
    state: Mutex<ScriptState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    call_made: Notify,
}

impl ScriptedChatApi {
    /// Create an API with an empty script
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScriptState {
                queue: VecDeque::new(),
                fallback: Ok(ConversationPage::default()),
                calls: Vec::new(),
                cursors: Vec::new(),
                sent: Vec::new(),
            }),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            call_made: Notify::new(),
        }
    }

    /// Queue a successful page
    pub fn push_ok(&self, page: ConversationPage) {
        self.lock().queue.push_back(Scripted::Ready(Ok(page)));
    }

    /// Queue a failure
    pub fn push_err(&self, err: ChatApiError) {
        self.lock().queue.push_back(Scripted::Ready(Err(err)));
    }

    /// Queue a response that is held until the returned sender fires
    pub fn push_held(&self, result: Result<ConversationPage>) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.lock().queue.push_back(Scripted::Held(rx, result));
        tx
    }

    /// Replace the response used once the script is exhausted
    pub fn set_fallback(&self, result: Result<ConversationPage>) {
        self.lock().fallback = result;
    }

    /// Instants at which fetches started
    pub fn calls(&self) -> Vec<Instant> {
        self.lock().calls.clone()
    }

    /// Number of fetches started
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Cursors passed to each fetch
    pub fn cursors(&self) -> Vec<Option<String>> {
        self.lock().cursors.clone()
    }

    /// Highest number of concurrently running fetches observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of fetches currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Messages passed to `send_message`
    pub fn sent(&self) -> Vec<(String, String)> {
        self.lock().sent.clone()
    }

    /// Wait until at least `count` fetches have started
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.call_made.notified();
            if self.call_count() >= count {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Counts a running fetch until dropped, including when the fetch is cancelled
struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
    running: usize,
}

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let running = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Self { counter, running }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for ScriptedChatApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatApi for ScriptedChatApi {
    async fn fetch_conversation_list(&self, cursor: Option<String>) -> Result<ConversationPage> {
        let next = {
            let mut state = self.lock();
            state.calls.push(Instant::now());
            state.cursors.push(cursor);
            match state.queue.pop_front() {
                Some(next) => next,
                None => Scripted::Ready(state.fallback.clone()),
            }
        };

        let guard = InFlightGuard::enter(&self.in_flight);
        self.max_in_flight.fetch_max(guard.running, Ordering::SeqCst);
        self.call_made.notify_waiters();

        match next {
            Scripted::Ready(result) => result,
            Scripted::Held(release, result) => {
                let _ = release.await;
                result
            }
        }
    }

    async fn send_message(&self, convo_id: &str, text: &str) -> Result<SendAck> {
        let mut state = self.lock();
        state.sent.push((convo_id.to_string(), text.to_string()));
        Ok(SendAck {
            message_id: format!("sent{}", state.sent.len()),
            sent_at: base_time(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_scripted_api_replays_in_order() {
        let api = ScriptedChatApi::new();
        api.push_err(network_error());
        api.push_ok(page(vec![conversation("c1", "bob", "m1", 1)]));

        assert!(api.fetch_conversation_list(None).await.is_err());
        let second = api.fetch_conversation_list(None).await.unwrap();
        assert_eq!(second.conversations[0].id, "c1");

        // Script exhausted: fallback is an empty page
        let third = api.fetch_conversation_list(None).await.unwrap();
        assert!(third.conversations.is_empty());
        assert_eq!(api.call_count(), 3);
        assert_eq!(api.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_is_no_longer_counted() {
        let api = Arc::new(ScriptedChatApi::new());
        let _release = api.push_held(Ok(page(Vec::new())));

        let held = Arc::clone(&api);
        let handle = tokio::spawn(async move { held.fetch_conversation_list(None).await });
        api.wait_for_calls(1).await;
        assert_eq!(api.in_flight(), 1);

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(api.in_flight(), 0);

        api.fetch_conversation_list(None).await.unwrap();
        assert_eq!(api.max_in_flight(), 1);
    }

    #[test]
    fn test_conversation_fixture_orders_by_message_number() {
        let older = conversation("c1", "bob", "m1", 0);
        let newer = conversation("c2", "carol", "m5", 0);
        assert!(newer.last_activity_at > older.last_activity_at);
        assert_eq!(older.other_participant_name("did:plc:self"), Some("bob.bsky.social"));
    }
}
