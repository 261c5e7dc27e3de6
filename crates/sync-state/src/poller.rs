//! Conversation list poller
//!
//! [`ConvoPoller`] drives the sync loop for one signed-in session. A single
//! spawned task alternates between two suspension points: waiting for the
//! next scheduled poll and waiting for the in-flight fetch to settle.
//!
//! ```text
//!   start()
//!     │
//!     ▼
//!  InFlight ──ok──▶ Success ──┐
//!     ▲     └─err─▶ Failed ───┤ retryable
//!     │                       ▼
//!     └──── timer/force ── Scheduled ◀──▶ Suspended (Idle activity)
//!
//!  stop() or fatal failure ──▶ Idle
//! ```
//!
//! The base interval comes from the current [`ActivityState`]; retryable
//! failures stretch it through [`RetryBudget`]. Every write the task makes
//! (store, phase, cycle, in-flight flag) is fenced by a session epoch, so a
//! task that outlives [`ConvoPoller::stop`] never touches observable state.

use chat_client::{ChatApi, ChatApiError, Conversation};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::activity::{ActivityMonitor, ActivityState, ActivityWatch};
use crate::config::SyncConfig;
use crate::event_bus::{EventBus, SyncEvent};
use crate::failure::{classify, FailureClass, RetryBudget};
use crate::list_store::ConversationListStore;

/// Lifecycle phase of the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollPhase {
    /// Not running (never started, stopped, or halted by a fatal failure)
    Idle,
    /// Waiting for the next poll
    Scheduled,
    /// Waiting for a surface to become visible again
    Suspended,
    /// A fetch is pending
    InFlight,
    /// The last fetch succeeded
    Success,
    /// The last fetch failed and will be retried
    Failed,
}

/// The current scheduling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollCycle {
    /// Interval armed for the next poll, `None` while suspended
    pub interval: Option<Duration>,
    /// Consecutive retryable failures behind this decision
    pub attempt: u32,
    /// When the last poll succeeded
    pub last_success_at: Option<Instant>,
}

struct RunningTask {
    stop_tx: oneshot::Sender<()>,
    // Per run, so a trigger left unconsumed by a stopped task is dropped with it
    force: Arc<Notify>,
    handle: JoinHandle<()>,
}

enum Wake {
    Poll,
    Stop,
}

enum CycleOutcome {
    Continue,
    Halt,
    Stale,
}

struct PollerInner {
    api: Arc<dyn ChatApi>,
    config: SyncConfig,
    monitor: ActivityMonitor,
    store: Arc<ConversationListStore>,
    bus: EventBus,
    self_did: String,

    epoch: AtomicU64,
    // Held by the task around every epoch-checked write, and by stop() while
    // bumping the epoch and resetting phase and in-flight
    apply_lock: Mutex<()>,
    in_flight: AtomicBool,
    phase: watch::Sender<PollPhase>,
    cycle: watch::Sender<PollCycle>,
    fatal: Mutex<Option<ChatApiError>>,
    task: Mutex<Option<RunningTask>>,
}

/// Adaptive poller for the conversation list
pub struct ConvoPoller {
    inner: Arc<PollerInner>,
}

impl ConvoPoller {
    /// Create a stopped poller
    pub fn new(
        api: Arc<dyn ChatApi>,
        config: SyncConfig,
        monitor: ActivityMonitor,
        store: Arc<ConversationListStore>,
        bus: EventBus,
        self_did: impl Into<String>,
    ) -> Self {
        let (phase, _) = watch::channel(PollPhase::Idle);
        let (cycle, _) = watch::channel(PollCycle::default());
        Self {
            inner: Arc::new(PollerInner {
                api,
                config,
                monitor,
                store,
                bus,
                self_did: self_did.into(),
                epoch: AtomicU64::new(0),
                apply_lock: Mutex::new(()),
                in_flight: AtomicBool::new(false),
                phase,
                cycle,
                fatal: Mutex::new(None),
                task: Mutex::new(None),
            }),
        }
    }

    /// Start polling; the first poll is issued immediately
    ///
    /// Returns `false` if the poller was already running. Must be called
    /// from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = self.inner.task.lock();
        if task.is_some() {
            return false;
        }

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.fatal.lock().take();
        self.inner.cycle.send_replace(PollCycle::default());

        let (stop_tx, stop_rx) = oneshot::channel();
        let force = Arc::new(Notify::new());
        let handle = tokio::spawn(run(Arc::clone(&self.inner), epoch, Arc::clone(&force), stop_rx));
        *task = Some(RunningTask {
            stop_tx,
            force,
            handle,
        });

        tracing::info!(epoch, "conversation poller started");
        true
    }

    /// Stop polling
    ///
    /// Cancels the pending timer before returning. A fetch already sent may
    /// still resolve, but its result is discarded.
    pub fn stop(&self) {
        let Some(task) = self.inner.task.lock().take() else {
            return;
        };

        let epoch = {
            let _apply = self.inner.apply_lock.lock();
            let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            self.inner.in_flight.store(false, Ordering::SeqCst);
            self.inner.set_phase(PollPhase::Idle);
            epoch
        };
        let _ = task.stop_tx.send(());
        task.handle.abort();

        tracing::info!(epoch, "conversation poller stopped");
    }

    /// Poll now instead of waiting for the timer
    ///
    /// Returns `false` without issuing anything when the poller is not
    /// running or a fetch is already in flight; the pending fetch stands in
    /// for the requested one. The interval after the forced poll is computed
    /// as usual.
    pub fn force_poll(&self) -> bool {
        let task = self.inner.task.lock();
        let Some(task) = task.as_ref() else {
            return false;
        };
        if self.inner.in_flight.load(Ordering::SeqCst) {
            tracing::debug!("force poll coalesced with in-flight fetch");
            return false;
        }
        task.force.notify_one();
        true
    }

    /// Whether the poll task is running
    pub fn is_running(&self) -> bool {
        self.inner.task.lock().is_some()
    }

    /// Whether a fetch is pending
    pub fn is_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Current phase
    pub fn phase(&self) -> PollPhase {
        *self.inner.phase.borrow()
    }

    /// Subscribe to phase changes
    pub fn subscribe_phase(&self) -> watch::Receiver<PollPhase> {
        self.inner.phase.subscribe()
    }

    /// Current scheduling decision
    pub fn cycle(&self) -> PollCycle {
        *self.inner.cycle.borrow()
    }

    /// Subscribe to scheduling decisions
    pub fn subscribe_cycle(&self) -> watch::Receiver<PollCycle> {
        self.inner.cycle.subscribe()
    }

    /// Failure that halted polling, cleared by the next [`start`](Self::start)
    pub fn fatal_error(&self) -> Option<ChatApiError> {
        self.inner.fatal.lock().clone()
    }
}

impl Drop for ConvoPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    inner: Arc<PollerInner>,
    epoch: u64,
    force: Arc<Notify>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut activity = inner.monitor.watch();
    let mut budget = RetryBudget::new();
    let mut poll_now = true;

    loop {
        if !poll_now {
            match inner.wait(epoch, &force, &mut activity, &budget, &mut stop_rx).await {
                Wake::Poll => {}
                Wake::Stop => return,
            }
        }
        poll_now = false;

        match inner.poll_once(epoch, &mut budget).await {
            CycleOutcome::Continue => {}
            CycleOutcome::Halt | CycleOutcome::Stale => return,
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl PollerInner {
    fn set_phase(&self, phase: PollPhase) {
        self.phase.send_if_modified(|current| {
            if *current == phase {
                return false;
            }
            *current = phase;
            true
        });
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Run `f` under the apply lock, only while `epoch` is still current
    ///
    /// Must not publish: handlers may call back into the poller.
    fn fenced<R>(&self, epoch: u64, f: impl FnOnce() -> R) -> Option<R> {
        let _apply = self.apply_lock.lock();
        if self.is_current(epoch) {
            Some(f())
        } else {
            None
        }
    }

    /// Interval for `state` given the current failure streak
    fn interval_for(&self, state: &ActivityState, budget: &RetryBudget) -> Option<Duration> {
        let base = state.base_interval(&self.config)?;
        Some(budget.backoff(base, self.config.backoff_multiplier, self.config.max_interval))
    }

    /// Wait until the next poll is due
    ///
    /// Activity changes re-arm the timer from the moment the wait began, so
    /// an overdue poll fires at once. Leaving `Idle` for a visible surface
    /// polls immediately; leaving it for `Background` arms a full background
    /// interval from that moment.
    async fn wait(
        &self,
        epoch: u64,
        force: &Notify,
        activity: &mut ActivityWatch,
        budget: &RetryBudget,
        stop_rx: &mut oneshot::Receiver<()>,
    ) -> Wake {
        let mut armed_at = Instant::now();
        let mut suspended = false;

        loop {
            activity.mark_seen();
            let state = self.monitor.current_state();
            let interval = self.interval_for(&state, budget);

            if interval.is_some() && suspended {
                if state != ActivityState::Background {
                    tracing::debug!(%state, "leaving idle, polling now");
                    return Wake::Poll;
                }
                armed_at = Instant::now();
            }
            suspended = interval.is_none();

            let scheduled = self.fenced(epoch, || {
                self.cycle.send_modify(|cycle| {
                    cycle.interval = interval;
                    cycle.attempt = budget.failures();
                });
                self.set_phase(match interval {
                    Some(_) => PollPhase::Scheduled,
                    None => PollPhase::Suspended,
                });
            });
            if scheduled.is_none() {
                return Wake::Stop;
            }
            match interval {
                Some(interval) => tracing::debug!(
                    %state,
                    interval_ms = interval.as_millis() as u64,
                    attempt = budget.failures(),
                    "next poll scheduled"
                ),
                None => tracing::debug!("no messaging surface visible, polling suspended"),
            }

            let deadline = interval.map(|interval| armed_at + interval);
            let idle_at = self.monitor.idle_deadline().filter(|at| *at > Instant::now());

            tokio::select! {
                _ = &mut *stop_rx => return Wake::Stop,
                _ = force.notified() => {
                    tracing::debug!("forced poll");
                    return Wake::Poll;
                }
                _ = sleep_until_opt(deadline) => return Wake::Poll,
                _ = sleep_until_opt(idle_at) => {}
                _ = activity.changed() => {}
            }
        }
    }

    /// Run one fetch and apply its outcome
    async fn poll_once(&self, epoch: u64, budget: &mut RetryBudget) -> CycleOutcome {
        let started = self.fenced(epoch, || {
            self.in_flight.store(true, Ordering::SeqCst);
            self.set_phase(PollPhase::InFlight);
        });
        if started.is_none() {
            return CycleOutcome::Stale;
        }

        let result = self.fetch_pages().await;
        if self.fenced(epoch, || self.in_flight.store(false, Ordering::SeqCst)).is_none() {
            tracing::debug!(epoch, "discarding poll result from stopped session");
            return CycleOutcome::Stale;
        }

        match result {
            Ok(conversations) => self.apply_success(epoch, budget, conversations),
            Err(err) => self.apply_failure(epoch, budget, err),
        }
    }

    /// Fetch up to `max_pages_per_poll` pages, one request at a time
    async fn fetch_pages(&self) -> Result<Vec<Conversation>, ChatApiError> {
        let mut conversations = Vec::new();
        let mut cursor = None;

        for _ in 0..self.config.max_pages_per_poll.max(1) {
            let page = self.api.fetch_conversation_list(cursor.take()).await?;
            conversations.extend(page.conversations);
            match page.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(conversations)
    }

    fn apply_success(
        &self,
        epoch: u64,
        budget: &mut RetryBudget,
        conversations: Vec<Conversation>,
    ) -> CycleOutcome {
        let recovered = budget.in_streak();
        let failures = budget.failures();

        let applied = self.fenced(epoch, || {
            let change = self.store.reconcile(conversations);
            self.cycle.send_modify(|cycle| {
                cycle.attempt = 0;
                cycle.last_success_at = Some(Instant::now());
            });
            self.set_phase(PollPhase::Success);
            change
        });
        let Some(change) = applied else {
            tracing::debug!(epoch, "discarding poll result from stopped session");
            return CycleOutcome::Stale;
        };
        budget.reset();

        if recovered {
            tracing::info!(failures, "conversation polling recovered");
            self.publish(epoch, SyncEvent::PollRecovered);
        }

        let Some(change) = change else {
            tracing::debug!("conversation list unchanged");
            return CycleOutcome::Continue;
        };

        self.publish(epoch, SyncEvent::ConversationListUpdated(Arc::clone(&change.snapshot)));
        for (convo_id, message) in change.new_messages {
            if message.sender_did == self.self_did {
                continue;
            }
            self.publish(epoch, SyncEvent::MessageReceived { convo_id, message });
        }
        CycleOutcome::Continue
    }

    fn apply_failure(&self, epoch: u64, budget: &mut RetryBudget, err: ChatApiError) -> CycleOutcome {
        let kind = classify(&err);
        let class = kind.class();

        match class {
            FailureClass::Retryable => {
                let attempt = budget.failures().saturating_add(1);
                let recorded = self.fenced(epoch, || {
                    self.cycle.send_modify(|cycle| cycle.attempt = attempt);
                    self.set_phase(PollPhase::Failed);
                });
                if recorded.is_none() {
                    return CycleOutcome::Stale;
                }
                budget.record_failure();
                tracing::warn!(attempt, %kind, error = %err, "conversation poll failed, will retry");
                self.publish(
                    epoch,
                    SyncEvent::PollFailed {
                        kind,
                        class,
                        attempt,
                        will_retry: true,
                    },
                );
                CycleOutcome::Continue
            }
            FailureClass::Fatal => {
                let attempt = budget.failures().saturating_add(1);
                let error = err.to_string();
                let recorded = self.fenced(epoch, || {
                    *self.fatal.lock() = Some(err);
                    self.set_phase(PollPhase::Idle);
                });
                if recorded.is_none() {
                    return CycleOutcome::Stale;
                }
                tracing::error!(attempt, %kind, %error, "conversation poll failed, polling halted");

                // Release the slot first so a handler may restart the poller
                {
                    let mut task = self.task.lock();
                    if self.is_current(epoch) {
                        task.take();
                    }
                }
                self.publish(
                    epoch,
                    SyncEvent::PollFailed {
                        kind,
                        class,
                        attempt,
                        will_retry: false,
                    },
                );
                CycleOutcome::Halt
            }
        }
    }

    fn publish(&self, epoch: u64, event: SyncEvent) {
        if self.is_current(epoch) {
            self.bus.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{AppActivityTracker, CurrentConvoTracker};
    use crate::event_bus::Subscription;
    use chat_client::test_utils::{
        auth_error, base_time, conversation, network_error, page, ScriptedChatApi, SELF_DID,
    };
    use chat_client::{ConversationPage, MessageSummary, MockChatApi};

    struct Harness {
        api: Arc<ScriptedChatApi>,
        app: Arc<AppActivityTracker>,
        convo: Arc<CurrentConvoTracker>,
        store: Arc<ConversationListStore>,
        bus: EventBus,
        poller: ConvoPoller,
    }

    fn harness_with(api: Arc<dyn ChatApi>, config: SyncConfig) -> (ConvoPoller, Parts) {
        let app = Arc::new(AppActivityTracker::new());
        let convo = Arc::new(CurrentConvoTracker::new());
        let monitor = ActivityMonitor::new(app.clone(), convo.clone(), config.inactivity_threshold);
        let store = Arc::new(ConversationListStore::new(convo.clone()));
        let bus = EventBus::new();
        let poller = ConvoPoller::new(api, config, monitor, store.clone(), bus.clone(), SELF_DID);
        (
            poller,
            Parts {
                app,
                convo,
                store,
                bus,
            },
        )
    }

    struct Parts {
        app: Arc<AppActivityTracker>,
        convo: Arc<CurrentConvoTracker>,
        store: Arc<ConversationListStore>,
        bus: EventBus,
    }

    fn harness(config: SyncConfig) -> Harness {
        let api = Arc::new(ScriptedChatApi::new());
        let (poller, parts) = harness_with(api.clone(), config);
        Harness {
            api,
            app: parts.app,
            convo: parts.convo,
            store: parts.store,
            bus: parts.bus,
            poller,
        }
    }

    fn gaps(calls: &[Instant]) -> Vec<Duration> {
        calls.windows(2).map(|w| w[1] - w[0]).collect()
    }

    fn record_events(bus: &EventBus) -> (Arc<Mutex<Vec<String>>>, Subscription) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let sub = bus.subscribe_all(move |event| {
            let label = match event {
                SyncEvent::MessageReceived { convo_id, message } => {
                    format!("message:{}:{}", convo_id, message.id)
                }
                SyncEvent::ConversationListUpdated(snapshot) => {
                    format!("list:v{}", snapshot.version())
                }
                SyncEvent::PollFailed {
                    kind,
                    attempt,
                    will_retry,
                    ..
                } => format!("failed:{}:{}:{}", kind, attempt, will_retry),
                SyncEvent::PollRecovered => "recovered".to_string(),
            };
            log_clone.lock().push(label);
            Ok(())
        });
        (log, sub)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_is_immediate_and_start_is_idempotent() {
        let h = harness(SyncConfig::default());
        let t0 = Instant::now();

        assert!(h.poller.start());
        assert!(!h.poller.start());
        h.api.wait_for_calls(1).await;

        assert_eq!(h.api.calls(), vec![t0]);
        assert!(h.poller.is_running());
        assert_eq!(h.api.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_follows_activity_state() {
        let h = harness(SyncConfig::default());
        h.convo.set("c1").unwrap();
        h.poller.start();

        h.api.wait_for_calls(3).await;
        assert_eq!(gaps(&h.api.calls()), vec![secs(4), secs(4)]);
        assert_eq!(h.poller.cycle().interval, Some(secs(4)));

        h.convo.clear();
        h.app.set_list_visible(true);
        h.api.wait_for_calls(5).await;
        assert_eq!(gaps(&h.api.calls())[2..], [secs(30), secs(30)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_to_list_uses_list_interval_only() {
        let h = harness(SyncConfig::default());
        h.convo.set("convoA").unwrap();
        h.poller.start();
        h.api.wait_for_calls(1).await;
        let t0 = h.api.calls()[0];

        tokio::time::sleep(secs(1)).await;
        h.convo.clear();
        h.app.set_list_visible(true);

        h.api.wait_for_calls(2).await;
        assert_eq!(h.api.calls()[1] - t0, secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backgrounding_switches_interval_within_one_cycle() {
        let h = harness(SyncConfig::default());
        h.convo.set("c1").unwrap();
        h.poller.start();
        h.api.wait_for_calls(1).await;
        let t0 = h.api.calls()[0];

        tokio::time::sleep(secs(2)).await;
        h.app.set_foreground(false);

        h.api.wait_for_calls(3).await;
        let calls = h.api.calls();
        assert_eq!(calls[1] - t0, secs(60));
        assert_eq!(calls[2] - calls[1], secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_poll_fires_on_activity_change() {
        let h = harness(SyncConfig::default());
        h.app.set_foreground(false);
        h.poller.start();
        h.api.wait_for_calls(1).await;
        let t0 = h.api.calls()[0];

        tokio::time::sleep(secs(10)).await;
        h.app.set_foreground(true);
        h.convo.set("c1").unwrap();

        h.api.wait_for_calls(2).await;
        assert_eq!(h.api.calls()[1] - t0, secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_suspends_until_surface_visible() {
        let config = SyncConfig::default().with_background_interval(secs(70));
        let h = harness(config);
        let t0 = Instant::now();
        h.poller.start();

        // Polls at 0, 70, 140, 210, 280; idle from 300
        tokio::time::sleep_until(t0 + secs(1000)).await;
        assert_eq!(h.api.call_count(), 5);
        assert_eq!(h.poller.phase(), PollPhase::Suspended);
        assert_eq!(h.poller.cycle().interval, None);

        h.app.set_list_visible(true);
        h.api.wait_for_calls(6).await;
        assert_eq!(h.api.calls()[5] - t0, secs(1000));

        h.api.wait_for_calls(7).await;
        assert_eq!(h.api.calls()[6] - h.api.calls()[5], secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backgrounding_while_idle_waits_full_interval() {
        let config = SyncConfig::default().with_background_interval(secs(70));
        let h = harness(config);
        let t0 = Instant::now();
        h.poller.start();

        tokio::time::sleep_until(t0 + secs(1000)).await;
        assert_eq!(h.api.call_count(), 5);
        assert_eq!(h.poller.phase(), PollPhase::Suspended);

        h.app.set_foreground(false);
        tokio::time::sleep(secs(1)).await;
        assert_eq!(h.api.call_count(), 5);
        assert_eq!(h.poller.phase(), PollPhase::Scheduled);
        assert_eq!(h.poller.cycle().interval, Some(secs(70)));

        h.api.wait_for_calls(6).await;
        assert_eq!(h.api.calls()[5] - t0, secs(1070));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_scenario() {
        let h = harness(SyncConfig::default());
        h.convo.set("c1").unwrap();
        let (events, _sub) = record_events(&h.bus);

        h.api.push_err(network_error());
        h.api.push_err(network_error());
        h.api.push_err(network_error());
        h.api.set_fallback(Ok(page(vec![conversation("c1", "bob", "m1", 0)])));
        h.poller.start();

        h.api.wait_for_calls(5).await;
        assert_eq!(gaps(&h.api.calls()), vec![secs(4), secs(8), secs(16), secs(4)]);
        assert_eq!(
            *events.lock(),
            vec![
                "failed:network:1:true",
                "failed:network:2:true",
                "failed:network:3:true",
                "recovered",
                "list:v1",
            ]
        );
        assert_eq!(h.poller.cycle().attempt, 0);
        assert!(h.poller.cycle().last_success_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped() {
        let config = SyncConfig::default().with_max_interval(secs(10));
        let h = harness(config);
        h.convo.set("c1").unwrap();
        h.api.set_fallback(Err(network_error()));
        h.poller.start();

        h.api.wait_for_calls(5).await;
        assert_eq!(gaps(&h.api.calls()), vec![secs(4), secs(8), secs(10), secs(10)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_poll_while_in_flight_is_coalesced() {
        let h = harness(SyncConfig::default());
        h.convo.set("c1").unwrap();
        let release = h.api.push_held(Ok(page(Vec::new())));
        h.poller.start();
        h.api.wait_for_calls(1).await;

        assert!(h.poller.is_in_flight());
        assert!(!h.poller.force_poll());
        assert!(!h.poller.force_poll());

        tokio::time::sleep(secs(20)).await;
        assert_eq!(h.api.call_count(), 1);

        let released_at = Instant::now();
        release.send(()).unwrap();
        h.api.wait_for_calls(2).await;

        assert_eq!(h.api.calls()[1] - released_at, secs(4));
        assert_eq!(h.api.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_poll_short_circuits_wait() {
        let h = harness(SyncConfig::default());
        h.app.set_list_visible(true);
        h.poller.start();
        h.api.wait_for_calls(1).await;

        tokio::time::sleep(secs(5)).await;
        assert_eq!(h.poller.phase(), PollPhase::Scheduled);
        assert!(h.poller.force_poll());
        h.api.wait_for_calls(2).await;

        // The following cycle still uses the regular interval
        h.api.wait_for_calls(3).await;
        let calls = h.api.calls();
        assert_eq!(calls[1] - calls[0], secs(5));
        assert_eq!(calls[2] - calls[1], secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconsumed_force_does_not_carry_into_restart() {
        let h = harness(SyncConfig::default());
        h.app.set_list_visible(true);
        h.poller.start();
        h.api.wait_for_calls(1).await;
        tokio::time::sleep(secs(1)).await;

        // Triggered, then stopped before the task could act on it
        assert!(h.poller.force_poll());
        h.poller.stop();

        let restarted_at = Instant::now();
        assert!(h.poller.start());
        h.api.wait_for_calls(2).await;
        assert_eq!(h.api.calls()[1], restarted_at);

        tokio::time::sleep(secs(10)).await;
        assert_eq!(h.api.call_count(), 2);

        h.api.wait_for_calls(3).await;
        assert_eq!(h.api.calls()[2] - restarted_at, secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_poll_requires_running_poller() {
        let h = harness(SyncConfig::default());
        assert!(!h.poller.force_poll());
        tokio::time::sleep(secs(1)).await;
        assert_eq!(h.api.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_result_after_stop_is_discarded() {
        let h = harness(SyncConfig::default());
        let release = h.api.push_held(Ok(page(vec![conversation("c1", "bob", "m1", 2)])));
        h.poller.start();
        h.api.wait_for_calls(1).await;

        h.poller.stop();
        let _ = release.send(());
        tokio::time::sleep(secs(600)).await;

        assert_eq!(h.store.get_snapshot().version(), 0);
        assert_eq!(h.api.call_count(), 1);
        assert_eq!(h.poller.phase(), PollPhase::Idle);
        assert!(!h.poller.is_running());
        assert!(!h.poller.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_epoch_does_not_touch_store() {
        let h = harness(SyncConfig::default());
        let (events, _sub) = record_events(&h.bus);
        let mut budget = RetryBudget::new();

        let outcome = h.poller.inner.apply_success(7, &mut budget, vec![conversation("c1", "bob", "m1", 1)]);
        assert!(matches!(outcome, CycleOutcome::Stale));

        let outcome = h.poller.inner.apply_failure(7, &mut budget, network_error());
        assert!(matches!(outcome, CycleOutcome::Stale));

        assert_eq!(h.store.get_snapshot().version(), 0);
        assert_eq!(budget.failures(), 0);
        assert!(events.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_timer_and_restart_polls_again() {
        let h = harness(SyncConfig::default());
        h.convo.set("c1").unwrap();
        h.poller.start();
        h.api.wait_for_calls(1).await;

        h.poller.stop();
        h.poller.stop();
        tokio::time::sleep(secs(60)).await;
        assert_eq!(h.api.call_count(), 1);

        assert!(h.poller.start());
        h.api.wait_for_calls(2).await;
        assert_eq!(h.api.calls()[1] - h.api.calls()[0], secs(60));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stop_leaves_poller_idle_while_task_runs_on_other_worker() {
        let h = harness(SyncConfig::default());
        h.convo.set("c1").unwrap();

        for _ in 0..200 {
            assert!(h.poller.start());
            for _ in 0..20 {
                h.poller.force_poll();
                tokio::task::yield_now().await;
            }
            h.poller.stop();
            assert_eq!(h.poller.phase(), PollPhase::Idle);

            tokio::time::sleep(Duration::from_millis(2)).await;
            assert_eq!(h.poller.phase(), PollPhase::Idle);
            assert!(!h.poller.is_in_flight());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_authorization_failure_halts_polling() {
        let mut api = MockChatApi::new();
        api.expect_fetch_conversation_list()
            .times(1)
            .returning(|_| Err(auth_error()));

        let (poller, parts) = harness_with(Arc::new(api), SyncConfig::default());
        parts.convo.set("c1").unwrap();
        let (events, _sub) = record_events(&parts.bus);

        poller.start();
        tokio::time::sleep(secs(600)).await;

        assert_eq!(*events.lock(), vec!["failed:authorization:1:false"]);
        assert_eq!(poller.phase(), PollPhase::Idle);
        assert!(!poller.is_running());
        assert!(!poller.force_poll());
        assert_eq!(poller.fatal_error(), Some(auth_error()));
        assert_eq!(parts.store.get_snapshot().version(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_fatal_failure() {
        let h = harness(SyncConfig::default());
        h.api.push_err(auth_error());
        h.poller.start();
        h.api.wait_for_calls(1).await;

        tokio::time::sleep(secs(300)).await;
        assert_eq!(h.api.call_count(), 1);
        assert!(h.poller.fatal_error().is_some());

        assert!(h.poller.start());
        assert!(h.poller.fatal_error().is_none());
        h.api.wait_for_calls(2).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_and_message_events() {
        let h = harness(SyncConfig::default());
        h.app.set_list_visible(true);
        let (events, _sub) = record_events(&h.bus);

        let own = Conversation::new("c2", Vec::new()).with_message(MessageSummary::new(
            "m9",
            "sent from another device",
            SELF_DID,
            base_time(),
        ));

        h.api.push_ok(page(vec![conversation("c1", "bob", "m1", 0)]));
        h.api.push_ok(page(vec![conversation("c1", "bob", "m1", 0)]));
        h.api.push_ok(page(vec![conversation("c1", "bob", "m2", 1), own]));
        h.poller.start();

        h.api.wait_for_calls(3).await;
        tokio::task::yield_now().await;
        assert_eq!(*events.lock(), vec!["list:v1", "list:v2", "message:c1:m2"]);

        let snapshot = h.store.get_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.total_unread(true), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pages_are_fetched_sequentially() {
        let h = harness(SyncConfig::default().with_max_pages_per_poll(3));
        h.api.push_ok(ConversationPage {
            conversations: vec![conversation("c1", "bob", "m2", 0)],
            cursor: Some("page2".into()),
        });
        h.api.push_ok(page(vec![conversation("c2", "carol", "m1", 0)]));
        h.poller.start();

        h.api.wait_for_calls(2).await;
        tokio::task::yield_now().await;

        assert_eq!(h.api.cursors(), vec![None, Some("page2".to_string())]);
        assert_eq!(h.api.max_in_flight(), 1);
        let snapshot = h.store.get_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.get("c2").is_some());
    }
}
