//! App lifecycle and conversation focus tracking
//!
//! Two observers feed the poller's cadence decision:
//! - [`AppActivityTracker`] follows the host platform's foreground flag and
//!   whether the conversation list is on screen.
//! - [`CurrentConvoTracker`] holds the conversation the user has navigated
//!   into, if any.
//!
//! [`ActivityMonitor`] combines both into a single [`ActivityState`]. The
//! derivation is total: every combination of inputs yields exactly one state.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

/// What messaging surface the user is looking at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActivityState {
    /// A specific conversation is open
    Active(String),
    /// The conversation list is open, no conversation selected
    ListVisible,
    /// App not foregrounded, or no messaging surface shown yet for less than
    /// the inactivity threshold
    Background,
    /// Foregrounded with no messaging surface for at least the inactivity
    /// threshold; polling is suspended
    Idle,
}

impl ActivityState {
    /// Base poll interval for this state, `None` when polling is suspended
    pub fn base_interval(&self, config: &SyncConfig) -> Option<Duration> {
        match self {
            ActivityState::Active(_) => Some(config.active_interval),
            ActivityState::ListVisible => Some(config.list_interval),
            ActivityState::Background => Some(config.background_interval),
            ActivityState::Idle => None,
        }
    }

    /// Conversation open in this state
    pub fn convo_id(&self) -> Option<&str> {
        match self {
            ActivityState::Active(id) => Some(id),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityState::Active(id) => write!(f, "active({})", id),
            ActivityState::ListVisible => f.write_str("list-visible"),
            ActivityState::Background => f.write_str("background"),
            ActivityState::Idle => f.write_str("idle"),
        }
    }
}

/// Snapshot of the app lifecycle signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppActivity {
    /// Whether the app is foregrounded
    pub foreground: bool,
    /// Whether the conversation list surface is on screen
    pub list_visible: bool,
    /// When either flag last changed
    pub changed_at: Instant,
}

/// Observable foreground / list-visibility state
///
/// Starts foregrounded with no messaging surface visible.
pub struct AppActivityTracker {
    tx: watch::Sender<AppActivity>,
}

impl AppActivityTracker {
    /// Create a tracker for a foregrounded app
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AppActivity {
            foreground: true,
            list_visible: false,
            changed_at: Instant::now(),
        });
        Self { tx }
    }

    /// Current signals
    pub fn get(&self) -> AppActivity {
        *self.tx.borrow()
    }

    /// Whether the app is foregrounded
    pub fn is_foreground(&self) -> bool {
        self.tx.borrow().foreground
    }

    /// Feed the platform's foreground flag
    pub fn set_foreground(&self, foreground: bool) {
        let changed = self.tx.send_if_modified(|activity| {
            if activity.foreground == foreground {
                return false;
            }
            activity.foreground = foreground;
            activity.changed_at = Instant::now();
            true
        });
        if changed {
            tracing::debug!(foreground, "app lifecycle changed");
        }
    }

    /// Feed the router's "conversation list shown / hidden" signal
    pub fn set_list_visible(&self, visible: bool) {
        self.tx.send_if_modified(|activity| {
            if activity.list_visible == visible {
                return false;
            }
            activity.list_visible = visible;
            activity.changed_at = Instant::now();
            true
        });
    }

    /// Subscribe to changes
    pub fn subscribe(&self) -> watch::Receiver<AppActivity> {
        self.tx.subscribe()
    }
}

impl Default for AppActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Conversation focus value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvoFocus {
    /// Conversation open in the UI
    pub convo_id: Option<String>,
    /// When the focus last changed
    pub changed_at: Instant,
}

/// Holds the conversation currently open in the UI
///
/// Leaving a conversation screen must [`clear`](Self::clear) the tracker
/// before another conversation can be [`set`](Self::set); a `set` over a
/// different conversation is rejected so a forgotten clear cannot keep the
/// poller at the high-frequency cadence for a screen the user has left.
pub struct CurrentConvoTracker {
    tx: watch::Sender<ConvoFocus>,
}

impl CurrentConvoTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConvoFocus {
            convo_id: None,
            changed_at: Instant::now(),
        });
        Self { tx }
    }

    /// Conversation currently open
    pub fn get(&self) -> Option<String> {
        self.tx.borrow().convo_id.clone()
    }

    /// Whether `convo_id` is the conversation currently open
    pub fn is_current(&self, convo_id: &str) -> bool {
        self.tx.borrow().convo_id.as_deref() == Some(convo_id)
    }

    /// Record that the user navigated into `convo_id`
    ///
    /// Setting the conversation that is already open is a no-op.
    pub fn set(&self, convo_id: impl Into<String>) -> Result<()> {
        let requested = convo_id.into();
        let mut conflict = None;

        self.tx.send_if_modified(|focus| {
            if let Some(current) = &focus.convo_id {
                if *current != requested {
                    conflict = Some(current.clone());
                }
                return false;
            }
            focus.convo_id = Some(requested.clone());
            focus.changed_at = Instant::now();
            true
        });

        match conflict {
            Some(current) => {
                tracing::warn!(%current, %requested, "conversation opened without clearing the previous one");
                Err(SyncError::CurrentConvoConflict { current, requested })
            }
            None => Ok(()),
        }
    }

    /// Record that the user left the conversation screen
    pub fn clear(&self) {
        self.tx.send_if_modified(|focus| {
            if focus.convo_id.is_none() {
                return false;
            }
            focus.convo_id = None;
            focus.changed_at = Instant::now();
            true
        });
    }

    /// Set or clear in one call, mirroring the navigation signal
    pub fn set_current(&self, convo_id: Option<String>) -> Result<()> {
        match convo_id {
            Some(id) => self.set(id),
            None => {
                self.clear();
                Ok(())
            }
        }
    }

    /// Current focus value
    pub fn focus(&self) -> ConvoFocus {
        self.tx.borrow().clone()
    }

    /// Subscribe to changes
    pub fn subscribe(&self) -> watch::Receiver<ConvoFocus> {
        self.tx.subscribe()
    }
}

impl Default for CurrentConvoTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive the activity state from the two observers' values
pub fn derive_state(
    app: &AppActivity,
    focus: &ConvoFocus,
    now: Instant,
    inactivity_threshold: Duration,
) -> ActivityState {
    if !app.foreground {
        return ActivityState::Background;
    }
    if let Some(id) = &focus.convo_id {
        return ActivityState::Active(id.clone());
    }
    if app.list_visible {
        return ActivityState::ListVisible;
    }
    let hidden_since = app.changed_at.max(focus.changed_at);
    if now.saturating_duration_since(hidden_since) >= inactivity_threshold {
        ActivityState::Idle
    } else {
        ActivityState::Background
    }
}

/// Combined read side of both trackers
#[derive(Clone)]
pub struct ActivityMonitor {
    app: Arc<AppActivityTracker>,
    convo: Arc<CurrentConvoTracker>,
    inactivity_threshold: Duration,
    last_state: Arc<Mutex<Option<ActivityState>>>,
}

impl ActivityMonitor {
    /// Create a monitor over both trackers
    pub fn new(
        app: Arc<AppActivityTracker>,
        convo: Arc<CurrentConvoTracker>,
        inactivity_threshold: Duration,
    ) -> Self {
        Self {
            app,
            convo,
            inactivity_threshold,
            last_state: Arc::new(Mutex::new(None)),
        }
    }

    /// State at this instant
    pub fn current_state(&self) -> ActivityState {
        let state = derive_state(
            &self.app.get(),
            &self.convo.focus(),
            Instant::now(),
            self.inactivity_threshold,
        );

        let mut last = self.last_state.lock();
        if last.as_ref() != Some(&state) {
            tracing::debug!(from = ?last.as_ref().map(|s| s.to_string()), to = %state, "activity state changed");
            *last = Some(state.clone());
        }
        state
    }

    /// Instant at which the state will become `Idle` if nothing changes
    ///
    /// `None` unless the app is foregrounded with no messaging surface.
    pub fn idle_deadline(&self) -> Option<Instant> {
        let app = self.app.get();
        let focus = self.convo.focus();
        if !app.foreground || app.list_visible || focus.convo_id.is_some() {
            return None;
        }
        Some(app.changed_at.max(focus.changed_at) + self.inactivity_threshold)
    }

    /// Subscribe to changes of either tracker
    pub fn watch(&self) -> ActivityWatch {
        ActivityWatch {
            app: self.app.subscribe(),
            convo: self.convo.subscribe(),
        }
    }
}

/// Change notification over both trackers
pub struct ActivityWatch {
    app: watch::Receiver<AppActivity>,
    convo: watch::Receiver<ConvoFocus>,
}

impl ActivityWatch {
    /// Wait until either tracker changes
    pub async fn changed(&mut self) {
        tokio::select! {
            res = self.app.changed() => {
                if res.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            res = self.convo.changed() => {
                if res.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    /// Mark the current values as seen
    pub fn mark_seen(&mut self) {
        self.app.borrow_and_update();
        self.convo.borrow_and_update();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: Duration = Duration::from_secs(300);

    fn app(foreground: bool, list_visible: bool, changed_at: Instant) -> AppActivity {
        AppActivity {
            foreground,
            list_visible,
            changed_at,
        }
    }

    fn focus(convo_id: Option<&str>, changed_at: Instant) -> ConvoFocus {
        ConvoFocus {
            convo_id: convo_id.map(str::to_string),
            changed_at,
        }
    }

    #[test]
    fn test_derive_state_is_total() {
        let now = Instant::now() + Duration::from_secs(600);
        let long_ago = now - Duration::from_secs(600);

        for foreground in [false, true] {
            for list_visible in [false, true] {
                for convo in [None, Some("c1")] {
                    for since in [now, long_ago] {
                        let state = derive_state(
                            &app(foreground, list_visible, since),
                            &focus(convo, since),
                            now,
                            THRESHOLD,
                        );
                        let expected = match (foreground, convo, list_visible) {
                            (false, _, _) => ActivityState::Background,
                            (true, Some(id), _) => ActivityState::Active(id.to_string()),
                            (true, None, true) => ActivityState::ListVisible,
                            (true, None, false) if since == long_ago => ActivityState::Idle,
                            (true, None, false) => ActivityState::Background,
                        };
                        assert_eq!(state, expected);
                    }
                }
            }
        }
    }

    #[test]
    fn test_base_interval_table() {
        let config = SyncConfig::default();
        assert_eq!(
            ActivityState::Active("c1".into()).base_interval(&config),
            Some(Duration::from_secs(4))
        );
        assert_eq!(ActivityState::ListVisible.base_interval(&config), Some(Duration::from_secs(30)));
        assert_eq!(ActivityState::Background.base_interval(&config), Some(Duration::from_secs(60)));
        assert_eq!(ActivityState::Idle.base_interval(&config), None);
    }

    #[test]
    fn test_current_convo_must_be_cleared_before_switching() {
        let tracker = CurrentConvoTracker::new();
        assert_eq!(tracker.get(), None);

        tracker.set("convoA").unwrap();
        // Re-setting the same conversation is fine
        tracker.set("convoA").unwrap();

        let err = tracker.set("convoB").unwrap_err();
        assert!(matches!(err, SyncError::CurrentConvoConflict { .. }));
        assert_eq!(tracker.get().as_deref(), Some("convoA"));

        tracker.clear();
        tracker.set("convoB").unwrap();
        assert!(tracker.is_current("convoB"));

        tracker.set_current(None).unwrap();
        assert_eq!(tracker.get(), None);
    }

    #[tokio::test]
    async fn test_tracker_subscription_sees_changes() {
        let tracker = AppActivityTracker::new();
        let mut rx = tracker.subscribe();
        assert!(rx.borrow().foreground);

        tracker.set_foreground(false);
        rx.changed().await.unwrap();
        assert!(!rx.borrow().foreground);

        // No-op update does not notify
        tracker.set_foreground(false);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_goes_idle_after_threshold() {
        let app = Arc::new(AppActivityTracker::new());
        let convo = Arc::new(CurrentConvoTracker::new());
        let monitor = ActivityMonitor::new(app.clone(), convo.clone(), THRESHOLD);

        app.set_list_visible(true);
        assert_eq!(monitor.current_state(), ActivityState::ListVisible);
        assert_eq!(monitor.idle_deadline(), None);

        app.set_list_visible(false);
        assert_eq!(monitor.current_state(), ActivityState::Background);
        let deadline = monitor.idle_deadline().unwrap();

        tokio::time::sleep(THRESHOLD).await;
        assert!(Instant::now() >= deadline);
        assert_eq!(monitor.current_state(), ActivityState::Idle);

        convo.set("c1").unwrap();
        assert_eq!(monitor.current_state(), ActivityState::Active("c1".into()));

        app.set_foreground(false);
        assert_eq!(monitor.current_state(), ActivityState::Background);
    }

    #[tokio::test]
    async fn test_activity_watch_wakes_on_either_tracker() {
        let app = Arc::new(AppActivityTracker::new());
        let convo = Arc::new(CurrentConvoTracker::new());
        let monitor = ActivityMonitor::new(app.clone(), convo.clone(), THRESHOLD);
        let mut watch = monitor.watch();

        convo.set("c1").unwrap();
        watch.changed().await;
        watch.mark_seen();

        app.set_list_visible(true);
        watch.changed().await;
    }
}
