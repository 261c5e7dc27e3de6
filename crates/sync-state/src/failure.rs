//! Failure classification and retry budget
//!
//! A failed poll is classified once; retryable failures grow the next
//! interval through [`RetryBudget`], fatal ones halt the poller until it is
//! restarted (typically after re-authentication).

use chat_client::{ChatApiError, TransportErrorKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Statuses treated as network-level failures.
///
/// `1` is the status the XRPC stack reports for a request that never
/// reached the server.
const NETWORK_STATUSES: [u16; 3] = [1, 408, 425];

/// XRPC error codes that mean the session is no longer valid
const AUTH_ERROR_CODES: [&str; 4] = ["ExpiredToken", "InvalidToken", "AuthMissing", "AuthRequired"];

/// Category of a failed poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Connection failures, timeouts, "too early"
    NetworkTransient,
    /// 5xx responses, including edge gateway timeouts
    ServerTransient,
    /// 429 responses
    RateLimited,
    /// The session must be re-authenticated
    Authorization,
    /// Anything unrecognized
    Unknown,
}

/// Whether a failure is retried automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureClass {
    /// Retried at the next (backed-off) scheduled poll
    Retryable,
    /// Stops polling until the engine is restarted
    Fatal,
}

impl FailureKind {
    /// Retry class of this kind
    ///
    /// `Unknown` is fatal so an unexpected error can never turn into a
    /// silent infinite retry loop.
    pub fn class(self) -> FailureClass {
        match self {
            FailureKind::NetworkTransient
            | FailureKind::ServerTransient
            | FailureKind::RateLimited => FailureClass::Retryable,
            FailureKind::Authorization | FailureKind::Unknown => FailureClass::Fatal,
        }
    }

    /// Shorthand for `class() == Retryable`
    pub fn is_retryable(self) -> bool {
        self.class() == FailureClass::Retryable
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureKind::NetworkTransient => "network",
            FailureKind::ServerTransient => "server",
            FailureKind::RateLimited => "rate-limited",
            FailureKind::Authorization => "authorization",
            FailureKind::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Classify a failed fetch
///
/// # Examples
/// ```
/// use chat_client::ChatApiError;
/// use sync_state::failure::{classify, FailureKind};
///
/// assert_eq!(classify(&ChatApiError::xrpc(503, "Unavailable", "")), FailureKind::ServerTransient);
/// assert_eq!(classify(&ChatApiError::xrpc(403, "Forbidden", "")), FailureKind::Authorization);
/// ```
pub fn classify(error: &ChatApiError) -> FailureKind {
    match error {
        ChatApiError::Transport { kind, .. } => match kind {
            TransportErrorKind::Connect
            | TransportErrorKind::Timeout
            | TransportErrorKind::Other => FailureKind::NetworkTransient,
        },
        ChatApiError::Xrpc { status, error, .. } => classify_status(*status, error),
        ChatApiError::Decode(_) | ChatApiError::InvalidRequest(_) => FailureKind::Unknown,
    }
}

fn classify_status(status: u16, error_code: &str) -> FailureKind {
    if AUTH_ERROR_CODES.contains(&error_code) {
        return FailureKind::Authorization;
    }
    match status {
        s if NETWORK_STATUSES.contains(&s) => FailureKind::NetworkTransient,
        429 => FailureKind::RateLimited,
        500..=599 => FailureKind::ServerTransient,
        401 | 403 => FailureKind::Authorization,
        _ => FailureKind::Unknown,
    }
}

/// Consecutive retryable failures in the current streak
///
/// Only grows within a streak; [`RetryBudget::reset`] is the single way
/// back to zero and is called on the first success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryBudget {
    failures: u32,
}

impl RetryBudget {
    /// Fresh budget with no failures recorded
    pub fn new() -> Self {
        Self::default()
    }

    /// Failures in the current streak
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether a failure streak is in progress
    pub fn in_streak(&self) -> bool {
        self.failures > 0
    }

    /// Record a retryable failure, returning the new streak length
    pub fn record_failure(&mut self) -> u32 {
        self.failures = self.failures.saturating_add(1);
        self.failures
    }

    /// End the streak
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Apply this budget's backoff to `base`
    ///
    /// The first failure of a streak retries at the base interval; each
    /// further failure multiplies it by `multiplier`, capped at `max`.
    pub fn backoff(&self, base: Duration, multiplier: f64, max: Duration) -> Duration {
        if self.failures <= 1 {
            return base.min(max);
        }
        let exponent = (self.failures - 1).min(i32::MAX as u32) as i32;
        let scaled = base.as_secs_f64() * multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= max.as_secs_f64() {
            max
        } else {
            Duration::from_secs_f64(scaled)
        }
    }
}
