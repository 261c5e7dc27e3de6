//! Sync engine configuration
//!
//! Durations are written in milliseconds when (de)serialized:
//!
//! ```json
//! { "active_interval_ms": 4000, "list_interval_ms": 30000 }
//! ```
//!
//! Missing fields fall back to the defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Poll interval while a conversation is open
pub const DEFAULT_ACTIVE_INTERVAL: Duration = Duration::from_secs(4);

/// Poll interval while the conversation list is visible
pub const DEFAULT_LIST_INTERVAL: Duration = Duration::from_secs(30);

/// Poll interval while no messaging surface is in view
pub const DEFAULT_BACKGROUND_INTERVAL: Duration = Duration::from_secs(60);

/// Time without a messaging surface after which polling is suspended
pub const DEFAULT_INACTIVITY_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Ceiling for backed-off intervals
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Configuration for the poller and its collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base interval in the `Active` state
    #[serde(rename = "active_interval_ms", with = "millis")]
    pub active_interval: Duration,
    /// Base interval in the `ListVisible` state
    #[serde(rename = "list_interval_ms", with = "millis")]
    pub list_interval: Duration,
    /// Base interval in the `Background` state
    #[serde(rename = "background_interval_ms", with = "millis")]
    pub background_interval: Duration,
    /// Time without a messaging surface before the `Idle` state
    #[serde(rename = "inactivity_threshold_ms", with = "millis")]
    pub inactivity_threshold: Duration,
    /// Growth factor applied per consecutive retryable failure
    pub backoff_multiplier: f64,
    /// Ceiling for backed-off intervals
    #[serde(rename = "max_interval_ms", with = "millis")]
    pub max_interval: Duration,
    /// Pages fetched per poll cycle, following the cursor
    pub max_pages_per_poll: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            active_interval: DEFAULT_ACTIVE_INTERVAL,
            list_interval: DEFAULT_LIST_INTERVAL,
            background_interval: DEFAULT_BACKGROUND_INTERVAL,
            inactivity_threshold: DEFAULT_INACTIVITY_THRESHOLD,
            backoff_multiplier: 2.0,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_pages_per_poll: 1,
        }
    }
}

impl SyncConfig {
    /// Set the `Active` base interval
    pub fn with_active_interval(mut self, interval: Duration) -> Self {
        self.active_interval = interval;
        self
    }

    /// Set the `ListVisible` base interval
    pub fn with_list_interval(mut self, interval: Duration) -> Self {
        self.list_interval = interval;
        self
    }

    /// Set the `Background` base interval
    pub fn with_background_interval(mut self, interval: Duration) -> Self {
        self.background_interval = interval;
        self
    }

    /// Set the inactivity threshold
    pub fn with_inactivity_threshold(mut self, threshold: Duration) -> Self {
        self.inactivity_threshold = threshold;
        self
    }

    /// Set the backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the backoff ceiling
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set how many pages one poll may fetch
    pub fn with_max_pages_per_poll(mut self, pages: usize) -> Self {
        self.max_pages_per_poll = pages;
        self
    }

    /// Parse a configuration from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&contents)
    }

    /// Check that the values describe a usable schedule
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("active_interval", self.active_interval),
            ("list_interval", self.list_interval),
            ("background_interval", self.background_interval),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(SyncError::Config(format!("{} must be non-zero", name)));
            }
            if interval > self.max_interval {
                return Err(SyncError::Config(format!(
                    "{} ({:?}) exceeds max_interval ({:?})",
                    name, interval, self.max_interval
                )));
            }
        }
        if !(self.backoff_multiplier >= 1.0 && self.backoff_multiplier.is_finite()) {
            return Err(SyncError::Config(format!(
                "backoff_multiplier must be a finite value >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_pages_per_poll == 0 {
            return Err(SyncError::Config("max_pages_per_poll must be at least 1".to_string()));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
