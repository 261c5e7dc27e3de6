//! Errors surfaced by the sync engine

use chat_client::ChatApiError;

/// Sync engine errors
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A conversation is already open; it must be cleared first
    #[error("Conversation {current} is still open; clear it before opening {requested}")]
    CurrentConvoConflict {
        /// Conversation currently tracked
        current: String,
        /// Conversation that was requested
        requested: String,
    },

    /// Message too long
    #[error("Message too long: {length} exceeds maximum {max}")]
    MessageTooLong {
        /// Actual message length
        length: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Remote API error
    #[error("Chat API error: {0}")]
    Api(#[from] ChatApiError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration could not be read
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for sync engine operations
pub type Result<T> = std::result::Result<T, SyncError>;
