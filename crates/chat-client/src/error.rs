//! Errors returned by the chat service client

use thiserror::Error;

/// How a request failed before the server produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The connection could not be established
    Connect,
    /// The request did not complete within the configured timeout
    Timeout,
    /// Any other failure while sending the request or reading the body
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Other => "other",
        };
        f.write_str(label)
    }
}

/// Errors that can occur while talking to the chat service
///
/// Every variant carries owned strings so the error can be cloned into
/// sync events and kept around for the session layer.
///
/// # Examples
/// ```
/// use chat_client::ChatApiError;
///
/// let error = ChatApiError::xrpc(401, "ExpiredToken", "Token has expired");
/// assert_eq!(error.status(), Some(401));
/// assert_eq!(error.error_code(), Some("ExpiredToken"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatApiError {
    /// The request never produced an HTTP response
    #[error("Transport error ({kind}): {message}")]
    Transport {
        /// Failure category
        kind: TransportErrorKind,
        /// Underlying error message
        message: String,
    },

    /// The server answered with a non-success status
    #[error("XRPC error {status}: {error} - {message}")]
    Xrpc {
        /// HTTP status code
        status: u16,
        /// XRPC error code (e.g. "InvalidToken")
        error: String,
        /// Human-readable error message
        message: String,
    },

    /// The response body could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ChatApiError {
    /// Create an error for a non-success XRPC response
    pub fn xrpc(status: u16, error: impl Into<String>, message: impl Into<String>) -> Self {
        ChatApiError::Xrpc {
            status,
            error: error.into(),
            message: message.into(),
        }
    }

    /// Create a transport-level error
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        ChatApiError::Transport {
            kind,
            message: message.into(),
        }
    }

    /// HTTP status code, when the server responded
    pub fn status(&self) -> Option<u16> {
        match self {
            ChatApiError::Xrpc { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// XRPC error code, when the server provided one
    pub fn error_code(&self) -> Option<&str> {
        match self {
            ChatApiError::Xrpc { error, .. } => Some(error.as_str()),
            _ => None,
        }
    }

    /// Map a `reqwest` send failure onto a transport error
    pub(crate) fn from_reqwest(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        ChatApiError::transport(kind, format!("Request failed: {}", err))
    }
}

/// Result type for chat service operations
pub type Result<T> = std::result::Result<T, ChatApiError>;
