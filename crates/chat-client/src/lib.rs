//! Chat service client for direct-message sync
//!
//! This crate provides the XRPC transport, the conversation data types and
//! the narrow [`ChatApi`] interface the sync engine polls through.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod error;
pub mod types;
pub mod xrpc;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use api::{ChatApi, XrpcChatApi};
pub use error::{ChatApiError, Result, TransportErrorKind};
pub use types::{
    ChatMember, Conversation, ConversationPage, MessageSummary, SendAck, MAX_MESSAGE_LENGTH,
};
pub use xrpc::{XrpcClient, XrpcClientConfig};

#[cfg(any(test, feature = "test-utils"))]
pub use api::MockChatApi;
