//! dm-sync
//!
//! Conversation sync engine for direct messages. The heavy lifting lives in
//! two crates re-exported here:
//! - [`chat_client`]: XRPC transport and the [`ChatApi`] interface
//! - [`sync_state`]: the poller, event bus, trackers and stores

pub use chat_client::{self, ChatApi, ChatApiError, XrpcChatApi, XrpcClient, XrpcClientConfig};
pub use sync_state::{self, SyncConfig, SyncError, SyncEvent, SyncSession};
