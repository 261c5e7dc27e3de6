//! The remote chat API consumed by the sync engine
//!
//! The engine only needs two calls: a paginated conversation-list fetch used
//! for polling, and a send used by the compose surface. [`ChatApi`] is the seam
//! between the engine and the network; [`XrpcChatApi`] implements it over XRPC.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{ChatApiError, Result};
use crate::types::{
    Conversation, ConversationPage, ListConvosOutput, MessageInput, SendAck, SendMessageInput,
    MAX_MESSAGE_LENGTH,
};
use crate::xrpc::{XrpcClient, XrpcClientConfig, XrpcRequest};

/// NSID of the conversation list endpoint
pub const LIST_CONVOS: &str = "chat.bsky.convo.listConvos";

/// NSID of the send endpoint
pub const SEND_MESSAGE: &str = "chat.bsky.convo.sendMessage";

/// Remote chat service
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Fetch one page of the conversation list, starting at `cursor`
    async fn fetch_conversation_list(&self, cursor: Option<String>) -> Result<ConversationPage>;

    /// Send a text message to a conversation
    async fn send_message(&self, convo_id: &str, text: &str) -> Result<SendAck>;
}

/// [`ChatApi`] over XRPC
///
/// # Example
///
/// ```rust,no_run
/// use chat_client::{ChatApi, XrpcChatApi, XrpcClientConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = XrpcClientConfig::new("https://bsky.social").with_access_token("jwt");
///     let api = XrpcChatApi::new(config);
///
///     let page = api.fetch_conversation_list(None).await?;
///     println!("Found {} conversations", page.conversations.len());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct XrpcChatApi {
    client: XrpcClient,
    page_size: u32,
}

impl XrpcChatApi {
    /// Create a client with the default page size
    pub fn new(config: XrpcClientConfig) -> Self {
        Self {
            client: XrpcClient::new(config),
            page_size: 50,
        }
    }

    /// Set how many conversations one page holds (1-100)
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, 100);
        self
    }

    /// Underlying XRPC client
    pub fn client(&self) -> &XrpcClient {
        &self.client
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentMessageView {
    id: String,
    sent_at: DateTime<Utc>,
}

#[async_trait]
impl ChatApi for XrpcChatApi {
    async fn fetch_conversation_list(&self, cursor: Option<String>) -> Result<ConversationPage> {
        let mut request = XrpcRequest::query(LIST_CONVOS).param("limit", self.page_size.to_string());
        if let Some(cursor) = cursor {
            request = request.param("cursor", cursor);
        }

        let response = self.client.call::<ListConvosOutput>(request).await?;

        let page = ConversationPage {
            conversations: response.data.convos.into_iter().map(Conversation::from).collect(),
            cursor: response.data.cursor,
        };
        tracing::debug!(
            conversations = page.conversations.len(),
            has_more = page.cursor.is_some(),
            "fetched conversation page"
        );
        Ok(page)
    }

    async fn send_message(&self, convo_id: &str, text: &str) -> Result<SendAck> {
        let length = text.chars().count();
        if length > MAX_MESSAGE_LENGTH {
            return Err(ChatApiError::InvalidRequest(format!(
                "Message too long: {} exceeds maximum {}",
                length, MAX_MESSAGE_LENGTH
            )));
        }

        let input = SendMessageInput {
            convo_id: convo_id.to_string(),
            message: MessageInput {
                text: text.to_string(),
            },
        };
        let request = XrpcRequest::procedure(SEND_MESSAGE).json_body(&input)?;

        let response = self.client.call::<SentMessageView>(request).await?;

        Ok(SendAck {
            message_id: response.data.id,
            sent_at: response.data.sent_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_clamped() {
        let api = XrpcChatApi::new(XrpcClientConfig::default()).with_page_size(500);
        assert_eq!(api.page_size, 100);

        let api = XrpcChatApi::new(XrpcClientConfig::default()).with_page_size(0);
        assert_eq!(api.page_size, 1);
    }

    #[tokio::test]
    async fn test_send_rejects_oversized_text_without_network() {
        // Unroutable address: the length check must fail first
        let api = XrpcChatApi::new(XrpcClientConfig::new("http://127.0.0.1:9"));
        let text = "a".repeat(MAX_MESSAGE_LENGTH + 1);

        let err = api.send_message("convo1", &text).await.unwrap_err();
        assert!(matches!(err, ChatApiError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_mock_chat_api_returns_scripted_page() {
        let mut mock = MockChatApi::new();
        mock.expect_fetch_conversation_list()
            .times(1)
            .returning(|_| Ok(ConversationPage::default()));

        let page = mock.fetch_conversation_list(None).await.unwrap();
        assert!(page.conversations.is_empty());
    }
}
