//! Conversation data types
//!
//! Domain types consumed by the sync engine, plus the wire shapes of the
//! `chat.bsky.convo.*` endpoints they are decoded from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum message length (10,000 characters for chat messages)
pub const MAX_MESSAGE_LENGTH: usize = 10_000;

/// A participant in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMember {
    /// DID of the member
    pub did: String,
    /// Handle of the member
    pub handle: String,
    /// Display name of the member
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Avatar URL of the member
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl ChatMember {
    /// Create a member with only the required fields
    pub fn new(did: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            handle: handle.into(),
            display_name: None,
            avatar: None,
        }
    }

    /// Name to show for this member
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.handle)
    }
}

/// Summary of one message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    /// Message ID
    pub id: String,
    /// Message text
    pub text: String,
    /// DID of the sender
    pub sender_did: String,
    /// When the message was sent
    pub sent_at: DateTime<Utc>,
}

impl MessageSummary {
    /// Create a new message summary
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        sender_did: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            sender_did: sender_did.into(),
            sent_at,
        }
    }
}

/// A direct-message conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Opaque conversation identifier
    pub id: String,
    /// Members of the conversation
    pub members: Vec<ChatMember>,
    /// Message summaries, newest first
    #[serde(default)]
    pub messages: Vec<MessageSummary>,
    /// Number of unread messages
    #[serde(default)]
    pub unread_count: u32,
    /// Timestamp of the most recent activity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Whether this conversation is muted
    #[serde(default)]
    pub muted: bool,
}

impl Conversation {
    /// Create an empty conversation
    pub fn new(id: impl Into<String>, members: Vec<ChatMember>) -> Self {
        Self {
            id: id.into(),
            members,
            messages: Vec::new(),
            unread_count: 0,
            last_activity_at: None,
            muted: false,
        }
    }

    /// Prepend a message, moving the activity timestamp forward
    pub fn with_message(mut self, message: MessageSummary) -> Self {
        if self.last_activity_at.map_or(true, |at| at < message.sent_at) {
            self.last_activity_at = Some(message.sent_at);
        }
        self.messages.insert(0, message);
        self
    }

    /// Set the unread count
    pub fn with_unread(mut self, unread_count: u32) -> Self {
        self.unread_count = unread_count;
        self
    }

    /// Most recent message, if any
    pub fn latest_message(&self) -> Option<&MessageSummary> {
        self.messages.first()
    }

    /// Check if this conversation has unread messages
    pub fn has_unread(&self) -> bool {
        self.unread_count > 0
    }

    /// Name of the first member that is not `self_did`
    pub fn other_participant_name(&self, self_did: &str) -> Option<&str> {
        self.members
            .iter()
            .find(|m| m.did != self_did)
            .map(ChatMember::name)
    }
}

/// One page of the conversation list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationPage {
    /// Conversations in server order (last activity descending)
    pub conversations: Vec<Conversation>,
    /// Cursor for the next page
    pub cursor: Option<String>,
}

/// Acknowledgement of a sent message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendAck {
    /// ID of the sent message
    pub message_id: String,
    /// When the server recorded it
    pub sent_at: DateTime<Utc>,
}

// =============================================================================
// Wire types
// =============================================================================

/// `chat.bsky.convo.defs#convoView`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvoView {
    /// Conversation ID
    pub id: String,
    /// Members, including the signed-in account
    #[serde(default)]
    pub members: Vec<ChatMember>,
    /// Newest message, possibly a deleted-message placeholder
    #[serde(default)]
    pub last_message: Option<MessageView>,
    /// Whether the conversation is muted
    #[serde(default)]
    pub muted: bool,
    /// Unread count
    #[serde(default)]
    pub unread_count: u32,
}

/// `chat.bsky.convo.defs#messageView` or `#deletedMessageView`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    /// Message ID
    pub id: String,
    /// Text; absent for deleted messages
    #[serde(default)]
    pub text: Option<String>,
    /// Sender reference
    pub sender: MessageSenderRef,
    /// When the message was sent
    pub sent_at: DateTime<Utc>,
}

/// `chat.bsky.convo.defs#messageViewSender`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSenderRef {
    /// DID of the sender
    pub did: String,
}

/// Output of `chat.bsky.convo.listConvos`
#[derive(Debug, Clone, Deserialize)]
pub struct ListConvosOutput {
    /// Conversations
    pub convos: Vec<ConvoView>,
    /// Cursor for the next page
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Input of `chat.bsky.convo.sendMessage`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageInput {
    /// Conversation ID
    pub convo_id: String,
    /// Message payload
    pub message: MessageInput,
}

/// `chat.bsky.convo.defs#messageInput`
#[derive(Debug, Clone, Serialize)]
pub struct MessageInput {
    /// Message text
    pub text: String,
}

impl From<ConvoView> for Conversation {
    fn from(view: ConvoView) -> Self {
        let mut conversation = Conversation::new(view.id, view.members);
        conversation.muted = view.muted;
        conversation.unread_count = view.unread_count;

        if let Some(last) = view.last_message {
            conversation.last_activity_at = Some(last.sent_at);
            // Deleted messages only move the activity timestamp
            if let Some(text) = last.text {
                conversation
                    .messages
                    .push(MessageSummary::new(last.id, text, last.sender.did, last.sent_at));
            }
        }

        conversation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_member_name_falls_back_to_handle() {
        let mut member = ChatMember::new("did:plc:alice", "alice.bsky.social");
        assert_eq!(member.name(), "alice.bsky.social");

        member.display_name = Some("Alice".to_string());
        assert_eq!(member.name(), "Alice");
    }

    #[test]
    fn test_conversation_with_message_orders_newest_first() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap();

        let convo = Conversation::new("convo1", vec![])
            .with_message(MessageSummary::new("m1", "first", "did:plc:a", t1))
            .with_message(MessageSummary::new("m2", "second", "did:plc:b", t2));

        assert_eq!(convo.latest_message().unwrap().id, "m2");
        assert_eq!(convo.last_activity_at, Some(t2));
        assert_eq!(convo.messages.len(), 2);
    }

    #[test]
    fn test_other_participant_name_skips_self() {
        let convo = Conversation::new(
            "convo1",
            vec![
                ChatMember::new("did:plc:me", "me.bsky.social"),
                ChatMember::new("did:plc:bob", "bob.bsky.social"),
            ],
        );

        assert_eq!(convo.other_participant_name("did:plc:me"), Some("bob.bsky.social"));
        assert!(!convo.has_unread());
    }

    #[test]
    fn test_convo_view_decodes_into_conversation() {
        let json = r#"{
            "id": "3kabc",
            "rev": "22",
            "members": [{"did": "did:plc:bob", "handle": "bob.test", "displayName": "Bob"}],
            "lastMessage": {
                "$type": "chat.bsky.convo.defs#messageView",
                "id": "msg9",
                "rev": "22",
                "text": "see you",
                "sender": {"did": "did:plc:bob"},
                "sentAt": "2024-05-01T12:00:00.000Z"
            },
            "muted": false,
            "unreadCount": 2
        }"#;

        let view: ConvoView = serde_json::from_str(json).unwrap();
        let convo = Conversation::from(view);

        assert_eq!(convo.id, "3kabc");
        assert_eq!(convo.unread_count, 2);
        assert_eq!(convo.members[0].name(), "Bob");
        let latest = convo.latest_message().unwrap();
        assert_eq!(latest.text, "see you");
        assert_eq!(latest.sender_did, "did:plc:bob");
        assert_eq!(convo.last_activity_at, Some(latest.sent_at));
    }

    #[test]
    fn test_deleted_last_message_keeps_timestamp_only() {
        let json = r#"{
            "id": "3kdel",
            "members": [],
            "lastMessage": {
                "$type": "chat.bsky.convo.defs#deletedMessageView",
                "id": "msg1",
                "sender": {"did": "did:plc:bob"},
                "sentAt": "2024-05-01T12:00:00Z"
            }
        }"#;

        let convo = Conversation::from(serde_json::from_str::<ConvoView>(json).unwrap());
        assert!(convo.messages.is_empty());
        assert!(convo.last_activity_at.is_some());
    }
}
