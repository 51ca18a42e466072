/// Shared types for the chat and matchmaking layers
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content type of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Emoji,
    System,
}

/// Delivery status of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

/// One chat message as the server persists it.
///
/// Ids are server-assigned; there is no optimistic client-side id. Deletes
/// are soft: the message stays in the cache with `deleted_at` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub author_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// `message.read` payload: the remote participant read the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub conversation_id: String,
    pub user_id: String,
    pub unread_count: u32,
}

/// `user.typing` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub conversation_id: String,
    pub user_id: String,
    pub is_typing: bool,
}

/// Push events fanned out to conversation controllers
#[derive(Debug, Clone)]
pub enum ChatEvent {
    MessageNew(Message),
    MessageUpdated(Message),
    MessageDeleted(Message),
    ConversationRead(ReadReceipt),
    Typing(TypingNotice),
}

/// Matchmaking queue status as reported by the server.
///
/// The status set is open-ended: unknown strings are preserved rather than
/// rejected, so a newer server cannot break the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Idle,
    Queued,
    Matched,
    Offline,
    Paused,
    #[serde(untagged)]
    Other(String),
}

/// `search_state` stream payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchStatePayload {
    pub status: SearchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
}

/// `heartbeat` stream payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// `match_found` stream payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPayload {
    pub match_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<String>,
    /// Server-defined extras (profile preview, expiry, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
