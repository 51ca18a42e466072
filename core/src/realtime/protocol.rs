/// Wire protocol for the realtime chat namespace.
///
/// Frames are JSON objects tagged by `event`. Client frames that expect a
/// reply carry a numeric `ack` correlation id; the server answers with an
/// `ack` frame carrying the same id and either a success payload or an
/// error message.
use crate::types::{Message, ReadReceipt, TypingNotice};
use serde::{Deserialize, Serialize};

/// Event names fixed by the backend protocol surface
pub mod events {
    pub const AUTH: &str = "auth";
    pub const MESSAGE_SEND: &str = "message.send";
    pub const MESSAGE_UPDATE: &str = "message.update";
    pub const MESSAGE_DELETE: &str = "message.delete";
    pub const MESSAGE_READ: &str = "message.read";
    pub const MESSAGE_DELIVERY_ACK: &str = "message.delivery.ack";
    pub const CONVERSATION_JOIN: &str = "conversation.join";
    pub const CONVERSATION_LEAVE: &str = "conversation.leave";
    pub const TYPING_START: &str = "typing.start";
    pub const TYPING_STOP: &str = "typing.stop";
}

/// Client-to-server frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientFrame {
    pub event: String,
    /// Correlation id; absent on fire-and-forget notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
    pub payload: serde_json::Value,
}

/// Result status of an acknowledgement frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Ok,
    Error,
}

/// Server-to-client frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum ServerFrame {
    #[serde(rename = "message.new")]
    MessageNew { payload: Message },

    #[serde(rename = "message.updated")]
    MessageUpdated { payload: Message },

    #[serde(rename = "message.deleted")]
    MessageDeleted { payload: Message },

    #[serde(rename = "message.read")]
    ConversationRead { payload: ReadReceipt },

    #[serde(rename = "user.typing")]
    Typing { payload: TypingNotice },

    /// Reply to a client frame that carried an `ack` id
    #[serde(rename = "ack")]
    Ack {
        ack: u64,
        status: AckStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}
