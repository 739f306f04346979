use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::{Message, MessageId, UserId, WireClock};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageEvent {
    pub message_id: MessageId,
    pub message: String,
    pub sender_id: UserId,
    pub sender_username: String,
    pub receiver_id: UserId,
    pub timestamp: String,
    pub is_read: bool,
}

impl ChatMessageEvent {
    pub fn new(message: &Message, sender_username: &str, clock: &WireClock) -> Self {
        Self {
            message_id: message.id,
            message: message.content.clone(),
            sender_id: message.sender_id,
            sender_username: sender_username.to_owned(),
            receiver_id: message.receiver_id,
            timestamp: clock.format(message.created_at),
            is_read: message.is_read,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    ChatMessage(ChatMessageEvent),
    TypingIndicator {
        user_id: UserId,
        username: String,
        is_typing: bool,
    },
    MessagesRead {
        reader_id: UserId,
        sender_id: UserId,
    },
    UserStatus {
        user_id: UserId,
        username: String,
        is_online: bool,
    },
    MessageDeleted {
        message_id: MessageId,
        deleted_by: UserId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    ChatMessage(ChatMessageEvent),
    Typing {
        user_id: UserId,
        username: String,
        is_typing: bool,
    },
    MessagesRead {
        reader_id: UserId,
        sender_id: UserId,
    },
    UserStatus {
        user_id: UserId,
        username: String,
        is_online: bool,
    },
    MessageDeleted {
        message_id: MessageId,
        deleted_by: UserId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    ChatMessage {
        #[serde(default)]
        message: String,
        receiver_id: UserId,
    },
    Typing {
        #[serde(default)]
        is_typing: bool,
    },
    MarkRead {
        sender_id: UserId,
    },
    DeleteMessage {
        message_id: MessageId,
    },
}

impl Inbound {
    const KINDS: [&'static str; 4] = ["chat_message", "typing", "mark_read", "delete_message"];
    const DEFAULT_KIND: &'static str = "chat_message";
}

#[derive(Debug, Error)]
pub enum MalformedEvent {
    #[error("invalid event payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event is not a JSON object")]
    NotAnObject,
    #[error("event type is not a string")]
    BadType,
}

// Parses one client frame. `Ok(None)` means a well-formed event of a type we
// do not handle; a missing `type` means `chat_message`.
pub fn parse_inbound(text: &str) -> Result<Option<Inbound>, MalformedEvent> {
    let mut value: Value = serde_json::from_str(text)?;
    let Some(object) = value.as_object_mut() else {
        return Err(MalformedEvent::NotAnObject);
    };

    let kind = match object.get("type") {
        None => Inbound::DEFAULT_KIND.to_owned(),
        Some(Value::String(kind)) => kind.clone(),
        Some(_) => return Err(MalformedEvent::BadType),
    };
    if !Inbound::KINDS.contains(&kind.as_str()) {
        return Ok(None);
    }

    object.insert("type".to_owned(), Value::String(kind));
    Ok(Some(serde_json::from_value(value)?))
}
