use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Serialize;

pub type UserId = i64;
pub type MessageId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing)]
    pub email: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Presence {
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub peer: User,
    pub unread_count: i64,
    pub last_message: Option<Message>,
}

#[derive(Debug, Clone, Copy)]
pub struct WireClock {
    offset: FixedOffset,
}

impl WireClock {
    pub const FORMAT: &'static str = "%b %d, %Y %I:%M %p";

    pub fn from_offset_minutes(minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(minutes * 60).unwrap_or(Self::utc().offset);
        Self { offset }
    }

    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    pub fn format(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.offset).format(Self::FORMAT).to_string()
    }
}

impl Default for WireClock {
    fn default() -> Self {
        Self::utc()
    }
}
