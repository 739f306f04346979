mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{Message, MessageId, Presence, User, UserId};

pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),
    #[error("store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

impl StoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a new unread message stamped with the server clock. `content`
    /// is stored trimmed and must not be blank; `receiver` must exist.
    async fn create(&self, sender: UserId, receiver: UserId, content: &str) -> Result<Message, StoreError>;

    /// Marks every unread message from `sender` to `receiver` as read and
    /// returns how many rows flipped. Calling it again is a no-op.
    async fn mark_all_read(&self, sender: UserId, receiver: UserId) -> Result<u64, StoreError>;

    /// Deletes `message_id` if and only if `requesting_user` sent it. Unknown
    /// ids and foreign messages both yield `false`, never an error.
    async fn delete(&self, message_id: MessageId, requesting_user: UserId) -> Result<bool, StoreError>;

    /// All messages between the pair in either direction, oldest first.
    async fn history(&self, a: UserId, b: UserId) -> Result<Vec<Message>, StoreError>;

    async fn unread_count(&self, from: UserId, to: UserId) -> Result<i64, StoreError>;

    async fn last_message(&self, a: UserId, b: UserId) -> Result<Option<Message>, StoreError>;

    /// Atomically marks the unread messages from `from` to `to` as read and
    /// returns them, oldest first. Two concurrent callers never receive the
    /// same message.
    async fn take_unread(&self, from: UserId, to: UserId) -> Result<Vec<Message>, StoreError>;
}

#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    /// Sets the online flag and stamps `last_seen` with the current time in a
    /// single write. Of concurrent calls, the one with the latest stamp wins
    /// regardless of commit order. Returns the stamp.
    async fn set_online(&self, user: UserId, online: bool) -> Result<DateTime<Utc>, StoreError>;

    async fn presence(&self, user: UserId) -> Result<Option<Presence>, StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn others(&self, viewer: UserId) -> Result<Vec<User>, StoreError>;
}
