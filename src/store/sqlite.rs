use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::{
    db::{from_micros, to_micros},
    model::{Message, MessageId, Presence, User, UserId},
};

use super::{MessageStore, PresenceRegistry, StoreError, UserDirectory};

const MESSAGE_COLUMNS: &str = "id,sender_id,receiver_id,content,created_at,is_read";

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    sender_id: i64,
    receiver_id: i64,
    content: String,
    created_at: i64,
    is_read: bool,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            content: row.content,
            created_at: from_micros(row.created_at),
            is_read: row.is_read,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    is_online: bool,
    last_seen: i64,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            is_online: row.is_online,
            last_seen: from_micros(row.last_seen),
        }
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db_pool
    }

    pub async fn create_user(&self, username: &str, email: &str) -> Result<User, StoreError> {
        let row: UserRow = sqlx::query_as(
            "INSERT INTO users (username,email,is_online,last_seen) VALUES (?,?,0,?) \
             RETURNING id,username,email,is_online,last_seen",
        )
        .bind(username)
        .bind(email)
        .bind(to_micros(now()))
        .fetch_one(&self.db_pool)
        .await?;

        debug!(user_id = row.id, username, "user created");
        Ok(row.into())
    }

    // A write older than the stored stamp loses, whatever order the two commit in.
    pub(crate) async fn set_online_at(
        &self,
        user: UserId,
        online: bool,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET is_online=?, last_seen=? WHERE id=? AND last_seen<=?")
            .bind(online)
            .bind(to_micros(at))
            .bind(user)
            .bind(to_micros(at))
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

// Storage resolution is microseconds. Round up, never down, so a stamp is not
// earlier than the call that took it and a re-read returns exactly the same value.
fn now() -> DateTime<Utc> {
    let now = Utc::now();
    let stamp = now.trunc_subsecs(6);
    if stamp < now {
        stamp + TimeDelta::microseconds(1)
    } else {
        stamp
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn create(&self, sender: UserId, receiver: UserId, content: &str) -> Result<Message, StoreError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::validation("message content is empty"));
        }

        let created_at = now();
        // the receiver check and the insert are one statement
        let inserted: Option<(i64,)> = sqlx::query_as(
            "INSERT INTO messages (sender_id,receiver_id,content,created_at,is_read) \
             SELECT ?,id,?,?,0 FROM users WHERE id=? RETURNING id",
        )
        .bind(sender)
        .bind(content)
        .bind(to_micros(created_at))
        .bind(receiver)
        .fetch_optional(&self.db_pool)
        .await?;

        let Some((id,)) = inserted else {
            return Err(StoreError::validation(format!("receiver {receiver} does not exist")));
        };

        debug!(message_id = id, sender, receiver, "message stored");
        Ok(Message {
            id,
            sender_id: sender,
            receiver_id: receiver,
            content: content.to_owned(),
            created_at,
            is_read: false,
        })
    }

    async fn mark_all_read(&self, sender: UserId, receiver: UserId) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE messages SET is_read=1 WHERE sender_id=? AND receiver_id=? AND is_read=0")
            .bind(sender)
            .bind(receiver)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, message_id: MessageId, requesting_user: UserId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE id=? AND sender_id=?")
            .bind(message_id)
            .bind(requesting_user)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn history(&self, a: UserId, b: UserId) -> Result<Vec<Message>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE (sender_id=? AND receiver_id=?) OR (sender_id=? AND receiver_id=?) \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn unread_count(&self, from: UserId, to: UserId) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM messages WHERE sender_id=? AND receiver_id=? AND is_read=0")
                .bind(from)
                .bind(to)
                .fetch_one(&self.db_pool)
                .await?;
        Ok(count)
    }

    async fn last_message(&self, a: UserId, b: UserId) -> Result<Option<Message>, StoreError> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE (sender_id=? AND receiver_id=?) OR (sender_id=? AND receiver_id=?) \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(row.map(Message::from))
    }

    async fn take_unread(&self, from: UserId, to: UserId) -> Result<Vec<Message>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "UPDATE messages SET is_read=1 WHERE sender_id=? AND receiver_id=? AND is_read=0 \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.db_pool)
        .await?;

        // RETURNING order is unspecified
        let mut messages: Vec<Message> = rows.into_iter().map(Message::from).collect();
        messages.sort_by_key(|m| (m.created_at, m.id));
        Ok(messages)
    }
}

#[async_trait]
impl PresenceRegistry for SqliteStore {
    async fn set_online(&self, user: UserId, online: bool) -> Result<DateTime<Utc>, StoreError> {
        let last_seen = now();
        if self.set_online_at(user, online, last_seen).await? {
            debug!(user_id = user, online, "presence updated");
        } else {
            debug!(user_id = user, online, "presence write superseded by a newer one");
        }
        Ok(last_seen)
    }

    async fn presence(&self, user: UserId) -> Result<Option<Presence>, StoreError> {
        let row: Option<(bool, i64)> = sqlx::query_as("SELECT is_online,last_seen FROM users WHERE id=?")
            .bind(user)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.map(|(is_online, last_seen)| Presence {
            is_online,
            last_seen: from_micros(last_seen),
        }))
    }
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn find(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id,username,email,is_online,last_seen FROM users WHERE id=?")
                .bind(id)
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(row.map(User::from))
    }

    async fn others(&self, viewer: UserId) -> Result<Vec<User>, StoreError> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT id,username,email,is_online,last_seen FROM users WHERE id<>? ORDER BY username ASC, id ASC",
        )
        .bind(viewer)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }
}
