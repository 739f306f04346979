use thiserror::Error;
use tokio::{runtime::Handle, time::timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    hub::Hub,
    model::{MessageId, User, UserId},
    store::StoreError,
};

use super::{
    RoomKey,
    event::{ChatMessageEvent, Inbound, Outbound, RoomEvent, parse_inbound},
    router::{ConnectionId, Outbox},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("no conversation with user {0}")]
    InvalidPeer(UserId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ConnectionSession {
    id: ConnectionId,
    user: User,
    peer_id: UserId,
    room: RoomKey,
    hub: Hub,
    state: SessionState,
}

impl ConnectionSession {
    pub async fn open(
        hub: Hub,
        identity: Option<User>,
        peer_id: UserId,
        outbox: Outbox,
    ) -> Result<Self, SessionError> {
        let Some(user) = identity else {
            return Err(SessionError::AuthenticationRequired);
        };
        if peer_id == user.id || hub.users.find(peer_id).await?.is_none() {
            return Err(SessionError::InvalidPeer(peer_id));
        }

        let mut session = Self::connecting(hub, user, peer_id);
        session.hub.router.subscribe(&session.room, session.id, outbox).await;
        if let Err(err) = session.hub.presence.set_online(session.user.id, true).await {
            session.hub.router.unsubscribe(&session.room, session.id).await;
            session.state = SessionState::Closed;
            return Err(err.into());
        }
        session.state = SessionState::Active;

        session
            .publish(RoomEvent::UserStatus {
                user_id: session.user.id,
                username: session.user.username.clone(),
                is_online: true,
            })
            .await;

        info!(connection = %session.id, user_id = session.user.id, room = %session.room, "connected");
        Ok(session)
    }

    fn connecting(hub: Hub, user: User, peer_id: UserId) -> Self {
        Self {
            id: Uuid::now_v7(),
            room: RoomKey::between(user.id, peer_id),
            user,
            peer_id,
            hub,
            state: SessionState::Connecting,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn room(&self) -> &RoomKey {
        &self.room
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn viewer(&self) -> Viewer {
        Viewer(self.user.id)
    }

    pub async fn handle_text(&mut self, text: &str) {
        match parse_inbound(text) {
            Ok(Some(inbound)) => {
                if let Err(err) = self.handle(inbound).await {
                    error!(connection = %self.id, %err, "event failed");
                }
            }
            Ok(None) => debug!(connection = %self.id, "ignoring unknown event type"),
            Err(err) => warn!(connection = %self.id, %err, "dropping malformed event"),
        }
    }

    pub async fn handle(&mut self, inbound: Inbound) -> Result<(), StoreError> {
        if self.state != SessionState::Active {
            return Ok(());
        }

        match inbound {
            Inbound::ChatMessage { message, receiver_id } => self.send_message(&message, receiver_id).await,
            Inbound::Typing { is_typing } => {
                self.publish(RoomEvent::TypingIndicator {
                    user_id: self.user.id,
                    username: self.user.username.clone(),
                    is_typing,
                })
                .await;
                Ok(())
            }
            Inbound::MarkRead { sender_id } => self.mark_read(sender_id).await,
            Inbound::DeleteMessage { message_id } => self.delete_message(message_id).await,
        }
    }

    async fn send_message(&self, content: &str, receiver_id: UserId) -> Result<(), StoreError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(());
        }
        if receiver_id != self.peer_id {
            warn!(connection = %self.id, receiver_id, room = %self.room, "receiver is not in this room");
            return Ok(());
        }

        let message = self.hub.messages.create(self.user.id, receiver_id, content).await?;
        debug!(connection = %self.id, message_id = message.id, "message sent");

        self.publish(RoomEvent::ChatMessage(ChatMessageEvent::new(
            &message,
            &self.user.username,
            &self.hub.clock,
        )))
        .await;
        Ok(())
    }

    async fn mark_read(&self, sender_id: UserId) -> Result<(), StoreError> {
        let flipped = self.hub.messages.mark_all_read(sender_id, self.user.id).await?;
        debug!(connection = %self.id, sender_id, flipped, "marked read");

        self.publish(RoomEvent::MessagesRead {
            reader_id: self.user.id,
            sender_id,
        })
        .await;
        Ok(())
    }

    async fn delete_message(&self, message_id: MessageId) -> Result<(), StoreError> {
        // unknown and foreign ids look the same to the client
        if !self.hub.messages.delete(message_id, self.user.id).await? {
            debug!(connection = %self.id, message_id, "delete refused");
            return Ok(());
        }

        self.publish(RoomEvent::MessageDeleted {
            message_id,
            deleted_by: self.user.id,
        })
        .await;
        Ok(())
    }

    async fn publish(&self, event: RoomEvent) {
        self.hub.router.publish(&self.room, event).await;
    }

    pub async fn close(&mut self) {
        let was_active = self.state == SessionState::Active;
        self.state = SessionState::Closed;
        if was_active {
            exit_actions(self.hub.clone(), self.user.clone(), self.room.clone(), self.id).await;
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        let state = std::mem::replace(&mut self.state, SessionState::Closed);
        if state == SessionState::Closed {
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!(connection = %self.id, "dropped outside a runtime, presence not cleared");
            return;
        };
        if state == SessionState::Active {
            runtime.spawn(exit_actions(self.hub.clone(), self.user.clone(), self.room.clone(), self.id));
        } else {
            // the handshake was abandoned, possibly after subscribing
            let (router, room, connection) = (self.hub.router.clone(), self.room.clone(), self.id);
            runtime.spawn(async move { router.unsubscribe(&room, connection).await });
        }
    }
}

// Presence is updated before it is announced, and unsubscribe always runs even
// if the steps before it fail or time out.
async fn exit_actions(hub: Hub, user: User, room: RoomKey, connection: ConnectionId) {
    let limit = hub.limits.close_timeout;

    match timeout(limit, hub.presence.set_online(user.id, false)).await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => error!(%connection, user_id = user.id, %err, "failed to clear presence"),
        Err(_) => warn!(%connection, user_id = user.id, "clearing presence timed out"),
    }

    let offline = RoomEvent::UserStatus {
        user_id: user.id,
        username: user.username,
        is_online: false,
    };
    if timeout(limit, hub.router.publish(&room, offline)).await.is_err() {
        warn!(%connection, %room, "offline announcement timed out");
    }

    hub.router.unsubscribe(&room, connection).await;
    info!(%connection, user_id = user.id, %room, "disconnected");
}

#[derive(Debug, Clone, Copy)]
pub struct Viewer(UserId);

impl Viewer {
    pub fn render(&self, event: RoomEvent) -> Option<Outbound> {
        Some(match event {
            RoomEvent::ChatMessage(message) => Outbound::ChatMessage(message),
            RoomEvent::TypingIndicator { user_id, .. } if user_id == self.0 => return None,
            RoomEvent::TypingIndicator {
                user_id,
                username,
                is_typing,
            } => Outbound::Typing {
                user_id,
                username,
                is_typing,
            },
            RoomEvent::MessagesRead { reader_id, sender_id } => Outbound::MessagesRead { reader_id, sender_id },
            RoomEvent::UserStatus {
                user_id,
                username,
                is_online,
            } => Outbound::UserStatus {
                user_id,
                username,
                is_online,
            },
            RoomEvent::MessageDeleted { message_id, deleted_by } => Outbound::MessageDeleted { message_id, deleted_by },
        })
    }
}
