mod event;
#[cfg(feature = "redis")]
mod fabric;
mod room;
mod router;
mod session;
mod ws;

use std::fmt;

use axum::{Router, routing::get};
use serde::Serialize;

use crate::{AppState, index, model::UserId};

pub use event::{ChatMessageEvent, Inbound, MalformedEvent, Outbound, RoomEvent, parse_inbound};
#[cfg(feature = "redis")]
pub use fabric::RedisRouter;
pub use room::RoomView;
pub use router::{ConnectionId, LocalRouter, Outbox, RoomRouter};
pub use session::{ConnectionSession, SessionError, SessionState, Viewer};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index::index))
        .route("/{peer_id}", get(room::room))
        .route("/{peer_id}/ws", get(ws::room_ws))
}

const ROOM_PREFIX: &str = "chat_";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RoomKey(String);

impl RoomKey {
    pub fn between(a: UserId, b: UserId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{ROOM_PREFIX}{low}_{high}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[cfg(feature = "redis")]
    pub(crate) fn from_channel(channel: &str) -> Option<Self> {
        channel.starts_with(ROOM_PREFIX).then(|| Self(channel.to_owned()))
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}
