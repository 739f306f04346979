use axum::{
    Json, debug_handler,
    extract::{Path, State},
};
use serde::Serialize;

use crate::{
    AppError, AppResult,
    hub::Hub,
    model::{Message, User, UserId},
    session::Identity,
};

use super::RoomKey;

#[derive(Debug, Serialize)]
pub struct HistoryItem {
    #[serde(flatten)]
    pub message: Message,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct RoomView {
    pub room_name: RoomKey,
    pub current_user_id: UserId,
    pub other_user: User,
    pub messages: Vec<HistoryItem>,
}

impl RoomView {
    pub async fn load(hub: &Hub, viewer: &User, peer_id: UserId) -> AppResult<Self> {
        let Some(other_user) = hub.users.find(peer_id).await? else {
            return Err(AppError::NotFound(format!("user {peer_id} not found")));
        };
        if other_user.id == viewer.id {
            return Err(AppError::Validation("You cannot chat with yourself.".to_owned()));
        }

        hub.messages.mark_all_read(other_user.id, viewer.id).await?;
        let messages = hub
            .messages
            .history(viewer.id, other_user.id)
            .await?
            .into_iter()
            .map(|message| HistoryItem {
                timestamp: hub.clock.format(message.created_at),
                message,
            })
            .collect();

        Ok(Self {
            room_name: RoomKey::between(viewer.id, other_user.id),
            current_user_id: viewer.id,
            other_user,
            messages,
        })
    }
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room(
    State(hub): State<Hub>,
    Identity(viewer): Identity,
    Path(peer_id): Path<UserId>,
) -> AppResult<Json<RoomView>> {
    Ok(Json(RoomView::load(&hub, &viewer, peer_id).await?))
}
