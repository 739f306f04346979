use axum::{
    Json, Router, debug_handler,
    extract::{Path, State, rejection::JsonRejection},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    AppError, AppResult, AppState,
    hub::Hub,
    model::{MessageId, User, UserId},
    rooms::{ChatMessageEvent, Outbound},
    session::Identity,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/send_message", post(send_message))
        .route("/get_messages/{other_user_id}", get(get_messages))
}

#[derive(Debug, Default, Deserialize)]
pub struct SendMessageRequest {
    pub receiver_id: Option<UserId>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SentMessage {
    pub id: MessageId,
    pub content: String,
    pub timestamp: String,
    pub sender_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub status: &'static str,
    pub message: SentMessage,
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub messages: Vec<Outbound>,
}

pub async fn send(hub: &Hub, sender: &User, request: SendMessageRequest) -> AppResult<SendResponse> {
    let content = request.message.filter(|m| !m.trim().is_empty());
    let (Some(receiver_id), Some(content)) = (request.receiver_id, content) else {
        return Err(AppError::Validation("receiver_id and message are required".to_owned()));
    };
    if receiver_id == sender.id {
        return Err(AppError::Validation("You cannot message yourself.".to_owned()));
    }

    let message = hub.messages.create(sender.id, receiver_id, &content).await?;
    info!(message_id = message.id, sender_id = sender.id, receiver_id, "message sent via fallback");

    Ok(SendResponse {
        status: "success",
        message: SentMessage {
            id: message.id,
            timestamp: hub.clock.format(message.created_at),
            content: message.content,
            sender_id: message.sender_id,
        },
    })
}

pub async fn poll(hub: &Hub, viewer: &User, other_user_id: UserId) -> AppResult<PollResponse> {
    let Some(other) = hub.users.find(other_user_id).await? else {
        return Err(AppError::NotFound(format!("user {other_user_id} not found")));
    };

    let messages = hub.messages.take_unread(other.id, viewer.id).await?;
    debug!(viewer = viewer.id, other = other.id, count = messages.len(), "poll");

    Ok(PollResponse {
        messages: messages
            .iter()
            .map(|message| Outbound::ChatMessage(ChatMessageEvent::new(message, &other.username, &hub.clock)))
            .collect(),
    })
}

#[debug_handler(state = AppState)]
async fn send_message(
    State(hub): State<Hub>,
    Identity(sender): Identity,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> AppResult<Json<SendResponse>> {
    let Json(request) = body.map_err(|rejection| AppError::Validation(rejection.body_text()))?;
    Ok(Json(send(&hub, &sender, request).await?))
}

#[debug_handler(state = AppState)]
async fn get_messages(
    State(hub): State<Hub>,
    Identity(viewer): Identity,
    Path(other_user_id): Path<UserId>,
) -> AppResult<Json<PollResponse>> {
    Ok(Json(poll(&hub, &viewer, other_user_id).await?))
}
