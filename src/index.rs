use axum::{Json, debug_handler, extract::State};

use crate::{
    AppResult,
    hub::Hub,
    model::{ConversationSummary, UserId},
    session::Identity,
    store::StoreError,
};

pub async fn conversations(hub: &Hub, viewer: UserId) -> Result<Vec<ConversationSummary>, StoreError> {
    let peers = hub.users.others(viewer).await?;

    let mut summaries = Vec::with_capacity(peers.len());
    for peer in peers {
        let unread_count = hub.messages.unread_count(peer.id, viewer).await?;
        let last_message = hub.messages.last_message(viewer, peer.id).await?;
        summaries.push(ConversationSummary {
            peer,
            unread_count,
            last_message,
        });
    }

    // None sorts below any timestamp, and the sort is stable
    summaries.sort_by(|a, b| {
        let latest = |s: &ConversationSummary| s.last_message.as_ref().map(|m| (m.created_at, m.id));
        latest(b).cmp(&latest(a))
    });
    Ok(summaries)
}

#[debug_handler(state = crate::AppState)]
pub async fn index(
    State(hub): State<Hub>,
    Identity(viewer): Identity,
) -> AppResult<Json<Vec<ConversationSummary>>> {
    Ok(Json(conversations(&hub, viewer.id).await?))
}
