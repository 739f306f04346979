use axum::{
    debug_handler,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{AppError, hub::Hub, model::{User, UserId}, session::Identity};

use super::session::ConnectionSession;

#[debug_handler(state = crate::AppState)]
pub async fn room_ws(
    Path(peer_id): Path<UserId>,
    State(hub): State<Hub>,
    identity: Result<Identity, AppError>,
    ws: WebSocketUpgrade,
) -> Response {
    // anonymous connections are upgraded and then refused by the session
    let identity = match identity {
        Ok(Identity(user)) => Some(user),
        Err(AppError::AuthenticationRequired) => None,
        Err(err) => {
            error!(peer_id, %err, "could not resolve the connecting user");
            return err.into_response();
        }
    };
    ws.on_upgrade(move |stream| serve(hub, identity, peer_id, stream))
}

async fn serve(hub: Hub, identity: Option<User>, peer_id: UserId, mut stream: WebSocket) {
    let (outbox, mut inbox) = mpsc::channel(hub.limits.outbox_capacity);

    let mut session = match ConnectionSession::open(hub, identity, peer_id, outbox).await {
        Ok(session) => session,
        Err(err) => {
            info!(peer_id, %err, "refusing connection");
            let _ = stream.send(Message::Close(None)).await;
            return;
        }
    };

    let viewer = session.viewer();
    let (mut sender, mut receiver) = stream.split();

    let mut forward_task = tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            let Some(outbound) = viewer.render(event) else {
                continue;
            };
            let text = match serde_json::to_string(&outbound) {
                Ok(text) => text,
                Err(err) => {
                    warn!(%err, "failed to encode outbound event");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // one frame at a time, fully handled before the next is read
    loop {
        tokio::select! {
            _ = &mut forward_task => break,
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()).await,
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => session.handle_text(text).await,
                    Err(_) => warn!(connection = %session.id(), "dropping non utf-8 frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(connection = %session.id(), %err, "socket error");
                    break;
                }
            },
        }
    }

    forward_task.abort();
    session.close().await;
}
