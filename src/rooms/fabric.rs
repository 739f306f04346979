use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{error, info, warn};

use super::{
    ROOM_PREFIX, RoomKey,
    event::RoomEvent,
    router::{ConnectionId, LocalRouter, Outbox, RoomRouter},
};

pub struct RedisRouter {
    local: Arc<LocalRouter>,
    connection: MultiplexedConnection,
}

impl RedisRouter {
    pub async fn connect(url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;

        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.psubscribe(format!("{ROOM_PREFIX}*")).await?;

        let local = Arc::new(LocalRouter::new());
        let fan_in = local.clone();
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let Some(room) = RoomKey::from_channel(msg.get_channel_name()) else {
                    continue;
                };
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(%room, %err, "unreadable pub/sub payload");
                        continue;
                    }
                };
                match serde_json::from_str::<RoomEvent>(&payload) {
                    Ok(event) => fan_in.deliver(&room, event),
                    Err(err) => warn!(%room, %err, "dropping undecodable room event"),
                }
            }
            error!("redis subscription closed, remote events will no longer arrive");
        });

        info!("room router connected to redis");
        Ok(Self { local, connection })
    }
}

#[async_trait]
impl RoomRouter for RedisRouter {
    async fn subscribe(&self, room: &RoomKey, connection: ConnectionId, outbox: Outbox) {
        self.local.subscribe(room, connection, outbox).await;
    }

    async fn unsubscribe(&self, room: &RoomKey, connection: ConnectionId) {
        self.local.unsubscribe(room, connection).await;
    }

    async fn publish(&self, room: &RoomKey, event: RoomEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(err) => {
                error!(%room, %err, "failed to encode room event");
                return;
            }
        };

        let mut connection = self.connection.clone();
        if let Err(err) = connection.publish::<_, _, ()>(room.as_str(), payload).await {
            error!(%room, %err, "redis publish failed");
        }
    }
}
