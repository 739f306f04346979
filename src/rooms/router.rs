use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{RoomKey, event::RoomEvent};

pub type ConnectionId = Uuid;
pub type Outbox = mpsc::Sender<RoomEvent>;

#[async_trait]
pub trait RoomRouter: Send + Sync {
    async fn subscribe(&self, room: &RoomKey, connection: ConnectionId, outbox: Outbox);

    async fn unsubscribe(&self, room: &RoomKey, connection: ConnectionId);

    async fn publish(&self, room: &RoomKey, event: RoomEvent);
}

#[derive(Default)]
pub struct LocalRouter {
    rooms: DashMap<RoomKey, HashMap<ConnectionId, Outbox>>,
}

impl LocalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, room: &RoomKey) -> usize {
        self.rooms.get(room).map_or(0, |subscribers| subscribers.len())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub(crate) fn deliver(&self, room: &RoomKey, event: RoomEvent) {
        let Some(subscribers) = self.rooms.get(room) else {
            debug!(%room, "publish to empty room");
            return;
        };

        for (connection, outbox) in subscribers.iter() {
            match outbox.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(%room, %connection, "outbox full, dropping event");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%room, %connection, "outbox closed, skipping");
                }
            }
        }
    }
}

#[async_trait]
impl RoomRouter for LocalRouter {
    async fn subscribe(&self, room: &RoomKey, connection: ConnectionId, outbox: Outbox) {
        self.rooms.entry(room.clone()).or_default().insert(connection, outbox);
    }

    async fn unsubscribe(&self, room: &RoomKey, connection: ConnectionId) {
        if let Some(mut subscribers) = self.rooms.get_mut(room) {
            subscribers.remove(&connection);
        }
        self.rooms.remove_if(room, |_, subscribers| subscribers.is_empty());
    }

    async fn publish(&self, room: &RoomKey, event: RoomEvent) {
        self.deliver(room, event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn read(reader_id: i64) -> RoomEvent {
        RoomEvent::MessagesRead { reader_id, sender_id: 0 }
    }

    #[tokio::test]
    async fn publish_reaches_only_the_room() {
        let router = LocalRouter::new();
        let (ab, other) = (RoomKey::between(1, 2), RoomKey::between(1, 3));

        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let (tx3, mut rx3) = mpsc::channel(8);
        router.subscribe(&ab, Uuid::now_v7(), tx1).await;
        router.subscribe(&ab, Uuid::now_v7(), tx2).await;
        router.subscribe(&other, Uuid::now_v7(), tx3).await;

        router.publish(&ab, read(1)).await;

        assert_eq!(rx1.try_recv().unwrap(), read(1));
        assert_eq!(rx2.try_recv().unwrap(), read(1));
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_are_idempotent() {
        let router = LocalRouter::new();
        let room = RoomKey::between(4, 5);
        let id = Uuid::now_v7();
        let (tx, mut rx) = mpsc::channel(8);

        router.subscribe(&room, id, tx.clone()).await;
        router.subscribe(&room, id, tx).await;
        assert_eq!(router.subscriber_count(&room), 1);

        router.publish(&room, read(1)).await;
        assert_eq!(rx.try_recv().unwrap(), read(1));
        assert!(rx.try_recv().is_err());

        router.unsubscribe(&room, id).await;
        router.unsubscribe(&room, id).await;
        router.unsubscribe(&RoomKey::between(8, 9), id).await;
        assert_eq!(router.subscriber_count(&room), 0);
        assert_eq!(router.room_count(), 0);

        router.publish(&room, read(2)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn a_dead_subscriber_does_not_block_the_rest() {
        let router = LocalRouter::new();
        let room = RoomKey::between(1, 2);

        let (dead, dead_rx) = mpsc::channel(8);
        drop(dead_rx);
        let (full, _full_rx) = mpsc::channel(1);
        full.try_send(read(0)).unwrap();
        let (live, mut live_rx) = mpsc::channel(8);

        router.subscribe(&room, Uuid::now_v7(), dead).await;
        router.subscribe(&room, Uuid::now_v7(), full).await;
        router.subscribe(&room, Uuid::now_v7(), live).await;

        router.publish(&room, read(1)).await;
        assert_eq!(live_rx.try_recv().unwrap(), read(1));
    }

    #[tokio::test]
    async fn per_publisher_order_is_kept() {
        let router = Arc::new(LocalRouter::new());
        let room = RoomKey::between(1, 2);
        let (tx, mut rx) = mpsc::channel(256);
        router.subscribe(&room, Uuid::now_v7(), tx).await;

        let publishers: Vec<_> = [100, 200]
            .into_iter()
            .map(|base| {
                let router = router.clone();
                let room = room.clone();
                tokio::spawn(async move {
                    for i in 0..50 {
                        router.publish(&room, read(base + i)).await;
                    }
                })
            })
            .collect();
        for publisher in publishers {
            publisher.await.unwrap();
        }

        let mut last = HashMap::new();
        while let Ok(RoomEvent::MessagesRead { reader_id, .. }) = rx.try_recv() {
            let base = reader_id / 100 * 100;
            let prev = last.insert(base, reader_id);
            assert!(prev.is_none_or(|prev| prev < reader_id));
        }
        assert_eq!(last.get(&100), Some(&149));
        assert_eq!(last.get(&200), Some(&249));
    }
}
