// src/services/notifier.rs

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;

/// Default per-room channel capacity.
const ROOM_CAPACITY: usize = 256;

/// A message as delivered to room subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct RoomMessage {
    pub event: String,
    pub payload: serde_json::Value,
}

/// Publish-only, fire-and-forget broadcast to everyone in a room.
/// The room key is the session's join code.
pub trait Notifier: Send + Sync {
    fn publish(&self, room: &str, event: &str, payload: serde_json::Value);
}

/// Serializes a typed payload and publishes it. Serialization failures are logged.
pub fn publish_event<T: Serialize>(notifier: &dyn Notifier, room: &str, event: &str, payload: &T) {
    match serde_json::to_value(payload) {
        Ok(value) => notifier.publish(room, event, value),
        Err(e) => tracing::error!(room, event, "Failed to serialize event payload: {:?}", e),
    }
}

/// In-process rooms over `tokio::sync::broadcast`.
/// Non-blocking: slow subscribers lag and lose messages rather than stall publishers.
#[derive(Default)]
pub struct BroadcastHub {
    rooms: DashMap<String, broadcast::Sender<RoomMessage>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, room: &str) -> broadcast::Receiver<RoomMessage> {
        self.rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// Drops rooms nobody listens to any more.
    pub fn prune(&self) {
        self.rooms.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Notifier for BroadcastHub {
    fn publish(&self, room: &str, event: &str, payload: serde_json::Value) {
        let delivered = match self.rooms.get(room) {
            Some(tx) => tx
                .send(RoomMessage {
                    event: event.to_string(),
                    payload,
                })
                .unwrap_or(0),
            None => 0,
        };
        tracing::debug!(room, event, delivered, "Published room event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_room_events_only() {
        let hub = BroadcastHub::new();
        let mut rx_a = hub.subscribe("111111");
        let mut rx_b = hub.subscribe("222222");

        hub.publish("111111", "vote-progress", serde_json::json!({"answered": 1, "total": 2}));

        let msg = rx_a.recv().await.unwrap();
        assert_eq!(msg.event, "vote-progress");
        assert_eq!(msg.payload["answered"], 1);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn publish_without_room_is_a_no_op() {
        let hub = BroadcastHub::new();
        hub.publish("999999", "session-deleted", serde_json::json!({}));
        hub.prune();
    }

    #[test]
    fn prune_drops_abandoned_rooms() {
        let hub = BroadcastHub::new();
        let rx = hub.subscribe("123456");
        drop(rx);
        hub.prune();
        assert!(hub.rooms.is_empty());
    }
}
