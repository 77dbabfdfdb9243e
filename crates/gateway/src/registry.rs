// In-memory connection registry mapping a room name to the live connections
// subscribed to it.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Process-wide room map, constructed once by the composition root and handed
/// to every session. Rooms are created on first join and discarded when the
/// last subscriber leaves.
pub struct RoomRegistry<T> {
    rooms: Arc<RwLock<HashMap<String, HashMap<Uuid, mpsc::UnboundedSender<T>>>>>,
}

impl<T> Clone for RoomRegistry<T> {
    fn clone(&self) -> Self {
        Self { rooms: Arc::clone(&self.rooms) }
    }
}

impl<T> Default for RoomRegistry<T> {
    fn default() -> Self {
        Self { rooms: Arc::new(RwLock::new(HashMap::new())) }
    }
}

impl<T: Clone> RoomRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a room. Joining again with the same
    /// connection id replaces the previous sender, so the call is idempotent.
    pub async fn join(&self, room: &str, conn_id: Uuid, sender: mpsc::UnboundedSender<T>) {
        let mut rooms = self.rooms.write().await;
        rooms.entry(room.to_string()).or_default().insert(conn_id, sender);
    }

    /// Remove a connection from a room, discarding the room entry once it has
    /// no subscribers left.
    pub async fn leave(&self, room: &str, conn_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(subscribers) = rooms.get_mut(room) {
            subscribers.remove(&conn_id);
            if subscribers.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Deliver `event` to every current subscriber of `room`. Delivery order
    /// to a given subscriber matches publish order for the room. Publishing
    /// to a room with no subscribers is a silent no-op.
    pub async fn publish(&self, room: &str, event: T) -> usize {
        let recipients = {
            let rooms = self.rooms.read().await;
            match rooms.get(room) {
                Some(subscribers) => subscribers.values().cloned().collect::<Vec<_>>(),
                None => Vec::new(),
            }
        };

        let mut delivered = 0;
        for recipient in recipients {
            if recipient.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }

        delivered
    }

    pub async fn subscriber_count(&self, room: &str) -> usize {
        self.rooms.read().await.get(room).map(|subscribers| subscribers.len()).unwrap_or(0)
    }
}
