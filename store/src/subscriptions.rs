use log::{debug, error};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

use common::ProcessedAgentData;

pub type ConnectionId = usize;

/// Live-update channels keyed by the user they watch.
///
/// Every WebSocket session owns one unbounded receiver; notifying only
/// enqueues, so a slow client never holds up the writer.
#[derive(Default)]
pub struct Subscriptions {
    next_connection_id: AtomicUsize,
    channels: RwLock<HashMap<i64, HashMap<ConnectionId, mpsc::UnboundedSender<String>>>>,
}

impl Subscriptions {
    pub fn subscribe(&self, user_id: i64) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .write()
            .entry(user_id)
            .or_default()
            .insert(connection_id, tx);
        (connection_id, rx)
    }

    pub fn unsubscribe(&self, user_id: i64, connection_id: ConnectionId) {
        let mut channels = self.channels.write();
        if let Some(connections) = channels.get_mut(&user_id) {
            connections.remove(&connection_id);
            if connections.is_empty() {
                channels.remove(&user_id);
            }
        }
    }

    pub fn subscriber_count(&self, user_id: i64) -> usize {
        self.channels
            .read()
            .get(&user_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Queues the item for every subscriber of its user and returns how many
    /// subscribers accepted it. Closed channels are pruned.
    pub fn notify(&self, user_id: i64, data: &ProcessedAgentData) -> usize {
        if self.subscriber_count(user_id) == 0 {
            return 0;
        }

        let payload = match serde_json::to_string(data) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode live update for user {}: {}", user_id, e);
                return 0;
            }
        };

        let mut closed = Vec::new();
        let mut delivered = 0;
        if let Some(connections) = self.channels.read().get(&user_id) {
            for (connection_id, tx) in connections {
                if tx.send(payload.clone()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(*connection_id);
                }
            }
        }

        for connection_id in closed {
            debug!("Dropping closed subscriber {} of user {}", connection_id, user_id);
            self.unsubscribe(user_id, connection_id);
        }

        delivered
    }
}
