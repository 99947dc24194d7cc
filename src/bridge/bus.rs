//! In-process live-update bus
//!
//! Publishing is an observability side channel: subscribers watch runs
//! progress, nothing is dispatched through the bus.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::{BridgeError, LiveBus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
}

/// Fan-out bus backed by a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<BusMessage>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Receive every message published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl LiveBus for BroadcastBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BridgeError> {
        let message = BusMessage {
            topic: topic.to_string(),
            payload,
        };
        // No subscribers is not an error for a side channel
        if self.tx.send(message).is_err() {
            debug!(topic, "Published with no live subscribers");
        }
        Ok(())
    }
}
