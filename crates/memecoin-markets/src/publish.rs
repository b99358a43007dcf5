//! Notification / realtime publisher
//!
//! Fire-and-forget: publishing never fails the caller and never blocks.

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::types::EngineEvent;

/// Default broadcast buffer
const DEFAULT_CAPACITY: usize = 256;

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: EngineEvent);
}

/// Fans events out to any number of subscribers (websocket bridge, notifier, ...)
pub struct BroadcastPublisher {
    tx: broadcast::Sender<EngineEvent>,
}

impl BroadcastPublisher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: EngineEvent) {
        match &event {
            EngineEvent::MarketCreated { market_id, market_type, .. } => {
                info!("Event: market created {} ({})", market_id, market_type)
            }
            EngineEvent::MarketResolved { market_id, outcome } => {
                info!("Event: market resolved {} -> {:?}", market_id, outcome)
            }
            EngineEvent::MarketRefunded { market_id } => info!("Event: market refunded {}", market_id),
        }

        // No subscribers is fine
        if self.tx.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}
