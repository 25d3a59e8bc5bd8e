//! Event Publisher - Broadcasts committed ledger mutations
//!
//! Every committed `create` and `approve` produces one [`LedgerEvent`].
//! Events go out on a tokio broadcast channel and into an in-order history.
//! Sending never waits on subscribers: a lagging receiver loses the oldest
//! events and can catch up from [`EventPublisher::history`].

use crate::models::EscrowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Configuration for the event publisher
#[derive(Debug, Clone)]
pub struct EventPublisherConfig {
    /// Broadcast buffer size per subscriber
    pub channel_capacity: usize,
}

impl Default for EventPublisherConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

/// Ledger event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id")]
pub enum LedgerEventKind {
    /// A record was created
    Created(EscrowId),
    /// A record was approved and paid out
    Approved(EscrowId),
}

/// A committed ledger event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Unique per event, for deduplication by at-least-once consumers
    pub delivery_id: Uuid,
    pub kind: LedgerEventKind,
    pub committed_at: DateTime<Utc>,
}

impl LedgerEvent {
    pub fn new(kind: LedgerEventKind) -> Self {
        Self {
            delivery_id: Uuid::new_v4(),
            kind,
            committed_at: Utc::now(),
        }
    }
}

/// Fan-out of committed events to external observers
#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<LedgerEvent>,
    history: Arc<RwLock<Vec<LedgerEvent>>>,
}

impl EventPublisher {
    pub fn new(config: EventPublisherConfig) -> Self {
        let (tx, _rx) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            tx,
            history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Subscribe to events committed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.tx.subscribe()
    }

    /// Record and broadcast an event. Must only be called after commit.
    pub async fn publish(&self, kind: LedgerEventKind) -> LedgerEvent {
        let event = LedgerEvent::new(kind);
        self.history.write().await.push(event.clone());

        // No receivers is not an error: observers are optional.
        match self.tx.send(event.clone()) {
            Ok(receivers) => debug!("Published {:?} to {} subscribers", kind, receivers),
            Err(_) => debug!("Published {:?} with no subscribers", kind),
        }

        event
    }

    /// All events published by this process, in commit order
    pub async fn history(&self) -> Vec<LedgerEvent> {
        self.history.read().await.clone()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(EventPublisherConfig::default())
    }
}
