//! Read-only fan-out of broker state changes to connected clients.
//!
//! The hub only says "something changed for these two accounts"; clients
//! always re-read a server-computed snapshot rather than trusting the event.

pub mod views;

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

pub use views::{Banner, ConsentPrompt, ElevationState, PendingRequestView, SessionRole, SessionView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RequestCreated,
    RequestApproved,
    RequestRejected,
    RequestExpired,
    SessionStarted,
    SessionEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElevationEvent {
    pub kind: EventKind,
    pub subject_id: Uuid,
    pub admin_id: Uuid,
    pub target_user_id: Uuid,
}

impl ElevationEvent {
    pub fn involves(&self, account_id: Uuid) -> bool {
        self.admin_id == account_id || self.target_user_id == account_id
    }
}

/// Broadcast channel of lifecycle events.
#[derive(Clone)]
pub struct StateHub {
    tx: broadcast::Sender<ElevationEvent>,
}

impl StateHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Fire and forget; having no subscribers is normal.
    pub fn publish(&self, event: ElevationEvent) {
        let receivers = self.tx.send(event).unwrap_or(0);
        tracing::debug!("Published {:?} for {} to {} subscriber(s)", event.kind, event.subject_id, receivers);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ElevationEvent> {
        self.tx.subscribe()
    }
}

impl Default for StateHub {
    fn default() -> Self {
        Self::new(256)
    }
}
