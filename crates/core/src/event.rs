//! Domain event system: decoupled notification between subsystems.
//!
//! The orchestrator publishes events as requests move through the system;
//! front ends and diagnostics subscribe without coupling to the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::result::ExecutionStatus;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A request was accepted into the queue
    RequestQueued {
        request_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A top-level request finished (any terminal status)
    RequestCompleted {
        request_id: String,
        status: ExecutionStatus,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A single command ran
    CommandExecuted {
        command: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The feedback loop saw a meaningful desktop change
    EnvironmentChanged {
        summary: String,
        significant: bool,
        timestamp: DateTime<Utc>,
    },

    /// Failure recovery finished a round of attempts
    RecoveryAttempted {
        recovery_id: String,
        strategy: String,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// A human-input request was registered
    InteractionRequested {
        interaction_id: String,
        input_type: String,
        urgent: bool,
        timestamp: DateTime<Utc>,
    },

    ExecutionPaused {
        timestamp: DateTime<Utc>,
    },

    ExecutionResumed {
        timestamp: DateTime<Utc>,
    },

    EmergencyStop {
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Publishing is
/// synchronous, so worker threads can publish without a runtime.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
