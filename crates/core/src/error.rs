//! Error types for the deskpilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! converts from all of them.
//!
//! Command execution itself does not return these errors to callers. A failed
//! command is an [`ExecutionResult`](crate::ExecutionResult) with a
//! [`FailureKind`](crate::FailureKind). These types cover the services around
//! execution: collaborators, pools, scripts, and registries.

use thiserror::Error;

/// The top-level error type for all deskpilot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Collaborator errors ---
    #[error("Desktop control error: {0}")]
    Control(#[from] ControlError),

    #[error("Perception error: {0}")]
    Perception(#[from] PerceptionError),

    #[error("Planner error: {0}")]
    Planner(#[from] PlannerError),

    #[error("User interface error: {0}")]
    Interface(#[from] InterfaceError),

    // --- Execution substrate ---
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Resource pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] WorkerPoolError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    // --- Registries ---
    #[error("Interaction error: {0}")]
    Interaction(#[from] InteractionError),

    #[error("Conversation error: {0}")]
    Conversation(#[from] ConversationError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ControlError {
    #[error("{operation} failed: {message}")]
    Failed { operation: String, message: String },

    #[error("Operation not supported by this desktop backend: {0}")]
    Unsupported(String),
}

impl ControlError {
    pub fn failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum PerceptionError {
    #[error("Perception unavailable: {0}")]
    Unavailable(String),

    #[error("Screen capture failed: {0}")]
    CaptureFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum PlannerError {
    #[error("Planner not configured: {0}")]
    NotConfigured(String),

    #[error("Planning request failed: {0}")]
    RequestFailed(String),

    #[error("Planner returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Planning request timed out: {0}")]
    Timeout(String),
}

#[derive(Debug, Clone, Error)]
pub enum InterfaceError {
    #[error("User interface unavailable: {0}")]
    Unavailable(String),

    #[error("Prompt aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    #[error("Invalid script path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Script not found: {path}")]
    NotFound { path: String },

    #[error("Failed to read script {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse script {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Malformed script {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("Maximum script nesting level ({max}) exceeded while executing {path}")]
    DepthExceeded { path: String, max: usize },

    #[error("Circular script dependency detected: {path} (call stack: {stack})")]
    Cycle { path: String, stack: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoolError {
    #[error("Timeout waiting for connection after {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    #[error("Connection pool is shutting down")]
    ShuttingDown,

    #[error("Failed to create pooled resource: {0}")]
    Factory(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkerPoolError {
    #[error("Cannot submit task: worker pool is stopped")]
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(u64),

    #[error("Task {task_id} did not finish within {waited_ms}ms")]
    Timeout { task_id: u64, waited_ms: u64 },

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Task was discarded before it ran")]
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InteractionError {
    #[error("User interaction not found: {0}")]
    NotFound(String),

    #[error("User interaction already has a response: {0}")]
    AlreadyAnswered(String),

    #[error("Invalid response for interaction {interaction_id}: {reason}")]
    InvalidResponse {
        interaction_id: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversationError {
    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Conversation {conversation_id} reached its turn limit ({max_turns})")]
    TurnLimit {
        conversation_id: String,
        max_turns: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_error_displays_operation() {
        let err = Error::Control(ControlError::failed("mouse.click", "no display"));
        assert!(err.to_string().contains("mouse.click"));
        assert!(err.to_string().contains("no display"));
    }

    #[test]
    fn script_cycle_error_lists_stack() {
        let err = ScriptError::Cycle {
            path: "scripts/a.json".into(),
            stack: "scripts/a.json -> scripts/b.json".into(),
        };
        assert!(err.to_string().contains("Circular"));
        assert!(err.to_string().contains("scripts/b.json"));
    }

    #[test]
    fn pool_timeout_mentions_connection() {
        let err = PoolError::Timeout { waited_ms: 250 };
        assert!(err.to_string().contains("Timeout waiting for connection"));
    }
}
