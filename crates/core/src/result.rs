//! Execution outcomes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CONDITIONAL_STOP_MESSAGE: &str = "Script execution stopped by CONDITIONAL_STOP";

/// Lifecycle status of a command, sequence, or request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
    /// Control signal: leave the nearest enclosing loop
    BreakLoop,
    /// Control signal: skip to the next iteration of the nearest loop
    ContinueLoop,
}

impl ExecutionStatus {
    /// Loop control signals are intercepted by their owning construct.
    pub fn is_loop_signal(self) -> bool {
        matches!(self, Self::BreakLoop | Self::ContinueLoop)
    }
}

/// Why a command failed. Drives retry eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed command or missing parameters; never retried
    Validation,
    /// The desktop collaborator reported a failure; eligible for recovery
    Execution,
    /// Denylisted or unconfirmed command
    Safety,
    /// Depth exceeded, cycle detected, or malformed script
    Structural,
    /// Sequence, acquire, or interaction deadline passed
    Timeout,
    /// Cancellation observed at a safe point
    Interrupted,
}

/// The result of executing a command, sequence, or whole request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Canonical names of the commands run at this level
    #[serde(default)]
    pub executed_commands: Vec<String>,
    /// Structured payload (recovery details, loop counters, user answers)
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    fn with_status(status: ExecutionStatus, success: bool) -> Self {
        Self {
            status,
            success,
            output: String::new(),
            error_message: String::new(),
            failure: None,
            executed_commands: Vec::new(),
            result: Value::Null,
            execution_time_ms: 0,
        }
    }

    pub fn completed(output: impl Into<String>) -> Self {
        let mut r = Self::with_status(ExecutionStatus::Completed, true);
        r.output = output.into();
        r
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        let mut r = Self::with_status(ExecutionStatus::Failed, false);
        r.error_message = message.into();
        r.failure = Some(kind);
        r
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        let mut r = Self::with_status(ExecutionStatus::Cancelled, false);
        r.error_message = message.into();
        r
    }

    pub fn in_progress() -> Self {
        Self::with_status(ExecutionStatus::InProgress, false)
    }

    pub fn break_loop() -> Self {
        let mut r = Self::with_status(ExecutionStatus::BreakLoop, true);
        r.output = "break".into();
        r
    }

    /// CONDITIONAL_STOP fired: cancelled, but its sequence ends successfully.
    pub fn conditional_stop() -> Self {
        let mut r = Self::cancelled(CONDITIONAL_STOP_MESSAGE);
        r.output = "stopped".into();
        r.result = serde_json::json!({ "stopped_by": "CONDITIONAL_STOP" });
        r
    }

    pub fn continue_loop() -> Self {
        let mut r = Self::with_status(ExecutionStatus::ContinueLoop, true);
        r.output = "continue".into();
        r
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = result;
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn is_conditional_stop(&self) -> bool {
        self.status == ExecutionStatus::Cancelled
            && self.result.get("stopped_by").and_then(Value::as_str) == Some("CONDITIONAL_STOP")
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    /// Only collaborator failures are worth retrying.
    pub fn is_recoverable(&self) -> bool {
        self.status == ExecutionStatus::Failed && self.failure == Some(FailureKind::Execution)
    }

    /// Insert a key into `result`, turning it into an object if needed.
    pub fn set_result_field(&mut self, key: &str, value: Value) {
        if !self.result.is_object() {
            self.result = Value::Object(Default::default());
        }
        if let Value::Object(map) = &mut self.result {
            map.insert(key.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constructors_set_status_and_success() {
        assert!(ExecutionResult::completed("ok").success);
        let failed = ExecutionResult::failed(FailureKind::Validation, "bad");
        assert!(!failed.success);
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert!(!failed.is_recoverable());
        assert!(ExecutionResult::failed(FailureKind::Execution, "x").is_recoverable());
        assert!(ExecutionResult::break_loop().status.is_loop_signal());
    }

    #[test]
    fn conditional_stop_is_distinguishable() {
        let stop = ExecutionResult::conditional_stop();
        assert_eq!(stop.status, ExecutionStatus::Cancelled);
        assert!(stop.is_conditional_stop());
        assert!(!ExecutionResult::cancelled("declined").is_conditional_stop());
    }

    #[test]
    fn set_result_field_promotes_to_object() {
        let mut r = ExecutionResult::completed("");
        r.set_result_field("iterations", json!(3));
        assert_eq!(r.result["iterations"], 3);
    }

    #[test]
    fn status_serializes_screaming_case() {
        let s = serde_json::to_string(&ExecutionStatus::BreakLoop).unwrap();
        assert_eq!(s, "\"BREAK_LOOP\"");
    }
}
