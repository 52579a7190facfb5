//! The command record the planner emits and the interpreter executes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Pixel offset tried around a mouse target that did not work.
pub const MOUSE_OFFSET: i64 = 5;

/// A single automation step.
///
/// Commands are produced upstream and treated as immutable; the interpreter
/// builds a substituted copy per execution. Both the dotted planner form
/// (`{"action": "mouse.click", "params": {...}}`) and the script form
/// (`{"command": "MOUSE_CLICK", "parameters": {...}}`) deserialize into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Namespaced action name (e.g. `mouse.click` or `MOUSE_CLICK`)
    #[serde(alias = "command")]
    pub action: String,

    /// Named parameters; string values may contain `${...}` expressions
    #[serde(default, alias = "params")]
    pub parameters: Map<String, Value>,

    /// Free-form metadata carried along for logging and planners
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,

    /// Delay after this step; falls back to the configured default
    #[serde(
        default,
        rename = "delayAfterMs",
        alias = "delay_after_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub delay_after_ms: Option<u64>,

    /// Optional steps may fail without aborting their sequence
    #[serde(default)]
    pub optional: bool,

    /// Store this command's output under the named variable on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_variable: Option<String>,

    /// Human-readable description, used in recovery attempt history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Command {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            parameters: Map::new(),
            metadata: Map::new(),
            delay_after_ms: None,
            optional: false,
            result_variable: None,
            description: None,
        }
    }

    /// Builder-style parameter insertion.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_after_ms = Some(delay_ms);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_result_variable(mut self, name: impl Into<String>) -> Self {
        self.result_variable = Some(name.into());
        self
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    /// A string parameter, if present and a string.
    pub fn str_param(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(Value::as_str)
    }

    /// An integer screen coordinate. Accepts numbers and numeric strings,
    /// rounds fractions, and reads anything else as 0.
    pub fn coordinate(&self, name: &str) -> i64 {
        match self.parameters.get(name) {
            Some(Value::Number(n)) => n.as_f64().map(|f| f.round() as i64).unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse::<f64>().map(|f| f.round() as i64).unwrap_or(0),
            _ => 0,
        }
    }

    /// A copy aimed `(dx, dy)` pixels away from this command's `x`/`y`.
    pub fn offset_by(&self, dx: i64, dy: i64) -> Command {
        let (x, y) = (self.coordinate("x"), self.coordinate("y"));
        self.clone().with_param("x", x + dx).with_param("y", y + dy)
    }

    /// Parse a JSON array of command objects.
    pub fn list_from_value(value: &Value) -> Result<Vec<Command>, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    /// `NAME (k=v, k=v)` form used in confirmation prompts and logs.
    pub fn describe(&self) -> String {
        if self.parameters.is_empty() {
            return self.action.clone();
        }
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}={s}"),
                other => format!("{k}={other}"),
            })
            .collect();
        format!("{} ({})", self.action, params.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_script_form() {
        let cmd: Command = serde_json::from_value(json!({
            "command": "SET_VARIABLE",
            "parameters": {"name": "x", "value": 5},
            "delayAfterMs": 0
        }))
        .unwrap();
        assert_eq!(cmd.action, "SET_VARIABLE");
        assert_eq!(cmd.param("value"), Some(&json!(5)));
        assert_eq!(cmd.delay_after_ms, Some(0));
        assert!(!cmd.optional);
    }

    #[test]
    fn deserializes_planner_form() {
        let cmd: Command = serde_json::from_value(json!({
            "action": "mouse.click",
            "params": {"x": 10, "y": 20},
            "optional": true,
            "description": "Click OK"
        }))
        .unwrap();
        assert_eq!(cmd.action, "mouse.click");
        assert_eq!(cmd.param("x"), Some(&json!(10)));
        assert!(cmd.optional);
        assert_eq!(cmd.description.as_deref(), Some("Click OK"));
    }

    #[test]
    fn offset_reads_loose_coordinates() {
        let cmd = Command::new("MOUSE_CLICK").with_param("x", "12.6").with_param("y", 7.2);
        assert_eq!(cmd.coordinate("x"), 13);
        assert_eq!(cmd.coordinate("missing"), 0);

        let moved = cmd.offset_by(-5, 5);
        assert_eq!(moved.param("x"), Some(&json!(8)));
        assert_eq!(moved.param("y"), Some(&json!(12)));
        assert_eq!(moved.action, "MOUSE_CLICK");
    }

    #[test]
    fn describe_lists_parameters() {
        let cmd = Command::new("SYSTEM_RUN_COMMAND").with_param("command", "dir");
        assert_eq!(cmd.describe(), "SYSTEM_RUN_COMMAND (command=dir)");
        assert_eq!(Command::new("WAIT").describe(), "WAIT");
    }
}
