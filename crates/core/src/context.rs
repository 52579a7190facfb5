//! Per-request execution state.
//!
//! An [`ExecutionContext`] is owned by exactly one execution at a time.
//! Nested scripts get a copy through [`ExecutionContext::child_for_script`]
//! and hand their variables back through [`ExecutionContext::merge_child`].

use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::environment::EnvironmentSnapshot;

/// Typed variable store: string, number, bool, array, or object values.
pub type Variables = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub request_id: String,
    pub original_request: String,
    pub variables: Variables,
    /// Append-only
    pub execution_log: Vec<String>,
    pub current_environment: Option<EnvironmentSnapshot>,
    pub requires_user_confirmation: bool,
    pub nesting_level: usize,
    pub max_nesting_level: usize,
    /// Scripts currently executing, outermost first
    pub script_stack: Vec<String>,
    pub sub_script_results: Variables,
    /// Observed at safe points: between commands and while waiting
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub const DEFAULT_MAX_NESTING: usize = 3;

    pub fn new(request_id: impl Into<String>, original_request: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            original_request: original_request.into(),
            variables: Variables::new(),
            execution_log: Vec::new(),
            current_environment: None,
            requires_user_confirmation: false,
            nesting_level: 0,
            max_nesting_level: Self::DEFAULT_MAX_NESTING,
            script_stack: Vec::new(),
            sub_script_results: Variables::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_max_nesting(mut self, max_nesting_level: usize) -> Self {
        self.max_nesting_level = max_nesting_level;
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn log(&mut self, entry: impl Into<String>) {
        self.execution_log.push(entry.into());
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Strings come back unquoted, everything else JSON-rendered.
    pub fn variable_as_string(&self, name: &str) -> Option<String> {
        self.variables.get(name).map(value_to_plain_string)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether another EXECUTE_SCRIPT level is allowed.
    pub fn can_nest(&self) -> bool {
        self.nesting_level < self.max_nesting_level
    }

    pub fn in_call_stack(&self, script_path: &str) -> bool {
        self.script_stack.iter().any(|p| p == script_path)
    }

    /// `a -> b -> c` rendering of the call stack, for error messages.
    pub fn call_stack_display(&self) -> String {
        self.script_stack.join(" -> ")
    }

    /// Build the context a nested script runs in.
    ///
    /// Variables are copied, the script is pushed onto a copied call stack,
    /// and nesting increases by one. The cancellation token is shared.
    pub fn child_for_script(&self, script_path: &str) -> ExecutionContext {
        let mut script_stack = self.script_stack.clone();
        script_stack.push(script_path.to_string());

        ExecutionContext {
            request_id: format!("{}/{}", self.request_id, script_path),
            original_request: self.original_request.clone(),
            variables: self.variables.clone(),
            execution_log: Vec::new(),
            current_environment: self.current_environment.clone(),
            requires_user_confirmation: self.requires_user_confirmation,
            nesting_level: self.nesting_level + 1,
            max_nesting_level: self.max_nesting_level,
            script_stack,
            sub_script_results: Variables::new(),
            cancel: self.cancel.clone(),
        }
    }

    /// Fold a finished child back in. Child variables win on collision.
    pub fn merge_child(&mut self, child: ExecutionContext, script_path: &str, summary: Value) {
        for (name, value) in child.variables {
            self.variables.insert(name, value);
        }
        for (name, value) in child.sub_script_results {
            self.sub_script_results.insert(name, value);
        }
        self.sub_script_results.insert(script_path.to_string(), summary);
        for entry in child.execution_log {
            self.execution_log.push(format!("[{script_path}] {entry}"));
        }
    }

    /// A serializable view for planners and recovery snapshots.
    pub fn snapshot(&self) -> Value {
        json!({
            "request_id": self.request_id,
            "original_request": self.original_request,
            "variables": self.variables,
            "nesting_level": self.nesting_level,
            "script_stack": self.script_stack,
            "sub_script_results": self.sub_script_results,
        })
    }
}

/// Render a value for text substitution: strings unquoted, others as JSON.
pub fn value_to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
