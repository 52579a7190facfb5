//! `${...}` variable substitution.
//!
//! Supported expression forms:
//! - `${name}`: plain variable
//! - `${name[2]}`: array element; out of range or not an array gives an
//!   empty string and a warning
//! - `${name.field.sub}`: object path; a missing segment gives an empty string
//!
//! Names that are not variables fall back to sub-script results. Expansion
//! repeats until no expression remains or the iteration cap is reached.
//! Hitting the cap is logged, never fatal.

use std::sync::LazyLock;

use deskpilot_core::{Command, ExecutionContext, value_to_plain_string};
use regex_lite::{Captures, Regex};
use serde_json::Value;
use tracing::{debug, error, warn};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

static VARIABLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("Invalid variable pattern"));

/// Whether `text` contains at least one `${...}` expression.
pub fn has_expression(text: &str) -> bool {
    VARIABLE_PATTERN.is_match(text)
}

/// Expands `${...}` expressions against an [`ExecutionContext`].
#[derive(Debug, Clone, Copy)]
pub struct Substitutor {
    max_iterations: usize,
}

impl Default for Substitutor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

impl Substitutor {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn substitute_str(&self, text: &str, ctx: &ExecutionContext) -> String {
        if !has_expression(text) {
            return text.to_string();
        }

        let mut current = text.to_string();
        for _ in 0..self.max_iterations {
            if !has_expression(&current) {
                return current;
            }
            current = VARIABLE_PATTERN
                .replace_all(&current, |caps: &Captures<'_>| resolve_expression(&caps[1], ctx))
                .into_owned();
        }

        if has_expression(&current) {
            error!(
                request_id = %ctx.request_id,
                iterations = self.max_iterations,
                text = %text,
                "Variable substitution reached the iteration cap"
            );
        }
        current
    }

    /// Substitute every string inside `value`, recursing into arrays and
    /// objects. Non-string leaves are untouched.
    pub fn substitute_value(&self, value: &Value, ctx: &ExecutionContext) -> Value {
        match value {
            Value::String(s) => Value::String(self.substitute_str(s, ctx)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.substitute_value(v, ctx)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.substitute_value(v, ctx)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// A copy of `command` with parameters substituted, except `skip` keys.
    pub fn substitute_command(&self, command: &Command, ctx: &ExecutionContext, skip: &[&str]) -> Command {
        let mut substituted = command.clone();
        for (name, value) in substituted.parameters.iter_mut() {
            if skip.contains(&name.as_str()) {
                continue;
            }
            *value = self.substitute_value(value, ctx);
        }
        substituted
    }
}

/// Resolve one expression body (the text between `${` and `}`).
fn resolve_expression(expr: &str, ctx: &ExecutionContext) -> String {
    let expr = expr.trim();

    // A variable whose name itself contains dots or brackets wins
    if let Some(value) = lookup_root(expr, ctx) {
        return value_to_plain_string(value);
    }

    let mut segments = expr.split('.');
    let Some(first) = segments.next() else {
        return String::new();
    };
    let (root_name, root_index) = split_index(first);

    let Some(mut current) = lookup_root(root_name, ctx) else {
        debug!(variable = %root_name, "Unresolved variable substituted with empty string");
        return String::new();
    };

    if let Some(index) = root_index {
        match index_into(current, root_name, index) {
            Some(v) => current = v,
            None => return String::new(),
        }
    }

    for segment in segments {
        let (field, index) = split_index(segment);
        match current.get(field) {
            Some(v) => current = v,
            None => {
                debug!(path = %expr, segment = %field, "Missing object path segment");
                return String::new();
            }
        }
        if let Some(index) = index {
            match index_into(current, field, index) {
                Some(v) => current = v,
                None => return String::new(),
            }
        }
    }

    value_to_plain_string(current)
}

fn lookup_root<'a>(name: &str, ctx: &'a ExecutionContext) -> Option<&'a Value> {
    ctx.variables
        .get(name)
        .or_else(|| ctx.sub_script_results.get(name))
}

/// `items[3]` → (`items`, Some("3")).
fn split_index(segment: &str) -> (&str, Option<&str>) {
    if let Some(open) = segment.find('[')
        && segment.ends_with(']')
    {
        return (&segment[..open], Some(&segment[open + 1..segment.len() - 1]));
    }
    (segment, None)
}

fn index_into<'a>(value: &'a Value, name: &str, index: &str) -> Option<&'a Value> {
    let Ok(i) = index.trim().parse::<usize>() else {
        warn!(variable = %name, index = %index, "Array index is not a non-negative integer");
        return None;
    };
    match value {
        Value::Array(items) => {
            let item = items.get(i);
            if item.is_none() {
                warn!(variable = %name, index = i, len = items.len(), "Array index out of range");
            }
            item
        }
        _ => {
            warn!(variable = %name, "Indexed variable is not an array");
            None
        }
    }
}
