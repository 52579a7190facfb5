//! Condition expressions for loops and BREAK_IF / CONTINUE_IF.

use std::cmp::Ordering;
use std::sync::LazyLock;

use deskpilot_core::{ExecutionContext, value_to_plain_string};
use regex_lite::Regex;
use serde_json::Value;

use crate::substitution::{Substitutor, has_expression};

static COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s*(==|!=|>=|<=|>|<)\s*(.+)$").expect("Invalid comparison pattern")
});

static BARE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid name pattern"));

/// Evaluate `expr` against the context.
///
/// Comparisons `==` and `!=` compare strings; the ordering operators compare
/// numerically when both sides parse as numbers, lexicographically otherwise.
/// A bare expression holds when it resolves to `true` or `1`.
pub fn evaluate(expr: &str, ctx: &ExecutionContext, substitutor: &Substitutor) -> bool {
    let expr = expr.trim();

    if let Some(caps) = COMPARISON.captures(expr) {
        let left = resolve_operand(&caps[1], ctx, substitutor, true);
        let right = resolve_operand(&caps[3], ctx, substitutor, false);
        return compare(&left, &caps[2], &right);
    }

    let value = resolve_operand(expr, ctx, substitutor, true);
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1")
}

/// True for `true`, or the strings `true`, `1`, `yes` (any case).
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() == Some(1.0),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    }
}

fn resolve_operand(raw: &str, ctx: &ExecutionContext, substitutor: &Substitutor, left: bool) -> String {
    let raw = raw.trim();
    // A bare variable name on the left reads as `${name}`
    if left
        && !has_expression(raw)
        && BARE_NAME.is_match(raw)
        && let Some(value) = ctx.variable(raw)
    {
        return value_to_plain_string(value);
    }
    strip_quotes(&substitutor.substitute_str(raw, ctx)).to_string()
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

fn compare(left: &str, op: &str, right: &str) -> bool {
    match op {
        "==" => left == right,
        "!=" => left != right,
        _ => {
            let ordering = match (left.parse::<f64>(), right.parse::<f64>()) {
                (Ok(l), Ok(r)) => l.partial_cmp(&r),
                _ => Some(left.cmp(right)),
            };
            let Some(ordering) = ordering else {
                return false;
            };
            match op {
                ">" => ordering == Ordering::Greater,
                "<" => ordering == Ordering::Less,
                ">=" => ordering != Ordering::Less,
                "<=" => ordering != Ordering::Greater,
                _ => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        let mut ctx = ExecutionContext::new("r", "");
        ctx.set_variable("count", 3);
        ctx.set_variable("status", "done");
        ctx.set_variable("flag", true);
        ctx
    }

    #[test]
    fn string_equality() {
        let s = Substitutor::default();
        assert!(evaluate("status == done", &ctx(), &s));
        assert!(evaluate("${status} == \"done\"", &ctx(), &s));
        assert!(evaluate("status != pending", &ctx(), &s));
        assert!(!evaluate("status == Done", &ctx(), &s));
    }

    #[test]
    fn numeric_ordering() {
        let s = Substitutor::default();
        assert!(evaluate("count < 10", &ctx(), &s));
        assert!(evaluate("${count} >= 3", &ctx(), &s));
        assert!(!evaluate("count > 3", &ctx(), &s));
        // 10 < 9 lexicographically, but numerically it is not
        assert!(evaluate("10 > 9", &ctx(), &s));
    }

    #[test]
    fn lexicographic_fallback() {
        let s = Substitutor::default();
        assert!(evaluate("status > apple", &ctx(), &s));
        assert!(evaluate("abc <= abd", &ctx(), &s));
    }

    #[test]
    fn bare_expressions() {
        let s = Substitutor::default();
        assert!(evaluate("flag", &ctx(), &s));
        assert!(evaluate("${flag}", &ctx(), &s));
        assert!(evaluate("1", &ctx(), &s));
        assert!(!evaluate("status", &ctx(), &s));
        assert!(!evaluate("undefined_thing", &ctx(), &s));
    }

    #[test]
    fn undefined_left_name_is_literal() {
        let s = Substitutor::default();
        assert!(evaluate("pending == pending", &ctx(), &s));
    }

    #[test]
    fn truthiness() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!("YES")));
        assert!(is_truthy(&json!("1")));
        assert!(!is_truthy(&json!("no")));
        assert!(!is_truthy(&Value::Null));
    }
}
