//! Control commands: variables, conditionals, stops, and loop signals.

use deskpilot_core::{Command, ExecutionContext, ExecutionResult, FailureKind, value_to_plain_string};
use serde_json::Value;
use tracing::debug;

use crate::condition::{self, is_truthy};
use crate::substitution::Substitutor;

/// Execute a Control-category command. `command.action` is canonical.
pub fn execute(command: &Command, ctx: &mut ExecutionContext, substitutor: &Substitutor) -> ExecutionResult {
    match command.action.as_str() {
        "SET_VARIABLE" => set_variable(command, ctx),
        "GET_VARIABLE" => get_variable(command, ctx),
        "IF_CONTAINS" => if_contains(command, ctx, false),
        "IF_NOT_CONTAINS" => if_contains(command, ctx, true),
        "IF_EQUALS" => if_equals(command, ctx, false),
        "IF_NOT_EQUALS" => if_equals(command, ctx, true),
        "CONDITIONAL_STOP" => conditional_stop(command, ctx),
        "BREAK_IF" => loop_signal(command, ctx, substitutor, true),
        "CONTINUE_IF" => loop_signal(command, ctx, substitutor, false),
        other => ExecutionResult::failed(
            FailureKind::Validation,
            format!("Unknown control command: {other}"),
        ),
    }
}

pub(crate) fn missing_param(command: &str, param: &str) -> ExecutionResult {
    ExecutionResult::failed(
        FailureKind::Validation,
        format!("{command} requires '{param}' parameter"),
    )
}

fn set_variable(command: &Command, ctx: &mut ExecutionContext) -> ExecutionResult {
    let Some(name) = command.str_param("name") else {
        return missing_param("SET_VARIABLE", "name");
    };
    let Some(value) = command.param("value") else {
        return missing_param("SET_VARIABLE", "value");
    };
    let name = name.to_string();
    ctx.set_variable(name.clone(), value.clone());
    debug!(variable = %name, "Variable set");
    ExecutionResult::completed(format!("Variable '{name}' set"))
}

fn get_variable(command: &Command, ctx: &ExecutionContext) -> ExecutionResult {
    let Some(name) = command.str_param("name") else {
        return missing_param("GET_VARIABLE", "name");
    };
    match ctx.variable(name) {
        Some(value) => ExecutionResult::completed(value_to_plain_string(value)).with_result(value.clone()),
        None => ExecutionResult::failed(
            FailureKind::Validation,
            format!("Variable '{name}' not found"),
        ),
    }
}

/// The named variable as lower-cased text; missing variables read as empty.
fn variable_text(ctx: &ExecutionContext, name: &str) -> String {
    ctx.variable_as_string(name).unwrap_or_default().to_lowercase()
}

fn store_flag(command: &Command, ctx: &mut ExecutionContext, flag: bool) -> ExecutionResult {
    if let Some(target) = command.str_param("store_as") {
        ctx.set_variable(target.to_string(), flag);
    }
    ExecutionResult::completed(flag.to_string()).with_result(Value::Bool(flag))
}

fn if_contains(command: &Command, ctx: &mut ExecutionContext, negate: bool) -> ExecutionResult {
    let name = if negate { "IF_NOT_CONTAINS" } else { "IF_CONTAINS" };
    let Some(variable) = command.str_param("variable") else {
        return missing_param(name, "variable");
    };
    let Some(substring) = command.param("substring") else {
        return missing_param(name, "substring");
    };
    let haystack = variable_text(ctx, variable);
    let needle = value_to_plain_string(substring).to_lowercase();
    let flag = haystack.contains(&needle) != negate;
    store_flag(command, ctx, flag)
}

fn if_equals(command: &Command, ctx: &mut ExecutionContext, negate: bool) -> ExecutionResult {
    let name = if negate { "IF_NOT_EQUALS" } else { "IF_EQUALS" };
    let Some(variable) = command.str_param("variable") else {
        return missing_param(name, "variable");
    };
    let Some(expected) = command.param("value") else {
        return missing_param(name, "value");
    };
    let actual = variable_text(ctx, variable);
    let expected = value_to_plain_string(expected).to_lowercase();
    let flag = (actual == expected) != negate;
    store_flag(command, ctx, flag)
}

fn conditional_stop(command: &Command, ctx: &ExecutionContext) -> ExecutionResult {
    let Some(variable) = command.str_param("condition_variable") else {
        return missing_param("CONDITIONAL_STOP", "condition_variable");
    };
    let invert = command.param("invert").is_some_and(is_truthy);
    let holds = ctx.variable(variable).is_some_and(is_truthy) != invert;

    if holds {
        debug!(variable = %variable, "CONDITIONAL_STOP triggered");
        ExecutionResult::conditional_stop()
    } else {
        ExecutionResult::completed("continue")
    }
}

fn loop_signal(
    command: &Command,
    ctx: &ExecutionContext,
    substitutor: &Substitutor,
    is_break: bool,
) -> ExecutionResult {
    let holds = if let Some(variable) = command.str_param("condition_variable") {
        ctx.variable(variable).is_some_and(is_truthy)
    } else if let Some(expr) = command.str_param("condition") {
        condition::evaluate(expr, ctx, substitutor)
    } else {
        let name = if is_break { "BREAK_IF" } else { "CONTINUE_IF" };
        return missing_param(name, "condition");
    };

    match (holds, is_break) {
        (true, true) => ExecutionResult::break_loop(),
        (true, false) => ExecutionResult::continue_loop(),
        (false, _) => ExecutionResult::completed("false"),
    }
}
