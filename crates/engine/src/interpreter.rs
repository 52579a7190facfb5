//! The control-flow interpreter.
//!
//! [`ExecutionEngine::execute`] runs one command: resolve its name,
//! substitute its parameters, apply the safety policy, then route it by
//! category. [`ExecutionEngine::execute_sequence`] runs commands in order
//! with delays, deadlines, and cancellation checks between them. Loops and
//! nested scripts recurse through the same two entry points.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use deskpilot_config::ExecutionConfig;
use deskpilot_core::error::ScriptError;
use deskpilot_core::{
    Command, DesktopControl, DomainEvent, EventBus, ExecutionContext, ExecutionResult,
    ExecutionStatus, FailureKind, UserInterface, Variables,
};
use deskpilot_security::CommandPolicy;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::condition;
use crate::control;
use crate::handlers::DesktopHandlers;
use crate::names::{self, Category, CommandSpec};
use crate::scripts::ScriptManager;
use crate::substitution::Substitutor;

/// Hook invoked when a non-optional command in a sequence fails with an
/// execution error.
///
/// Returning `Some` replaces the failed result: a successful replacement lets
/// the sequence continue. Returning `None` keeps the original failure.
pub trait FailureHandler: Send + Sync {
    fn handle_failure(
        &self,
        command: &Command,
        failure: &ExecutionResult,
        ctx: &mut ExecutionContext,
        engine: &ExecutionEngine,
    ) -> Option<ExecutionResult>;
}

/// Options for one sequence run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceOptions {
    /// Treat every command as optional
    pub continue_on_failure: bool,
    /// Propagate BREAK_LOOP / CONTINUE_LOOP to the enclosing loop
    pub in_loop: bool,
}

pub struct ExecutionEngine {
    handlers: DesktopHandlers,
    ui: Arc<dyn UserInterface>,
    scripts: Arc<ScriptManager>,
    policy: CommandPolicy,
    substitutor: Substitutor,
    settings: ExecutionConfig,
    failure_handler: RwLock<Option<Arc<dyn FailureHandler>>>,
    events: Option<Arc<EventBus>>,
}

impl ExecutionEngine {
    pub fn new(
        desktop: Arc<dyn DesktopControl>,
        ui: Arc<dyn UserInterface>,
        scripts: Arc<ScriptManager>,
        settings: ExecutionConfig,
    ) -> Self {
        Self {
            handlers: DesktopHandlers::new(desktop),
            ui,
            scripts,
            policy: CommandPolicy::new(settings.confirmation_required),
            substitutor: Substitutor::new(settings.substitution_max_iterations),
            settings,
            failure_handler: RwLock::new(None),
            events: None,
        }
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn set_failure_handler(&self, handler: Arc<dyn FailureHandler>) {
        *self.failure_handler.write().unwrap() = Some(handler);
    }

    pub fn clear_failure_handler(&self) {
        *self.failure_handler.write().unwrap() = None;
    }

    pub fn scripts(&self) -> &Arc<ScriptManager> {
        &self.scripts
    }

    pub fn settings(&self) -> &ExecutionConfig {
        &self.settings
    }

    pub fn substitutor(&self) -> &Substitutor {
        &self.substitutor
    }

    pub fn desktop(&self) -> &Arc<dyn DesktopControl> {
        self.handlers.desktop()
    }

    // ── Single command ──────────────────────────────────────────────────

    /// Execute one command against `ctx`.
    ///
    /// Never returns an error: every outcome, including validation and
    /// safety failures, is an [`ExecutionResult`].
    pub fn execute(&self, command: &Command, ctx: &mut ExecutionContext) -> ExecutionResult {
        let started = Instant::now();

        let Some(spec) = names::resolve(&command.action) else {
            warn!(request_id = %ctx.request_id, command = %command.action, "Unknown command");
            return ExecutionResult::failed(
                FailureKind::Validation,
                format!("Unknown command type: {}", command.action),
            );
        };

        let mut prepared = self.prepare(command, spec, ctx);
        prepared.action = spec.name.to_string();

        if let Some(declined) = self.confirm(&prepared) {
            ctx.log(format!("{}: cancelled by safety policy", spec.name));
            return declined;
        }

        debug!(request_id = %ctx.request_id, command = %spec.name, "Executing command");
        let mut result = match spec.category {
            Category::Mouse
            | Category::Keyboard
            | Category::Application
            | Category::System
            | Category::Window => {
                let sleep = |ctx: &ExecutionContext, d: Duration| self.interruptible_sleep(ctx, d);
                self.handlers.execute(spec.category, &prepared, ctx, &sleep)
            }
            Category::Wait => self.wait(&prepared, ctx),
            Category::Control => control::execute(&prepared, ctx, &self.substitutor),
            Category::Loop => self.while_loop(&prepared, ctx),
            Category::Script => self.script_command(&prepared, ctx),
        };

        if result.is_completed()
            && let Some(variable) = &command.result_variable
        {
            ctx.set_variable(variable.clone(), result.output.clone());
        }

        if result.executed_commands.is_empty() {
            result.executed_commands.push(spec.name.to_string());
        }
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        ctx.log(format!("{}: {:?}", spec.name, result.status));

        if let Some(events) = &self.events {
            events.publish(DomainEvent::CommandExecuted {
                command: spec.name.to_string(),
                success: result.success,
                duration_ms: result.execution_time_ms,
                timestamp: Utc::now(),
            });
        }
        result
    }

    /// Substituted copy of `command`. Loops substitute lazily per
    /// evaluation, and loop-signal conditions are evaluated raw.
    fn prepare(&self, command: &Command, spec: CommandSpec, ctx: &ExecutionContext) -> Command {
        match spec.name {
            "WHILE_LOOP" => command.clone(),
            "BREAK_IF" | "CONTINUE_IF" => {
                self.substitutor.substitute_command(command, ctx, &["condition"])
            }
            _ => self.substitutor.substitute_command(command, ctx, &[]),
        }
    }

    /// Returns the CANCELLED result if the user declines.
    fn confirm(&self, command: &Command) -> Option<ExecutionResult> {
        let verdict = self.policy.evaluate(command);
        if !verdict.needs_confirmation() {
            return None;
        }

        let prompt = CommandPolicy::confirmation_prompt(command);
        let declined = |message: String| {
            let mut r = ExecutionResult::cancelled(message);
            r.failure = Some(FailureKind::Safety);
            r.executed_commands.push(command.action.clone());
            Some(r)
        };

        match self.ui.request_confirmation(&prompt) {
            Ok(true) => {
                info!(command = %command.action, ?verdict, "Command confirmed by user");
                None
            }
            Ok(false) => {
                warn!(command = %command.action, "Command declined by user");
                declined(format!("User declined to execute {}", command.action))
            }
            Err(e) => {
                warn!(command = %command.action, error = %e, "Confirmation failed");
                declined(format!("Confirmation failed for {}: {e}", command.action))
            }
        }
    }

    // ── Sequences ───────────────────────────────────────────────────────

    /// Run commands in order at the top level.
    pub fn execute_sequence(&self, commands: &[Command], ctx: &mut ExecutionContext) -> ExecutionResult {
        self.run_sequence(commands, ctx, SequenceOptions::default())
    }

    pub fn run_sequence(
        &self,
        commands: &[Command],
        ctx: &mut ExecutionContext,
        options: SequenceOptions,
    ) -> ExecutionResult {
        let started = Instant::now();
        let timeout = self.settings.sequence_timeout();
        let mut outputs: Vec<String> = Vec::new();
        let mut executed: Vec<String> = Vec::new();

        let finish = |mut result: ExecutionResult, executed: Vec<String>, outputs: &[String]| {
            result.executed_commands = executed;
            if result.output.is_empty() {
                result.output = outputs.join("\n");
            }
            result.execution_time_ms = started.elapsed().as_millis() as u64;
            result
        };

        for (index, command) in commands.iter().enumerate() {
            let step = index + 1;

            if ctx.is_cancelled() {
                info!(request_id = %ctx.request_id, step, "Sequence cancelled");
                return finish(interrupted("Execution cancelled"), executed, &outputs);
            }
            if started.elapsed() > timeout {
                warn!(request_id = %ctx.request_id, step, "Sequence timeout exceeded");
                return finish(
                    ExecutionResult::failed(FailureKind::Timeout, "Execution timeout exceeded"),
                    executed,
                    &outputs,
                );
            }

            let mut result = self.execute(command, ctx);
            executed.push(names::canonical_name(&command.action));

            if result.is_recoverable() && !command.optional && !options.continue_on_failure {
                let handler = self.failure_handler.read().unwrap().clone();
                if let Some(handler) = handler
                    && let Some(recovered) = handler.handle_failure(command, &result, ctx, self)
                {
                    result = recovered;
                }
            }

            match result.status {
                ExecutionStatus::Completed | ExecutionStatus::InProgress => {
                    if !result.output.is_empty() {
                        outputs.push(result.output.clone());
                    }
                }
                ExecutionStatus::BreakLoop | ExecutionStatus::ContinueLoop if options.in_loop => {
                    return finish(result.with_output(String::new()), executed, &outputs);
                }
                ExecutionStatus::BreakLoop => {
                    debug!(step, "BREAK_IF outside a loop ends the sequence");
                    return finish(ExecutionResult::completed(""), executed, &outputs);
                }
                ExecutionStatus::ContinueLoop => {
                    debug!(step, "CONTINUE_IF outside a loop ignored");
                }
                ExecutionStatus::Cancelled if result.is_conditional_stop() => {
                    info!(request_id = %ctx.request_id, step, "Sequence stopped by CONDITIONAL_STOP");
                    outputs.push(result.output.clone());
                    let mut done = ExecutionResult::completed("");
                    done.result = result.result;
                    return finish(done, executed, &outputs);
                }
                ExecutionStatus::Cancelled => {
                    return finish(result, executed, &outputs);
                }
                ExecutionStatus::Failed => {
                    if command.optional || options.continue_on_failure {
                        warn!(
                            request_id = %ctx.request_id,
                            step,
                            error = %result.error_message,
                            "Optional command failed, continuing"
                        );
                        ctx.log(format!("Command {step} failed (skipped): {}", result.error_message));
                    } else {
                        let mut failed = ExecutionResult::failed(
                            result.failure.unwrap_or(FailureKind::Execution),
                            format!("Command {step} failed: {}", result.error_message),
                        );
                        failed.result = result.result;
                        return finish(failed, executed, &outputs);
                    }
                }
            }

            let is_last = index + 1 == commands.len();
            if !is_last {
                let delay = command.delay_after_ms.unwrap_or(self.settings.default_delay_ms);
                if delay > 0 && !self.interruptible_sleep(ctx, Duration::from_millis(delay)) {
                    return finish(interrupted("Execution cancelled"), executed, &outputs);
                }
            }
        }

        finish(ExecutionResult::completed(""), executed, &outputs)
    }

    /// Sleep in `wait_poll_ms` slices. Returns false if cancelled.
    pub fn interruptible_sleep(&self, ctx: &ExecutionContext, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let poll = Duration::from_millis(self.settings.wait_poll_ms.max(1));
        loop {
            if ctx.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(poll.min(deadline - now));
        }
    }

    // ── WAIT ────────────────────────────────────────────────────────────

    fn wait(&self, command: &Command, ctx: &ExecutionContext) -> ExecutionResult {
        let duration = ["duration_ms", "duration", "ms"]
            .iter()
            .find_map(|name| match command.param(name) {
                Some(Value::Number(n)) => n.as_u64(),
                Some(Value::String(s)) => s.trim().parse().ok(),
                _ => None,
            });
        let Some(duration) = duration else {
            return control::missing_param("WAIT", "duration_ms");
        };

        if self.interruptible_sleep(ctx, Duration::from_millis(duration)) {
            ExecutionResult::completed(format!("Waited {duration}ms"))
        } else {
            interrupted("Wait interrupted by shutdown signal")
        }
    }

    // ── WHILE_LOOP ──────────────────────────────────────────────────────

    fn while_loop(&self, command: &Command, ctx: &mut ExecutionContext) -> ExecutionResult {
        let body_value = command.param("commands").or_else(|| command.param("sequence"));
        let body = match body_value.map(Command::list_from_value) {
            Some(Ok(body)) => body,
            Some(Err(e)) => {
                return ExecutionResult::failed(
                    FailureKind::Validation,
                    format!("WHILE_LOOP body is malformed: {e}"),
                );
            }
            None => return control::missing_param("WHILE_LOOP", "commands"),
        };

        let always_true = command.param("always_true").is_some_and(condition::is_truthy);
        let condition = command.str_param("condition").map(str::to_string);
        if !always_true && condition.is_none() {
            return control::missing_param("WHILE_LOOP", "condition");
        }

        let cap = self.settings.max_loop_iterations;
        let requested = command.param("max_iterations").and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => self.substitutor.substitute_str(s, ctx).trim().parse().ok(),
            _ => None,
        });
        let max_iterations = requested.unwrap_or(cap).min(cap);

        let mut iterations: u64 = 0;
        let mut executed: Vec<String> = Vec::new();
        let body_options = SequenceOptions {
            continue_on_failure: false,
            in_loop: true,
        };

        loop {
            if ctx.is_cancelled() {
                return interrupted("Execution cancelled");
            }

            let holds = always_true
                || condition
                    .as_deref()
                    .is_some_and(|expr| condition::evaluate(expr, ctx, &self.substitutor));
            if !holds {
                break;
            }
            if iterations >= max_iterations {
                warn!(request_id = %ctx.request_id, max_iterations, "While loop hit its iteration cap");
                let mut r = ExecutionResult::failed(
                    FailureKind::Structural,
                    "While loop exceeded maximum iterations",
                );
                r.set_result_field("iterations", json!(iterations));
                return r;
            }

            iterations += 1;
            let body_result = self.run_sequence(&body, ctx, body_options);
            executed.extend(body_result.executed_commands.iter().cloned());

            match body_result.status {
                ExecutionStatus::BreakLoop => {
                    debug!(iterations, "Loop ended by BREAK_IF");
                    break;
                }
                ExecutionStatus::ContinueLoop | ExecutionStatus::Completed => {}
                _ => {
                    let mut r = body_result;
                    r.error_message = format!(
                        "While loop iteration {iterations} failed: {}",
                        r.error_message
                    );
                    r.set_result_field("iterations", json!(iterations));
                    return r;
                }
            }
        }

        let mut r = ExecutionResult::completed(format!("Loop completed after {iterations} iterations"))
            .with_result(json!({ "iterations": iterations }));
        r.executed_commands = executed;
        r
    }

    // ── EXECUTE_SCRIPT ──────────────────────────────────────────────────

    fn script_command(&self, command: &Command, ctx: &mut ExecutionContext) -> ExecutionResult {
        let Some(path) = command
            .str_param("script")
            .or_else(|| command.str_param("path"))
            .map(str::to_string)
        else {
            return control::missing_param("EXECUTE_SCRIPT", "script");
        };
        let variables = match command.param("variables") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Variables::new(),
            Some(_) => {
                return ExecutionResult::failed(
                    FailureKind::Validation,
                    "EXECUTE_SCRIPT 'variables' must be an object",
                );
            }
        };
        self.execute_script(&path, variables, ctx)
    }

    /// Run a script file in a child context.
    ///
    /// `variables` must already be substituted against the parent. Depth and
    /// cycle checks happen before any file is read; structural failures
    /// leave `ctx` untouched.
    pub fn execute_script(&self, path: &str, variables: Variables, ctx: &mut ExecutionContext) -> ExecutionResult {
        if !ctx.can_nest() {
            let err = ScriptError::DepthExceeded {
                path: path.to_string(),
                max: ctx.max_nesting_level,
            };
            warn!(request_id = %ctx.request_id, error = %err, "Script nesting limit reached");
            return ExecutionResult::failed(FailureKind::Structural, err.to_string());
        }

        let resolved = match self.scripts.resolve_path(path) {
            Ok(p) => p.to_string_lossy().replace('\\', "/"),
            Err(e) => return ExecutionResult::failed(FailureKind::Structural, e.to_string()),
        };

        if ctx.in_call_stack(&resolved) {
            let mut stack = ctx.script_stack.clone();
            stack.push(resolved.clone());
            let err = ScriptError::Cycle {
                path: resolved,
                stack: stack.join(" -> "),
            };
            warn!(request_id = %ctx.request_id, error = %err, "Script cycle detected");
            return ExecutionResult::failed(FailureKind::Structural, err.to_string());
        }

        let doc = match self.scripts.load_script(path) {
            Ok(doc) => doc,
            Err(e) => return ExecutionResult::failed(FailureKind::Structural, e.to_string()),
        };

        let mut child = ctx.child_for_script(&resolved);
        for (name, value) in variables {
            child.variables.insert(name, value);
        }
        for (name, value) in &doc.variables {
            if !child.variables.contains_key(name) {
                child.variables.insert(name.clone(), value.clone());
            }
        }

        info!(
            request_id = %ctx.request_id,
            script = %resolved,
            nesting = child.nesting_level,
            "Executing script"
        );
        let options = SequenceOptions {
            continue_on_failure: doc.continue_on_failure,
            in_loop: false,
        };
        let inner = self.run_sequence(&doc.commands, &mut child, options);

        let summary = json!({
            "success": inner.success,
            "output": inner.output,
            "error": inner.error_message,
            "executed_commands": inner.executed_commands,
        });
        let returned = doc
            .result_variable
            .as_ref()
            .and_then(|name| child.variable(name).cloned().map(|v| (name.clone(), v)));

        ctx.merge_child(child, &resolved, summary.clone());
        if let Some((name, value)) = returned {
            ctx.sub_script_results.insert(name, value);
        }

        if inner.success {
            ExecutionResult::completed(inner.output).with_result(summary)
        } else {
            let mut r = match inner.status {
                ExecutionStatus::Cancelled => ExecutionResult::cancelled(format!(
                    "Script {resolved} cancelled: {}",
                    inner.error_message
                )),
                _ => ExecutionResult::failed(
                    inner.failure.unwrap_or(FailureKind::Execution),
                    format!("Script {resolved} failed: {}", inner.error_message),
                ),
            };
            if r.failure.is_none() {
                r.failure = inner.failure;
            }
            r.with_result(summary)
        }
    }
}

fn interrupted(message: &str) -> ExecutionResult {
    let mut r = ExecutionResult::cancelled(message);
    r.failure = Some(FailureKind::Interrupted);
    r
}
