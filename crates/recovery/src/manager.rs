//! The recovery registry and retry driver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use deskpilot_config::RecoveryConfig;
use deskpilot_core::{
    Command, DomainEvent, EnvironmentSnapshot, EventBus, ExecutionContext, ExecutionResult,
    ExecutionStatus, FailureKind, Perception, PlanningContext,
};
use deskpilot_engine::{ExecutionEngine, FailureHandler, names};
use deskpilot_runtime::PlannerPool;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::alternatives::{self, Alternative};
use crate::policy::{RecoveryPolicy, RecoveryStrategy};

/// Book-keeping for one failed command.
#[derive(Debug, Clone)]
pub struct RecoveryState {
    pub recovery_id: String,
    pub original_command: Command,
    pub last_error: String,
    pub strategy: RecoveryStrategy,
    pub retry_count: u32,
    pub max_retries: u32,
    /// `Initial failure: ...`, then one `SUCCESS: ...` / `FAILED: ...` entry per attempt
    pub attempt_history: Vec<String>,
    pub environment_snapshot: Option<EnvironmentSnapshot>,
    pub resolved: bool,
    pub created_at: Instant,
    pub last_attempt: Instant,
}

/// Drives recovery of failed commands and keeps a registry of attempts.
///
/// The registry lock is never held while a command runs, so alternatives
/// that themselves fail and recover do not deadlock.
pub struct RecoveryManager {
    config: RecoveryConfig,
    policy: RecoveryPolicy,
    perception: Option<Arc<dyn Perception>>,
    planners: Option<Arc<PlannerPool>>,
    acquire_timeout: Duration,
    events: Option<Arc<EventBus>>,
    states: Mutex<HashMap<String, RecoveryState>>,
    counter: AtomicU64,
}

impl RecoveryManager {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            policy: RecoveryPolicy::from_config(&config),
            config,
            perception: None,
            planners: None,
            acquire_timeout: Duration::from_secs(5),
            events: None,
            states: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    pub fn with_perception(mut self, perception: Arc<dyn Perception>) -> Self {
        self.perception = Some(perception);
        self
    }

    pub fn with_planners(mut self, planners: Arc<PlannerPool>, acquire_timeout: Duration) -> Self {
        self.planners = Some(planners);
        self.acquire_timeout = acquire_timeout;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Try to recover `command`, which failed with `error`.
    ///
    /// Alternatives run through `engine` against `ctx`. Returns COMPLETED
    /// with the winning alternative, or FAILED with the attempt history.
    pub fn recover(
        &self,
        command: &Command,
        error: &str,
        ctx: &mut ExecutionContext,
        engine: &ExecutionEngine,
    ) -> ExecutionResult {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let recovery_id = format!("{}_recovery_{n}", ctx.request_id);

        let mut concrete = engine.substitutor().substitute_command(command, ctx, &[]);
        concrete.action = names::canonical_name(&command.action);

        let mut strategy = self.policy.classify(error);
        if strategy == RecoveryStrategy::LlmAnalysis && !self.planner_available() {
            debug!(recovery_id = %recovery_id, "No configured planner, falling back to simple retry");
            strategy = RecoveryStrategy::SimpleRetry;
        }

        let now = Instant::now();
        let state = RecoveryState {
            recovery_id: recovery_id.clone(),
            original_command: concrete.clone(),
            last_error: error.to_string(),
            strategy,
            retry_count: 0,
            max_retries: self.config.max_retries,
            attempt_history: vec![format!("Initial failure: {error}")],
            environment_snapshot: self.snapshot(),
            resolved: false,
            created_at: now,
            last_attempt: now,
        };
        self.states.lock().unwrap().insert(recovery_id.clone(), state);

        info!(
            request_id = %ctx.request_id,
            recovery_id = %recovery_id,
            command = %concrete.action,
            strategy = %strategy,
            "Initiated failure recovery"
        );

        let candidates = match strategy {
            RecoveryStrategy::LlmAnalysis => self.planner_alternatives(&recovery_id, ctx),
            RecoveryStrategy::SimpleRetry => None,
        }
        .unwrap_or_else(|| alternatives::simple_alternatives(&concrete, 0));

        let mut result = self.retry_with_alternatives(&recovery_id, candidates, ctx, engine);
        result.set_result_field("recovery_id", json!(recovery_id));
        result.set_result_field("recovery_type", json!(strategy.as_str()));

        if let Some(events) = &self.events {
            events.publish(DomainEvent::RecoveryAttempted {
                recovery_id,
                strategy: strategy.as_str().to_string(),
                success: result.success,
                timestamp: Utc::now(),
            });
        }
        result
    }

    fn planner_available(&self) -> bool {
        let Some(planners) = &self.planners else {
            return false;
        };
        match planners.acquire(self.acquire_timeout) {
            Ok(planner) => planner.validate_configuration(),
            Err(e) => {
                warn!(error = %e, "Could not acquire planner for recovery");
                false
            }
        }
    }

    fn snapshot(&self) -> Option<EnvironmentSnapshot> {
        let perception = self.perception.as_ref()?;
        match perception.gather_environment_info() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "Environment snapshot failed during recovery");
                None
            }
        }
    }

    /// Ask the planner for alternatives. `None` means use simple ones.
    fn planner_alternatives(&self, recovery_id: &str, ctx: &ExecutionContext) -> Option<Vec<Alternative>> {
        let planners = self.planners.as_ref()?;
        let state = self.recovery_state(recovery_id)?;

        let current = self.snapshot();
        let mut structured = json!({});
        if let Some(before) = &state.environment_snapshot {
            structured["environment_comparison"] = json!({
                "before_failure": before.to_value(),
                "current_state": current.as_ref().map(EnvironmentSnapshot::to_value).unwrap_or(Value::Null),
            });
        }

        let context = PlanningContext {
            request_id: recovery_id.to_string(),
            variables: ctx.variables.clone(),
            environment: current,
            structured_data: structured,
            conversation_history: Vec::new(),
        };
        let prompt = analysis_prompt(&state);

        let planner = match planners.acquire(self.acquire_timeout) {
            Ok(p) => p,
            Err(e) => {
                warn!(recovery_id, error = %e, "Planner unavailable for failure analysis");
                return None;
            }
        };
        match planner.generate_plan_with_context(&prompt, &context) {
            Ok(plan) if plan.is_valid && !plan.commands.is_empty() => {
                info!(recovery_id, alternatives = plan.commands.len(), "Planner proposed alternatives");
                Some(alternatives::from_planner(plan.commands, state.retry_count))
            }
            Ok(_) => {
                debug!(recovery_id, "Planner proposed nothing usable");
                None
            }
            Err(e) => {
                warn!(recovery_id, error = %e, "Failure analysis request failed");
                None
            }
        }
    }

    fn retry_with_alternatives(
        &self,
        recovery_id: &str,
        candidates: Vec<Alternative>,
        ctx: &mut ExecutionContext,
        engine: &ExecutionEngine,
    ) -> ExecutionResult {
        for (i, alternative) in candidates.iter().enumerate() {
            let retry_count = {
                let mut states = self.states.lock().unwrap();
                let Some(state) = states.get_mut(recovery_id) else {
                    return ExecutionResult::failed(
                        FailureKind::Execution,
                        format!("Recovery state not found: {recovery_id}"),
                    );
                };
                if state.retry_count >= state.max_retries {
                    let mut r = ExecutionResult::failed(
                        FailureKind::Execution,
                        format!("Maximum retry attempts reached ({})", state.max_retries),
                    );
                    r.set_result_field("retry_count", json!(state.retry_count));
                    r.set_result_field("attempt_history", json!(state.attempt_history));
                    return r;
                }
                state.retry_count += 1;
                state.last_attempt = Instant::now();
                state.retry_count
            };

            if i > 0 {
                let pause = candidates[i - 1].command.delay_after_ms.unwrap_or(0);
                if pause > 0 && !engine.interruptible_sleep(ctx, Duration::from_millis(pause)) {
                    return cancelled();
                }
            }
            if alternative.wait_before_ms > 0
                && !engine.interruptible_sleep(ctx, Duration::from_millis(alternative.wait_before_ms))
            {
                return cancelled();
            }

            let description = alternative.description();
            let attempt = engine.execute(&alternative.command, ctx);

            let mut states = self.states.lock().unwrap();
            let Some(state) = states.get_mut(recovery_id) else {
                return attempt;
            };
            if attempt.status == ExecutionStatus::Completed {
                state.attempt_history.push(format!("SUCCESS: {description}"));
                state.last_error.clear();
                state.resolved = true;
                info!(recovery_id, attempt = retry_count, alternative = %description, "Recovery succeeded");

                let mut r = ExecutionResult::completed(attempt.output);
                r.executed_commands = attempt.executed_commands;
                r.set_result_field(
                    "successful_alternative",
                    serde_json::to_value(&alternative.command).unwrap_or(Value::Null),
                );
                r.set_result_field("retry_count", json!(retry_count));
                r.set_result_field(
                    "recovery_summary",
                    json!(format!("Command succeeded with alternative: {description}")),
                );
                return r;
            }

            state
                .attempt_history
                .push(format!("FAILED: {description} - {}", attempt.error_message));
            state.last_error = attempt.error_message.clone();
            debug!(recovery_id, attempt = retry_count, error = %attempt.error_message, "Recovery attempt failed");
        }

        let states = self.states.lock().unwrap();
        let mut r = ExecutionResult::failed(FailureKind::Execution, "All recovery alternatives failed");
        if let Some(state) = states.get(recovery_id) {
            r.set_result_field("retry_count", json!(state.retry_count));
            r.set_result_field("attempt_history", json!(state.attempt_history));
        }
        warn!(recovery_id, "All recovery alternatives failed");
        r
    }

    pub fn recovery_state(&self, recovery_id: &str) -> Option<RecoveryState> {
        self.states.lock().unwrap().get(recovery_id).cloned()
    }

    /// Ids of recoveries that have not succeeded yet.
    pub fn active_recoveries(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .states
            .lock()
            .unwrap()
            .values()
            .filter(|s| !s.resolved)
            .map(|s| s.recovery_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drop records whose last attempt is older than the configured age.
    pub fn sweep_expired(&self) -> usize {
        let max_age = Duration::from_secs(self.config.state_max_age_secs);
        self.sweep_older_than(max_age)
    }

    pub fn sweep_older_than(&self, max_age: Duration) -> usize {
        let mut states = self.states.lock().unwrap();
        let before = states.len();
        states.retain(|_, s| s.last_attempt.elapsed() <= max_age);
        let removed = before - states.len();
        if removed > 0 {
            debug!(removed, "Swept expired recovery states");
        }
        removed
    }
}

impl FailureHandler for RecoveryManager {
    fn handle_failure(
        &self,
        command: &Command,
        failure: &ExecutionResult,
        ctx: &mut ExecutionContext,
        engine: &ExecutionEngine,
    ) -> Option<ExecutionResult> {
        if !self.config.enabled {
            return None;
        }
        Some(self.recover(command, &failure.error_message, ctx, engine))
    }
}

fn analysis_prompt(state: &RecoveryState) -> String {
    let mut prompt = String::from("COMMAND FAILURE ANALYSIS:\n");
    prompt.push_str(&format!(
        "Failed Command: {}\n",
        serde_json::to_string(&state.original_command).unwrap_or_else(|_| state.original_command.describe())
    ));
    prompt.push_str(&format!("Error Message: {}\n", state.last_error));
    prompt.push_str(&format!("Retry Count: {}\n", state.retry_count));
    if !state.attempt_history.is_empty() {
        prompt.push_str("Previous Attempts:\n");
        for attempt in &state.attempt_history {
            prompt.push_str(&format!("- {attempt}\n"));
        }
    }
    prompt.push_str(
        "\nAnalyze this failure and return alternative commands that achieve the same goal, \
         with modified parameters where the environment has changed.",
    );
    prompt
}

fn cancelled() -> ExecutionResult {
    let mut r = ExecutionResult::cancelled("Execution cancelled");
    r.failure = Some(FailureKind::Interrupted);
    r
}
