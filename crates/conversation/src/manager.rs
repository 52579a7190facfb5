//! Multi-turn planning sessions.
//!
//! A conversation starts from a request, then alternates planner turns with
//! local work: gathering more environment data, adapting commands, asking the
//! human, and finally executing a plan. Conversations that go quiet expire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use deskpilot_config::ConversationConfig;
use deskpilot_core::command::MOUSE_OFFSET;
use deskpilot_core::error::ConversationError;
use deskpilot_core::{
    AdaptationRequest, Command, EnvironmentRequest, EnvironmentSnapshot, ExecutionContext,
    ExecutionResult, ExecutionStatus, FailureKind, InteractionSpec, Perception, Plan, PlannerTurn,
    PlanningContext,
};
use deskpilot_engine::{ExecutionEngine, names};
use deskpilot_runtime::PlannerPool;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::InteractionBroker;

pub const NEXT_CONTINUE: &str = "continue_conversation";
pub const NEXT_CONTINUE_WITH_INPUT: &str = "continue_conversation_with_user_input";

/// Everything remembered about one conversation.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub conversation_id: String,
    pub original_request: String,
    pub history: Vec<Value>,
    pub context: Map<String, Value>,
    pub environment: Option<EnvironmentSnapshot>,
    /// Environment responses keyed by the turn that asked for them
    pub environmental_queries: Map<String, Value>,
    pub requires_environmental_update: bool,
    pub turn_count: u32,
    pub max_turns: u32,
    pub started_at: DateTime<Utc>,
    pub last_interaction: Instant,
}

pub struct ConversationManager {
    config: ConversationConfig,
    broker: Arc<InteractionBroker>,
    perception: Option<Arc<dyn Perception>>,
    planners: Option<Arc<PlannerPool>>,
    acquire_timeout: Duration,
    conversations: Mutex<HashMap<String, ConversationState>>,
}

impl ConversationManager {
    pub fn new(config: ConversationConfig, broker: Arc<InteractionBroker>) -> Self {
        Self {
            config,
            broker,
            perception: None,
            planners: None,
            acquire_timeout: Duration::from_secs(5),
            conversations: Mutex::new(HashMap::new()),
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

    pub fn broker(&self) -> &Arc<InteractionBroker> {
        &self.broker
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Open a conversation for `request`.
    ///
    /// The environment is refreshed first when the context carries no
    /// snapshot, an old one, or one lacking what `anticipated` will need.
    pub fn initiate(&self, request: &str, ctx: &mut ExecutionContext, anticipated: &[Command]) -> String {
        let conversation_id = new_conversation_id();
        let now = Utc::now();

        if self.needs_environment(ctx.current_environment.as_ref(), anticipated)
            && let Some(snapshot) = self.gather()
        {
            ctx.current_environment = Some(snapshot);
        }

        let mut environmental_queries = Map::new();
        if let Some(snapshot) = &ctx.current_environment {
            environmental_queries.insert("initial".into(), snapshot.to_value());
        }

        let state = ConversationState {
            conversation_id: conversation_id.clone(),
            original_request: request.to_string(),
            history: vec![json!({
                "role": "user",
                "content": request,
                "timestamp": now.to_rfc3339(),
            })],
            context: match ctx.snapshot() {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            environment: ctx.current_environment.clone(),
            environmental_queries,
            requires_environmental_update: false,
            turn_count: 0,
            max_turns: self.config.max_turns,
            started_at: now,
            last_interaction: Instant::now(),
        };
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation_id.clone(), state);

        info!(conversation_id = %conversation_id, request_id = %ctx.request_id, "Conversation started");
        conversation_id
    }

    pub fn end(&self, conversation_id: &str) -> bool {
        let removed = self.conversations.lock().unwrap().remove(conversation_id).is_some();
        if removed {
            self.broker.cancel_conversation(conversation_id);
            debug!(conversation_id, "Conversation ended");
        }
        removed
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.conversations.lock().unwrap().contains_key(conversation_id)
    }

    pub fn active_conversations(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.conversations.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop conversations idle longer than the expiration window.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_idle_longer_than(Duration::from_secs(self.config.expiration_secs))
    }

    pub fn sweep_idle_longer_than(&self, max_idle: Duration) -> usize {
        let expired: Vec<String> = self
            .conversations
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.last_interaction.elapsed() > max_idle)
            .map(|c| c.conversation_id.clone())
            .collect();
        for id in &expired {
            self.end(id);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired idle conversations");
        }
        expired.len()
    }

    // ── Context and history ────────────────────────────────────

    /// Merge keys into the conversation context.
    pub fn update_context(&self, conversation_id: &str, update: Map<String, Value>) -> Result<(), ConversationError> {
        self.with_state(conversation_id, |state| {
            state.context.extend(update);
        })
    }

    pub fn context(&self, conversation_id: &str) -> Option<Map<String, Value>> {
        self.state(conversation_id).map(|s| s.context)
    }

    pub fn history(&self, conversation_id: &str) -> Vec<Value> {
        self.state(conversation_id).map(|s| s.history).unwrap_or_default()
    }

    pub fn state(&self, conversation_id: &str) -> Option<ConversationState> {
        self.conversations.lock().unwrap().get(conversation_id).cloned()
    }

    fn with_state<T>(
        &self,
        conversation_id: &str,
        f: impl FnOnce(&mut ConversationState) -> T,
    ) -> Result<T, ConversationError> {
        let mut conversations = self.conversations.lock().unwrap();
        let state = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| ConversationError::NotFound(conversation_id.to_string()))?;
        state.last_interaction = Instant::now();
        Ok(f(state))
    }

    fn append_history(&self, conversation_id: &str, entry: Value) {
        let limit = self.config.history_limit.max(1);
        let appended = self.with_state(conversation_id, |state| {
            state.history.push(entry);
            if state.history.len() > limit {
                let excess = state.history.len() - limit;
                state.history.drain(..excess);
            }
        });
        if let Err(e) = appended {
            warn!(conversation_id, error = %e, "History entry dropped");
        }
    }

    // ── Turns ──────────────────────────────────────────────────

    /// Apply one planner turn.
    ///
    /// IN_PROGRESS means the conversation wants another planner turn; any
    /// other status is final.
    pub fn process_turn(
        &self,
        conversation_id: &str,
        turn: PlannerTurn,
        ctx: &mut ExecutionContext,
        engine: &ExecutionEngine,
    ) -> ExecutionResult {
        let counted = self.with_state(conversation_id, |state| {
            if state.turn_count >= state.max_turns {
                return Err(state.max_turns);
            }
            state.turn_count += 1;
            Ok(state.turn_count)
        });
        let turn_number = match counted {
            Ok(Ok(n)) => n,
            Ok(Err(max_turns)) => {
                let err = ConversationError::TurnLimit {
                    conversation_id: conversation_id.to_string(),
                    max_turns,
                };
                warn!(conversation_id, max_turns, "Conversation turn limit reached");
                return ExecutionResult::failed(FailureKind::Structural, err.to_string());
            }
            Err(err) => return ExecutionResult::failed(FailureKind::Validation, err.to_string()),
        };

        self.append_history(
            conversation_id,
            json!({
                "role": "planner",
                "turn": turn_number,
                "content": serde_json::to_value(&turn).unwrap_or(Value::Null),
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
        debug!(conversation_id, turn = turn_number, "Processing conversation turn");

        let mut result = match turn {
            PlannerTurn::RequestEnvironmentData { environment_request } => {
                let data = self.handle_environment_request(conversation_id, &environment_request, ctx);
                continuing(NEXT_CONTINUE).with_result(json!({
                    "next_action": NEXT_CONTINUE,
                    "environment_data": data,
                }))
            }
            PlannerTurn::AdaptCommands(request) => self.adapt_commands(conversation_id, &request),
            PlannerTurn::RequestUserInput(spec) => self.ask_user(conversation_id, spec, ctx),
            PlannerTurn::ExecutePlan { commands } => {
                let result = engine.execute_sequence(&commands, ctx);
                self.append_history(
                    conversation_id,
                    json!({
                        "role": "system",
                        "content": "plan_executed",
                        "success": result.success,
                        "error": result.error_message,
                    }),
                );
                if result.success {
                    self.end(conversation_id);
                }
                result
            }
        };
        result.set_result_field("conversation_id", json!(conversation_id));
        result
    }

    /// Fetch fresh environment data shaped by the request type.
    pub fn handle_environment_request(
        &self,
        conversation_id: &str,
        request: &EnvironmentRequest,
        ctx: &mut ExecutionContext,
    ) -> Value {
        let snapshot = self.gather().or_else(|| ctx.current_environment.clone());
        let mut data = json!({
            "request_type": request.kind,
            "timestamp": Utc::now().to_rfc3339(),
            "base_environment": snapshot.as_ref().map(EnvironmentSnapshot::to_value).unwrap_or(Value::Null),
        });

        if let Some(snapshot) = &snapshot {
            match request.kind.as_str() {
                "screen_analysis" => {
                    data["screen"] = json!(snapshot.screen);
                    data["ocr_text"] = json!(snapshot.ocr_text);
                    data["ui_elements"] = json!(snapshot.ui_elements);
                }
                "window_focus" => {
                    data["active_window"] = json!(snapshot.active_window);
                    data["windows"] = json!(snapshot.windows);
                }
                "coordinate_mapping" => {
                    data["screen"] = json!(snapshot.screen);
                    data["ui_elements"] = json!(snapshot.ui_elements);
                    data["active_window_bounds"] = json!(snapshot.active_window.as_ref().map(|w| w.bounds));
                }
                "application_state" => {
                    data["running_processes"] = json!(snapshot.running_processes);
                    data["current_directory"] = json!(snapshot.current_directory);
                    data["active_window"] = json!(snapshot.active_window);
                }
                _ => {}
            }
        }

        if request.include_screenshot && self.planner_supports_vision() {
            data["screenshot"] = self.screenshot_summary();
        }

        if let Some(snapshot) = snapshot {
            ctx.current_environment = Some(snapshot);
        }
        let recorded = self.with_state(conversation_id, |state| {
            state.environment = ctx.current_environment.clone();
            state.requires_environmental_update = false;
            state
                .environmental_queries
                .insert(state.turn_count.to_string(), data.clone());
        });
        if let Err(e) = recorded {
            warn!(conversation_id, error = %e, "Environment response not recorded");
        }
        data
    }

    fn adapt_commands(&self, conversation_id: &str, request: &AdaptationRequest) -> ExecutionResult {
        let adapted = match request.adaptation_type.as_str() {
            "command_modification" => apply_modifications(&request.original_commands, request),
            "retry_with_alternatives" => {
                let failed = if request.failed_commands.is_empty() {
                    &request.original_commands
                } else {
                    &request.failed_commands
                };
                failed.iter().flat_map(mouse_alternatives).collect()
            }
            other => {
                return ExecutionResult::failed(
                    FailureKind::Validation,
                    format!("Unknown adaptation type: {other}"),
                );
            }
        };

        info!(
            conversation_id,
            adaptation_type = %request.adaptation_type,
            count = adapted.len(),
            "Adapted commands"
        );
        let adapted = serde_json::to_value(&adapted).unwrap_or(Value::Null);
        if let Err(e) = self.update_context(
            conversation_id,
            Map::from_iter([("adapted_commands".to_string(), adapted.clone())]),
        ) {
            warn!(conversation_id, error = %e, "Adapted commands not stored");
        }
        continuing(NEXT_CONTINUE).with_result(json!({
            "next_action": NEXT_CONTINUE,
            "adaptation_type": request.adaptation_type,
            "adapted_commands": adapted,
            "reasoning": request.reasoning,
        }))
    }

    fn ask_user(&self, conversation_id: &str, spec: InteractionSpec, ctx: &ExecutionContext) -> ExecutionResult {
        let timeout = spec.timeout_ms.map(Duration::from_millis);
        let interaction_id =
            self.broker
                .request_input(conversation_id, &spec.user_prompt, spec.input_type, spec.options, timeout);
        let answer = self.broker.wait_for_response(&interaction_id, &ctx.cancel);
        if !answer.success {
            return answer;
        }

        let response = answer.result.get("user_response").cloned().unwrap_or(Value::Null);
        self.append_history(
            conversation_id,
            json!({
                "role": "user",
                "interaction_id": interaction_id,
                "content": response,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
        continuing(NEXT_CONTINUE_WITH_INPUT)
            .with_output(answer.output)
            .with_result(json!({
                "next_action": NEXT_CONTINUE_WITH_INPUT,
                "interaction_id": interaction_id,
                "user_response": response,
            }))
    }

    /// Mouse-offset alternatives for a failed command.
    pub fn suggest_alternatives(&self, conversation_id: &str, failed: &Command) -> Vec<Command> {
        let suggestions = mouse_alternatives(failed);
        self.append_history(
            conversation_id,
            json!({
                "role": "system",
                "content": "suggested_alternatives",
                "failed_command": failed.describe(),
                "count": suggestions.len(),
            }),
        );
        suggestions
    }

    // ── Driving a whole conversation ───────────────────────────

    /// Run a conversation to completion with the pooled planner.
    ///
    /// `initial` is a turn already produced by the first planning call.
    pub fn run(
        &self,
        request: &str,
        ctx: &mut ExecutionContext,
        engine: &ExecutionEngine,
        initial: Option<PlannerTurn>,
    ) -> ExecutionResult {
        let started = Instant::now();
        let conversation_id = self.initiate(request, ctx, &anticipated_commands(initial.as_ref()));
        let mut next = initial;

        let mut result = loop {
            if ctx.is_cancelled() {
                let mut cancelled = ExecutionResult::cancelled("Execution cancelled");
                cancelled.failure = Some(FailureKind::Interrupted);
                break cancelled;
            }

            let turn = match next.take() {
                Some(turn) => turn,
                None => match self.next_turn(&conversation_id, request, ctx) {
                    Ok(turn) => turn,
                    Err(result) => break result,
                },
            };

            let result = self.process_turn(&conversation_id, turn, ctx, engine);
            if result.status != ExecutionStatus::InProgress {
                break result;
            }
        };

        self.end(&conversation_id);
        result.set_result_field("conversation_id", json!(conversation_id));
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        result
    }

    fn next_turn(&self, conversation_id: &str, request: &str, ctx: &ExecutionContext) -> Result<PlannerTurn, ExecutionResult> {
        let Some(planners) = &self.planners else {
            return Err(ExecutionResult::failed(FailureKind::Execution, "No planner available"));
        };
        let planner = planners
            .acquire(self.acquire_timeout)
            .map_err(|e| ExecutionResult::failed(FailureKind::Timeout, e.to_string()))?;

        let state = self
            .state(conversation_id)
            .ok_or_else(|| ExecutionResult::failed(FailureKind::Validation, ConversationError::NotFound(conversation_id.to_string()).to_string()))?;
        let planning = PlanningContext {
            request_id: ctx.request_id.clone(),
            variables: ctx.variables.clone(),
            environment: ctx.current_environment.clone(),
            structured_data: json!({
                "conversation_id": conversation_id,
                "turn": state.turn_count,
                "context": state.context,
                "environmental_queries": state.environmental_queries,
            }),
            conversation_history: state.history,
        };

        let plan = planner
            .generate_plan_with_context(request, &planning)
            .map_err(|e| ExecutionResult::failed(FailureKind::Execution, e.to_string()))?;
        turn_from_plan(plan)
    }

    // ── Environment ────────────────────────────────────────────

    fn needs_environment(&self, snapshot: Option<&EnvironmentSnapshot>, anticipated: &[Command]) -> bool {
        let Some(snapshot) = snapshot else {
            return true;
        };
        if snapshot.age_ms(Utc::now()) > self.config.environment_staleness_ms as i64 {
            return true;
        }
        anticipated.iter().any(|command| {
            let name = names::canonical_name(&command.action);
            (name.starts_with("MOUSE_") && snapshot.ui_elements.is_empty())
                || (name.starts_with("APP_") && snapshot.running_processes.is_empty())
        })
    }

    fn gather(&self) -> Option<EnvironmentSnapshot> {
        let perception = self.perception.as_ref()?;
        match perception.gather_environment_info() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "Environment query failed");
                None
            }
        }
    }

    fn planner_supports_vision(&self) -> bool {
        self.planners
            .as_ref()
            .and_then(|pool| pool.acquire(self.acquire_timeout).ok())
            .is_some_and(|planner| planner.supports_vision())
    }

    fn screenshot_summary(&self) -> Value {
        let Some(perception) = &self.perception else {
            return json!({ "available": false });
        };
        match perception.capture_screen() {
            Ok(image) => json!({
                "available": image.is_valid(),
                "width": image.width,
                "height": image.height,
                "format": image.format,
            }),
            Err(e) => json!({ "available": false, "error": e.to_string() }),
        }
    }
}

fn continuing(next_action: &str) -> ExecutionResult {
    let mut r = ExecutionResult::in_progress();
    r.output = next_action.to_string();
    r
}

fn new_conversation_id() -> String {
    let hex = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("CONV-{}-{}", Utc::now().format("%Y%m%d%H%M%S"), &hex[..8])
}

/// The turn a plan asks for. A plain valid plan means "execute it".
fn turn_from_plan(plan: Plan) -> Result<PlannerTurn, ExecutionResult> {
    if let Some(turn) = plan.turn {
        return Ok(turn);
    }
    if !plan.is_valid {
        return Err(ExecutionResult::failed(
            FailureKind::Validation,
            "Generated execution plan failed validation",
        ));
    }
    Ok(PlannerTurn::ExecutePlan { commands: plan.commands })
}

fn anticipated_commands(turn: Option<&PlannerTurn>) -> Vec<Command> {
    match turn {
        Some(PlannerTurn::ExecutePlan { commands }) => commands.clone(),
        Some(PlannerTurn::AdaptCommands(request)) => request.original_commands.clone(),
        _ => Vec::new(),
    }
}

/// Apply index-addressed edits. Out-of-range indices are skipped.
fn apply_modifications(commands: &[Command], request: &AdaptationRequest) -> Vec<Command> {
    let mut adapted = commands.to_vec();
    for modification in &request.modifications {
        let Some(command) = adapted.get_mut(modification.command_index) else {
            warn!(index = modification.command_index, "Modification index out of range");
            continue;
        };
        if let Some(name) = &modification.new_command {
            command.action = name.clone();
        }
        if let Some(params) = &modification.new_params {
            for (key, value) in params {
                command.parameters.insert(key.clone(), value.clone());
            }
        }
        if let Some(extra) = modification.additional_delay {
            command.delay_after_ms = Some(command.delay_after_ms.unwrap_or(0) + extra);
        }
    }
    adapted
}

fn mouse_alternatives(command: &Command) -> Vec<Command> {
    if !names::canonical_name(&command.action).starts_with("MOUSE_") {
        return Vec::new();
    }
    [(MOUSE_OFFSET, 0), (-MOUSE_OFFSET, 0), (0, MOUSE_OFFSET), (0, -MOUSE_OFFSET)]
        .into_iter()
        .map(|(dx, dy)| command.offset_by(dx, dy).with_description(format!("Offset by ({dx},{dy})")))
        .collect()
}
