//! The orchestrator facade.
//!
//! Owns every long-lived service and exposes the handful of operations a
//! front end needs: submit a request, run a script, answer a question,
//! pause, and stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use deskpilot_config::AppConfig;
use deskpilot_conversation::{ConversationManager, InteractionBroker};
use deskpilot_core::error::{InteractionError, TaskError, WorkerPoolError};
use deskpilot_core::{
    CancellationToken, Command, DesktopControl, DomainEvent, EventBus, ExecutionContext, ExecutionResult,
    FailureKind, Perception, Planner, PlanningContext, UserInteractionRequest, UserInterface, Variables,
};
use deskpilot_engine::{ExecutionEngine, ScriptManager};
use deskpilot_recovery::RecoveryManager;
use deskpilot_runtime::{PlannerPool, PoolStats, TaskExecutor, TaskPriority, TaskState, WorkerPool, planner_pool};
use deskpilot_workflow::{EnvironmentChange, FeedbackLoop, QueuedRequest, RequestHandler, RequestQueue};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often expired recoveries, conversations, and interactions are swept.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

const EMERGENCY_STOP_MESSAGE: &str = "Emergency stop active";

/// The external systems the control plane drives.
#[derive(Clone)]
pub struct Collaborators {
    pub desktop: Arc<dyn DesktopControl>,
    pub perception: Arc<dyn Perception>,
    pub planner: Arc<dyn Planner>,
    pub ui: Arc<dyn UserInterface>,
}

/// What one maintenance sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub recoveries: usize,
    pub conversations: usize,
    pub interactions: usize,
}

impl MaintenanceReport {
    pub fn total(&self) -> usize {
        self.recoveries + self.conversations + self.interactions
    }
}

/// Point-in-time view of the whole control plane.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub paused: bool,
    pub emergency_stop: bool,
    pub confirmation_required: bool,
    pub queued_requests: usize,
    pub running_requests: usize,
    pub active_conversations: usize,
    pub pending_interactions: usize,
    pub active_recoveries: usize,
    pub feedback_running: bool,
    pub workers: PoolStats,
    pub success_metrics: Value,
}

/// State shared with the request queue's handler.
struct Inner {
    config: AppConfig,
    perception: Arc<dyn Perception>,
    planners: Arc<PlannerPool>,
    engine: Arc<ExecutionEngine>,
    recovery: Arc<RecoveryManager>,
    broker: Arc<InteractionBroker>,
    conversations: Arc<ConversationManager>,
    feedback: Arc<FeedbackLoop>,
    events: Arc<EventBus>,
    /// Replaced by a fresh token on reset
    emergency: RwLock<CancellationToken>,
}

struct Ticker {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// The single entry point front ends talk to.
pub struct Orchestrator {
    inner: Arc<Inner>,

    /// Threads for background tasks and maintenance sweeps
    workers: Arc<WorkerPool>,

    /// Cancellable background tasks
    tasks: TaskExecutor,

    /// Asynchronous top-level requests
    queue: RequestQueue,

    paused: AtomicBool,
    maintenance: Mutex<Option<Ticker>>,
}

impl Orchestrator {
    /// Wire every service from `config`. Nothing runs until [`start`](Self::start).
    pub fn new(config: AppConfig, collaborators: Collaborators) -> deskpilot_core::Result<Self> {
        config.validate()?;
        let events = Arc::new(EventBus::default());

        let workers = Arc::new(WorkerPool::new(config.pool.worker_threads));
        workers.set_exception_handler(|message| error!(panic = %message, "Background task panicked"));
        let tasks = TaskExecutor::new(Arc::clone(&workers));

        let planners = Arc::new(planner_pool(collaborators.planner, config.pool.planner_connections));
        let acquire_timeout = config.pool.acquire_timeout();

        let scripts = Arc::new(ScriptManager::from_config(&config.scripts));
        let engine = Arc::new(
            ExecutionEngine::new(
                collaborators.desktop,
                Arc::clone(&collaborators.ui),
                scripts,
                config.execution.clone(),
            )
            .with_event_bus(Arc::clone(&events)),
        );

        let recovery = Arc::new(
            RecoveryManager::new(config.recovery.clone())
                .with_perception(Arc::clone(&collaborators.perception))
                .with_planners(Arc::clone(&planners), acquire_timeout)
                .with_event_bus(Arc::clone(&events)),
        );
        engine.set_failure_handler(recovery.clone());

        let broker = Arc::new(
            InteractionBroker::new(Duration::from_millis(config.conversation.interaction_timeout_ms))
                .with_ui(Arc::clone(&collaborators.ui))
                .with_event_bus(Arc::clone(&events)),
        );
        let conversations = Arc::new(
            ConversationManager::new(config.conversation.clone(), Arc::clone(&broker))
                .with_perception(Arc::clone(&collaborators.perception))
                .with_planners(Arc::clone(&planners), acquire_timeout),
        );
        let feedback = Arc::new(
            FeedbackLoop::new(config.feedback.clone(), Arc::clone(&collaborators.perception))
                .with_event_bus(Arc::clone(&events)),
        );

        let inner = Arc::new(Inner {
            perception: collaborators.perception,
            planners,
            engine,
            recovery,
            broker,
            conversations,
            feedback,
            events: Arc::clone(&events),
            emergency: RwLock::new(CancellationToken::new()),
            config,
        });

        let handler_inner = Arc::clone(&inner);
        let handler: RequestHandler =
            Arc::new(move |request: &QueuedRequest| handler_inner.process(&request.request_id, &request.text));
        let queue = RequestQueue::with_event_bus(inner.config.queue.clone(), handler, events);

        info!(
            worker_threads = inner.config.pool.worker_threads,
            planner_connections = inner.config.pool.planner_connections,
            "Orchestrator created"
        );

        Ok(Self {
            inner,
            workers,
            tasks,
            queue,
            paused: AtomicBool::new(false),
            maintenance: Mutex::new(None),
        })
    }

    /// Start the queue workers, the feedback loop, and the maintenance ticker.
    pub fn start(&self) {
        self.queue.start();
        self.inner.feedback.start();
        self.start_maintenance(MAINTENANCE_INTERVAL);
        info!("Orchestrator started");
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.inner.engine
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub fn conversations(&self) -> &Arc<ConversationManager> {
        &self.inner.conversations
    }

    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.inner.recovery
    }

    pub fn feedback(&self) -> &Arc<FeedbackLoop> {
        &self.inner.feedback
    }

    // ── Requests ───────────────────────────────────────────────

    /// Plan and execute `text` on the calling thread.
    pub fn process_user_request(&self, text: &str) -> ExecutionResult {
        let request_id = format!("REQ-{}", Uuid::new_v4());
        info!(request_id = %request_id, "Processing user request");
        let result = self.inner.process(&request_id, text);
        self.inner.events.publish(DomainEvent::RequestCompleted {
            request_id,
            status: result.status,
            duration_ms: result.execution_time_ms,
            timestamp: Utc::now(),
        });
        result
    }

    /// Queue `text` and return its request id immediately.
    pub fn process_user_request_async(&self, text: &str) -> String {
        self.queue.submit(text)
    }

    /// Outcome of a queued request: final, IN_PROGRESS, or not found.
    pub fn get_execution_result(&self, request_id: &str) -> ExecutionResult {
        self.queue.result(request_id)
    }

    /// Run an already-planned command list.
    pub fn execute_plan(&self, commands: &[Command]) -> ExecutionResult {
        let Some(mut ctx) = self.inner.context(&format!("PLAN-{}", Uuid::new_v4()), "Execute plan") else {
            return ExecutionResult::cancelled(EMERGENCY_STOP_MESSAGE);
        };
        let started = Instant::now();
        let mut result = self.inner.engine.execute_sequence(commands, &mut ctx);
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        result
    }

    pub fn execute_script_file(&self, path: &str) -> ExecutionResult {
        self.execute_script_file_with(path, Variables::new())
    }

    /// Run a script with `variables` passed in as its parameters.
    pub fn execute_script_file_with(&self, path: &str, variables: Variables) -> ExecutionResult {
        let Some(mut ctx) = self.inner.context(&format!("SCRIPT-{}", Uuid::new_v4()), format!("Execute script: {path}"))
        else {
            return ExecutionResult::cancelled(EMERGENCY_STOP_MESSAGE);
        };
        let started = Instant::now();
        let mut result = self.inner.engine.execute_script(path, variables, &mut ctx);
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        info!(
            script = %path,
            success = result.success,
            duration_ms = result.execution_time_ms,
            "Script finished"
        );
        result
    }

    // ── Flow control ───────────────────────────────────────────

    /// Stop handing queued requests to workers. In-flight work continues.
    pub fn pause(&self) {
        if self.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue.pause();
        self.inner.events.publish(DomainEvent::ExecutionPaused { timestamp: Utc::now() });
        info!("Execution paused");
    }

    pub fn resume(&self) {
        if !self.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        self.queue.resume();
        self.inner.events.publish(DomainEvent::ExecutionResumed { timestamp: Utc::now() });
        info!("Execution resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Cancel in-flight commands, drop queued requests, and refuse new ones
    /// until [`reset_emergency_stop`](Self::reset_emergency_stop).
    pub fn emergency_stop(&self) {
        self.inner.emergency.read().unwrap().cancel();
        self.paused.store(true, Ordering::SeqCst);
        self.queue.pause();
        let dropped = self.queue.cancel_pending("Request cancelled by emergency stop");
        self.inner.events.publish(DomainEvent::EmergencyStop { timestamp: Utc::now() });
        warn!(dropped, "EMERGENCY STOP");
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.inner.emergency.read().unwrap().is_cancelled()
    }

    pub fn reset_emergency_stop(&self) {
        {
            let mut token = self.inner.emergency.write().unwrap();
            if !token.is_cancelled() {
                return;
            }
            *token = CancellationToken::new();
        }
        self.paused.store(false, Ordering::SeqCst);
        self.queue.resume();
        info!("Emergency stop reset");
    }

    // ── Human interaction ──────────────────────────────────────

    pub fn provide_user_response(&self, interaction_id: &str, answer: Value) -> Result<(), InteractionError> {
        self.inner.broker.provide_response(interaction_id, answer)
    }

    pub fn pending_interactions(&self) -> Vec<UserInteractionRequest> {
        self.inner.broker.pending()
    }

    /// Recently recorded desktop changes, oldest first.
    pub fn environment_changes(&self) -> Vec<EnvironmentChange> {
        self.inner.feedback.latest_changes(self.inner.config.feedback.history_limit)
    }

    // ── Background work ────────────────────────────────────────

    /// Run `task` on the worker pool. It should return soon after its
    /// token is cancelled.
    pub fn run_background<F>(&self, task: F, priority: TaskPriority) -> Result<u64, WorkerPoolError>
    where
        F: FnOnce(&CancellationToken) + Send + 'static,
    {
        self.tasks.submit_task(task, priority)
    }

    pub fn cancel_background(&self, task_id: u64) -> bool {
        self.tasks.cancel_task(task_id)
    }

    pub fn wait_background(&self, task_id: u64, timeout: Option<Duration>) -> Result<TaskState, TaskError> {
        self.tasks.wait_for_task(task_id, timeout)
    }

    // ── Maintenance ────────────────────────────────────────────

    /// Sweep expired recoveries, idle conversations, and stale interactions.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        self.inner.run_maintenance()
    }

    /// Submit a maintenance sweep to the worker pool every `interval`.
    fn start_maintenance(&self, interval: Duration) {
        let mut maintenance = self.maintenance.lock().unwrap();
        if maintenance.is_some() {
            return;
        }

        let stop = CancellationToken::new();
        let token = stop.clone();
        let inner = Arc::clone(&self.inner);
        let workers = Arc::clone(&self.workers);
        let spawned = std::thread::Builder::new()
            .name("deskpilot-maintenance".into())
            .spawn(move || {
                while sleep_unless_stopped(&token, interval) {
                    let inner = Arc::clone(&inner);
                    if let Err(e) = workers.submit_detached(TaskPriority::Low, move || {
                        inner.run_maintenance();
                    }) {
                        debug!(error = %e, "Maintenance sweep not scheduled");
                        break;
                    }
                }
            });

        match spawned {
            Ok(handle) => *maintenance = Some(Ticker { stop, handle }),
            Err(e) => warn!(error = %e, "Could not spawn maintenance thread"),
        }
    }

    fn stop_maintenance(&self) {
        let Some(ticker) = self.maintenance.lock().unwrap().take() else {
            return;
        };
        ticker.stop.cancel();
        if ticker.handle.join().is_err() {
            warn!("Maintenance thread panicked");
        }
    }

    // ── Status and shutdown ────────────────────────────────────

    pub fn status(&self) -> OrchestratorStatus {
        let inner = &self.inner;
        OrchestratorStatus {
            running: self.workers.is_running(),
            paused: self.is_paused(),
            emergency_stop: self.is_emergency_stopped(),
            confirmation_required: inner.config.execution.confirmation_required,
            queued_requests: self.queue.pending_count(),
            running_requests: self.queue.running_count(),
            active_conversations: inner.conversations.active_conversations().len(),
            pending_interactions: inner.broker.pending().len(),
            active_recoveries: inner.recovery.active_recoveries().len(),
            feedback_running: inner.feedback.is_running(),
            workers: self.workers.stats(),
            success_metrics: inner.feedback.success_metrics(),
        }
    }

    /// Finish queued requests, stop background threads, and close the pools.
    pub fn shutdown(&self) {
        info!("Shutting down orchestrator");
        self.stop_maintenance();
        self.inner.feedback.stop();
        self.queue.shutdown();
        self.workers.shutdown(true);
        self.inner.planners.shutdown();
        let swept = self.inner.conversations.sweep_expired();
        info!(conversations_swept = swept, "Orchestrator shut down");
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop_maintenance();
        self.inner.feedback.stop();
    }
}

impl Inner {
    /// Fresh context bound to the emergency token, or `None` while stopped.
    fn context(&self, request_id: &str, original_request: impl Into<String>) -> Option<ExecutionContext> {
        let token = self.emergency.read().unwrap().clone();
        if token.is_cancelled() {
            return None;
        }
        let mut ctx = ExecutionContext::new(request_id, original_request)
            .with_cancel_token(token.child_token())
            .with_max_nesting(self.config.scripts.max_nesting_level);
        ctx.requires_user_confirmation = self.config.execution.confirmation_required;
        Some(ctx)
    }

    fn process(&self, request_id: &str, text: &str) -> ExecutionResult {
        let started = Instant::now();
        let Some(mut ctx) = self.context(request_id, text) else {
            return ExecutionResult::cancelled(EMERGENCY_STOP_MESSAGE);
        };

        let mut result = self.plan_and_execute(text, &mut ctx);
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        info!(
            request_id = %request_id,
            status = ?result.status,
            duration_ms = result.execution_time_ms,
            "Request finished"
        );
        result
    }

    fn plan_and_execute(&self, text: &str, ctx: &mut ExecutionContext) -> ExecutionResult {
        match self.perception.gather_environment_info() {
            Ok(snapshot) => ctx.current_environment = Some(snapshot),
            Err(e) => warn!(request_id = %ctx.request_id, error = %e, "Environment refresh failed"),
        }

        let changes = self.feedback.drain_changes();
        for change in &changes {
            self.feedback.apply_adaptations(change, ctx);
        }
        let planning = PlanningContext {
            request_id: ctx.request_id.clone(),
            variables: ctx.variables.clone(),
            environment: ctx.current_environment.clone(),
            structured_data: json!({
                "environment_changes": changes,
                "command_success_rates": self.feedback.success_metrics(),
            }),
            conversation_history: Vec::new(),
        };

        let plan = {
            let planner = match self.planners.acquire(self.config.pool.acquire_timeout()) {
                Ok(planner) => planner,
                Err(e) => return ExecutionResult::failed(FailureKind::Timeout, e.to_string()),
            };
            match planner.generate_plan_with_context(text, &planning) {
                Ok(plan) => plan,
                Err(e) => {
                    warn!(request_id = %ctx.request_id, error = %e, "Planning failed");
                    return ExecutionResult::failed(FailureKind::Execution, format!("Planning failed: {e}"));
                }
            }
        };

        if let Some(turn) = plan.turn {
            debug!(request_id = %ctx.request_id, "Plan opened a conversation");
            return self.conversations.run(text, ctx, &self.engine, Some(turn));
        }
        if !plan.is_valid {
            return ExecutionResult::failed(FailureKind::Validation, "Generated execution plan failed validation");
        }

        debug!(
            request_id = %ctx.request_id,
            commands = plan.commands.len(),
            summary = %plan.summary,
            "Executing plan"
        );
        self.engine.execute_sequence(&plan.commands, ctx)
    }

    fn run_maintenance(&self) -> MaintenanceReport {
        let report = MaintenanceReport {
            recoveries: self.recovery.sweep_expired(),
            conversations: self.conversations.sweep_expired(),
            interactions: self.broker.sweep_expired(),
        };
        if report.total() > 0 {
            info!(
                recoveries = report.recoveries,
                conversations = report.conversations,
                interactions = report.interactions,
                "Maintenance sweep"
            );
        }
        report
    }
}

/// Sleep in short slices. Returns false once `token` is cancelled.
fn sleep_unless_stopped(token: &CancellationToken, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if token.is_cancelled() {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50).min(deadline.saturating_duration_since(Instant::now())));
    }
    !token.is_cancelled()
}
