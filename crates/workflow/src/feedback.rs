//! Continuous environment feedback.
//!
//! A background thread snapshots the desktop at a fixed interval and compares
//! each snapshot with the previous one. Meaningful changes are recorded with
//! the adaptations the rule table suggests, so the next planning step can
//! take them into account. Command outcomes are tallied per command name.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use deskpilot_config::FeedbackConfig;
use deskpilot_core::{
    CancellationToken, Command, DomainEvent, EnvironmentSnapshot, EventBus, ExecutionContext,
    Perception, WindowInfo,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Below this similarity two snapshots count as different.
pub const SIMILARITY_THRESHOLD: f64 = 0.9;

/// Success rate under which alternatives are suggested.
pub const LOW_SUCCESS_RATE: f64 = 0.5;

/// Granularity of stop checks while the loop sleeps.
const STOP_SLICE: Duration = Duration::from_millis(50);

// ── Deltas ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveWindowChange {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// What differs between two snapshots. Windows are matched by title.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentDelta {
    pub windows_added: Vec<WindowInfo>,
    pub windows_removed: Vec<WindowInfo>,
    /// Present in both, with different bounds, class, or visibility
    pub windows_changed: Vec<WindowInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_window_changed: Option<ActiveWindowChange>,
    pub screen_changed: bool,
}

impl EnvironmentDelta {
    pub fn between(previous: &EnvironmentSnapshot, current: &EnvironmentSnapshot) -> Self {
        let find = |windows: &[WindowInfo], title: &str| windows.iter().find(|w| w.title == title).cloned();

        let mut delta = Self::default();
        for window in &current.windows {
            match find(&previous.windows, &window.title) {
                None => delta.windows_added.push(window.clone()),
                Some(before) if before != *window => delta.windows_changed.push(window.clone()),
                Some(_) => {}
            }
        }
        for window in &previous.windows {
            if find(&current.windows, &window.title).is_none() {
                delta.windows_removed.push(window.clone());
            }
        }

        if previous.active_title() != current.active_title() {
            delta.active_window_changed = Some(ActiveWindowChange {
                from: previous.active_title().map(str::to_string),
                to: current.active_title().map(str::to_string),
            });
        }
        delta.screen_changed = previous.screen != current.screen;
        delta
    }

    pub fn is_empty(&self) -> bool {
        self.windows_added.is_empty()
            && self.windows_removed.is_empty()
            && self.windows_changed.is_empty()
            && self.active_window_changed.is_none()
            && !self.screen_changed
    }

    /// A window went away, focus moved, or several windows appeared.
    pub fn is_significant(&self) -> bool {
        !self.windows_removed.is_empty() || self.active_window_changed.is_some() || self.windows_added.len() > 2
    }

    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.windows_added.is_empty() {
            parts.push(format!("{} window(s) opened", self.windows_added.len()));
        }
        if !self.windows_removed.is_empty() {
            parts.push(format!("{} window(s) closed", self.windows_removed.len()));
        }
        if !self.windows_changed.is_empty() {
            parts.push(format!("{} window(s) changed", self.windows_changed.len()));
        }
        if let Some(change) = &self.active_window_changed {
            parts.push(format!(
                "active window '{}' -> '{}'",
                change.from.as_deref().unwrap_or(""),
                change.to.as_deref().unwrap_or("")
            ));
        }
        if self.screen_changed {
            parts.push("screen size changed".into());
        }
        if parts.is_empty() {
            "no change".into()
        } else {
            parts.join(", ")
        }
    }

    /// Command names likely disturbed by this change.
    pub fn affected_commands(&self) -> Vec<&'static str> {
        let mut affected = Vec::new();
        if !self.windows_removed.is_empty() || self.active_window_changed.is_some() {
            affected.push("WINDOW_FOCUS");
        }
        if !self.windows_added.is_empty() {
            affected.extend(["MOUSE_CLICK", "KEY_PRESS"]);
        }
        affected
    }
}

/// `1 - 0.1·|Δwindows| - 0.3·[active differs]`, floored at zero.
pub fn similarity(previous: &EnvironmentSnapshot, current: &EnvironmentSnapshot) -> f64 {
    let count_diff = previous.window_count().abs_diff(current.window_count()) as f64;
    let mut score = 1.0 - 0.1 * count_diff;
    if previous.active_title() != current.active_title() {
        score -= 0.3;
    }
    score.max(0.0)
}

// ── Adaptation rules ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCondition {
    WindowClosed,
    WindowChanged,
    WindowsAdded,
}

impl ChangeCondition {
    fn holds(self, delta: &EnvironmentDelta) -> bool {
        match self {
            Self::WindowClosed => !delta.windows_removed.is_empty(),
            Self::WindowChanged => delta.active_window_changed.is_some(),
            Self::WindowsAdded => !delta.windows_added.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdaptationAction {
    RetryCommand,
    WaitAndRetry { wait_ms: u64 },
    FindAlternativeWindow,
}

impl AdaptationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RetryCommand => "retry_command",
            Self::WaitAndRetry { .. } => "wait_and_retry",
            Self::FindAlternativeWindow => "find_alternative_window",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationRule {
    pub name: String,
    pub condition: ChangeCondition,
    pub action: AdaptationAction,
    /// Higher runs first
    pub priority: i32,
    pub enabled: bool,
}

impl AdaptationRule {
    pub fn new(name: impl Into<String>, condition: ChangeCondition, action: AdaptationAction, priority: i32) -> Self {
        Self {
            name: name.into(),
            condition,
            action,
            priority,
            enabled: true,
        }
    }
}

pub fn default_rules() -> Vec<AdaptationRule> {
    vec![
        AdaptationRule::new("window_closed", ChangeCondition::WindowClosed, AdaptationAction::RetryCommand, 3),
        AdaptationRule::new(
            "window_changed",
            ChangeCondition::WindowChanged,
            AdaptationAction::WaitAndRetry { wait_ms: 1000 },
            2,
        ),
        AdaptationRule::new(
            "windows_added",
            ChangeCondition::WindowsAdded,
            AdaptationAction::FindAlternativeWindow,
            1,
        ),
    ]
}

/// Fallback commands for operations that keep failing.
pub fn alternatives_for(command: &str) -> Vec<Command> {
    match command {
        "WINDOW_FOCUS" => vec![
            Command::new("WINDOW_ENUMERATE").with_description("Enumerate windows to find the target"),
            Command::new("WINDOW_FIND").with_description("Find window by partial title match"),
        ],
        "MOUSE_CLICK" => vec![
            Command::new("MOUSE_DOUBLE_CLICK").with_description("Double-click instead"),
            Command::new("KEY_PRESS")
                .with_param("key", "tab")
                .with_description("Navigate using keyboard instead"),
        ],
        _ => Vec::new(),
    }
}

// ── Recorded changes ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentChange {
    pub detected_at: DateTime<Utc>,
    pub delta: EnvironmentDelta,
    pub similarity: f64,
    pub significant: bool,
    pub summary: String,
    /// Actions suggested by matching rules, highest priority first
    pub adaptations: Vec<AdaptationAction>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMetrics {
    pub attempts: u64,
    pub successes: u64,
}

impl CommandMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            1.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

#[derive(Default)]
struct Observed {
    last: Option<EnvironmentSnapshot>,
    changes: VecDeque<EnvironmentChange>,
}

struct Running {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct FeedbackLoop {
    config: FeedbackConfig,
    perception: Arc<dyn Perception>,
    events: Option<Arc<EventBus>>,
    observed: Mutex<Observed>,
    rules: Mutex<Vec<AdaptationRule>>,
    metrics: Mutex<HashMap<String, CommandMetrics>>,
    running: Mutex<Option<Running>>,
}

impl FeedbackLoop {
    pub fn new(config: FeedbackConfig, perception: Arc<dyn Perception>) -> Self {
        Self {
            config,
            perception,
            events: None,
            observed: Mutex::new(Observed::default()),
            rules: Mutex::new(default_rules()),
            metrics: Mutex::new(HashMap::new()),
            running: Mutex::new(None),
        }
    }

    /// Publish changes on `events` and tally `CommandExecuted` events from it.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    // ── Monitoring thread ──────────────────────────────────────

    /// Start the monitoring thread. Returns false if disabled or already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.config.enabled {
            debug!("Feedback loop disabled");
            return false;
        }
        let mut running = self.running.lock().unwrap();
        if running.is_some() {
            return false;
        }

        let stop = CancellationToken::new();
        let this = Arc::clone(self);
        let token = stop.clone();
        let mut executed = self.events.as_ref().map(|bus| bus.subscribe());
        let interval = Duration::from_millis(self.config.check_interval_ms.max(1));

        let spawned = std::thread::Builder::new()
            .name("deskpilot-feedback".into())
            .spawn(move || {
                info!(interval_ms = interval.as_millis() as u64, "Feedback loop started");
                while !token.is_cancelled() {
                    if let Some(rx) = executed.as_mut() {
                        this.drain_command_events(rx);
                    }
                    this.check_now();
                    sleep_unless_stopped(&token, interval);
                }
                info!("Feedback loop stopped");
            });

        match spawned {
            Ok(handle) => {
                *running = Some(Running { stop, handle });
                true
            }
            Err(e) => {
                warn!(error = %e, "Could not spawn feedback thread");
                false
            }
        }
    }

    pub fn stop(&self) {
        let Some(running) = self.running.lock().unwrap().take() else {
            return;
        };
        running.stop.cancel();
        if running.handle.join().is_err() {
            warn!("Feedback thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().unwrap().is_some()
    }

    fn drain_command_events(&self, rx: &mut broadcast::Receiver<Arc<DomainEvent>>) {
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    if let DomainEvent::CommandExecuted { command, success, .. } = event.as_ref() {
                        self.record_command(command, *success);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "Feedback loop lagged behind command events");
                }
                Err(_) => break,
            }
        }
    }

    // ── Observation ────────────────────────────────────────────

    /// Take a snapshot now and compare it with the previous one.
    pub fn check_now(&self) -> Option<EnvironmentChange> {
        match self.perception.gather_environment_info() {
            Ok(snapshot) => self.observe(snapshot),
            Err(e) => {
                warn!(error = %e, "Feedback snapshot failed");
                None
            }
        }
    }

    /// Compare `snapshot` with the previous one and record a meaningful change.
    ///
    /// The first snapshot only establishes the baseline.
    pub fn observe(&self, snapshot: EnvironmentSnapshot) -> Option<EnvironmentChange> {
        let mut observed = self.observed.lock().unwrap();
        let Some(previous) = observed.last.replace(snapshot.clone()) else {
            return None;
        };

        let score = similarity(&previous, &snapshot);
        let delta = EnvironmentDelta::between(&previous, &snapshot);
        if score >= SIMILARITY_THRESHOLD && !delta.screen_changed {
            return None;
        }

        let change = EnvironmentChange {
            detected_at: Utc::now(),
            significant: delta.is_significant(),
            summary: delta.summary(),
            adaptations: self.matching_rules(&delta).iter().map(|r| r.action).collect(),
            similarity: score,
            delta,
        };

        observed.changes.push_back(change.clone());
        let limit = self.config.history_limit.max(1);
        while observed.changes.len() > limit {
            observed.changes.pop_front();
        }
        drop(observed);

        info!(
            summary = %change.summary,
            similarity = change.similarity,
            significant = change.significant,
            "Environment change detected"
        );
        if let Some(events) = &self.events {
            events.publish(DomainEvent::EnvironmentChanged {
                summary: change.summary.clone(),
                significant: change.significant,
                timestamp: change.detected_at,
            });
        }
        Some(change)
    }

    pub fn last_snapshot(&self) -> Option<EnvironmentSnapshot> {
        self.observed.lock().unwrap().last.clone()
    }

    /// Up to `n` most recent changes, oldest first.
    pub fn latest_changes(&self, n: usize) -> Vec<EnvironmentChange> {
        let observed = self.observed.lock().unwrap();
        let skip = observed.changes.len().saturating_sub(n);
        observed.changes.iter().skip(skip).cloned().collect()
    }

    /// Take every recorded change, leaving the history empty.
    pub fn drain_changes(&self) -> Vec<EnvironmentChange> {
        self.observed.lock().unwrap().changes.drain(..).collect()
    }

    // ── Rules ──────────────────────────────────────────────────

    fn matching_rules(&self, delta: &EnvironmentDelta) -> Vec<AdaptationRule> {
        let mut matched: Vec<AdaptationRule> = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.enabled && r.condition.holds(delta))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.priority.cmp(&a.priority));
        matched
    }

    pub fn add_rule(&self, rule: AdaptationRule) {
        self.rules.lock().unwrap().push(rule);
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        let mut rules = self.rules.lock().unwrap();
        let before = rules.len();
        rules.retain(|r| r.name != name);
        rules.len() != before
    }

    pub fn set_rule_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut rules = self.rules.lock().unwrap();
        match rules.iter_mut().find(|r| r.name == name) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn rules(&self) -> Vec<AdaptationRule> {
        self.rules.lock().unwrap().clone()
    }

    /// Write a change's suggested adaptations into `ctx` as variables.
    pub fn apply_adaptations(&self, change: &EnvironmentChange, ctx: &mut ExecutionContext) {
        for action in &change.adaptations {
            match action {
                AdaptationAction::RetryCommand => {
                    ctx.set_variable("retry_required", true);
                    ctx.set_variable("retry_reason", "Environment change detected");
                }
                AdaptationAction::WaitAndRetry { wait_ms } => {
                    ctx.set_variable("wait_required", true);
                    ctx.set_variable("wait_duration_ms", *wait_ms);
                }
                AdaptationAction::FindAlternativeWindow => {
                    ctx.set_variable("find_alternative", true);
                    ctx.set_variable("alternative_type", "window");
                }
            }
        }
        if change.significant {
            ctx.set_variable("window_change_detected", true);
            ctx.set_variable("window_delta", serde_json::to_value(&change.delta).unwrap_or(Value::Null));
        }
        ctx.log(format!("Environment adaptation: {}", change.summary));
    }

    // ── Command metrics ────────────────────────────────────────

    pub fn record_command(&self, command: &str, success: bool) {
        let mut metrics = self.metrics.lock().unwrap();
        let entry = metrics.entry(command.to_string()).or_default();
        entry.attempts += 1;
        if success {
            entry.successes += 1;
        }
    }

    /// 1.0 for commands never seen.
    pub fn success_rate(&self, command: &str) -> f64 {
        self.metrics
            .lock()
            .unwrap()
            .get(command)
            .map(CommandMetrics::success_rate)
            .unwrap_or(1.0)
    }

    pub fn success_metrics(&self) -> Value {
        let metrics = self.metrics.lock().unwrap();
        let mut out = serde_json::Map::new();
        for (name, m) in metrics.iter() {
            out.insert(
                name.clone(),
                json!({
                    "attempts": m.attempts,
                    "successes": m.successes,
                    "success_rate": m.success_rate(),
                }),
            );
        }
        Value::Object(out)
    }

    pub fn reset_metrics(&self) {
        self.metrics.lock().unwrap().clear();
    }

    /// Alternatives for commands that the latest change disturbs and that
    /// have been failing.
    pub fn suggest_alternatives(&self) -> Vec<Value> {
        let Some(change) = self.latest_changes(1).pop() else {
            return Vec::new();
        };
        change
            .delta
            .affected_commands()
            .into_iter()
            .filter_map(|name| {
                let rate = self.success_rate(name);
                (rate < LOW_SUCCESS_RATE).then(|| {
                    json!({
                        "command": name,
                        "success_rate": rate,
                        "alternatives": alternatives_for(name),
                    })
                })
            })
            .collect()
    }
}

fn sleep_unless_stopped(token: &CancellationToken, duration: Duration) {
    let mut remaining = duration;
    while !remaining.is_zero() && !token.is_cancelled() {
        let slice = remaining.min(STOP_SLICE);
        std::thread::sleep(slice);
        remaining -= slice;
    }
}
