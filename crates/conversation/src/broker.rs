//! The user-interaction broker: a mailbox for questions put to the human.
//!
//! A request is registered with a prompt, an expected input type, and a
//! deadline. The front end answers it through [`InteractionBroker::provide_response`];
//! the asking side blocks in [`InteractionBroker::wait_for_response`] until the
//! answer arrives, the deadline passes, or the request is cancelled. An answer
//! is delivered exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use deskpilot_core::error::InteractionError;
use deskpilot_core::{
    CancellationToken, DomainEvent, EventBus, ExecutionResult, FailureKind, InputType,
    UserInteractionRequest, UserInterface,
};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Granularity of cancellation checks while waiting.
const WAIT_SLICE: Duration = Duration::from_millis(50);

struct Pending {
    request: UserInteractionRequest,
    deadline: Instant,
    timeout_ms: u64,
}

pub struct InteractionBroker {
    pending: Mutex<HashMap<String, Pending>>,
    changed: Condvar,
    default_timeout: Duration,
    ui: Option<Arc<dyn UserInterface>>,
    events: Option<Arc<EventBus>>,
}

impl InteractionBroker {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            changed: Condvar::new(),
            default_timeout,
            ui: None,
            events: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<dyn UserInterface>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Register a request and notify the front end. Returns its id.
    pub fn request_input(
        &self,
        conversation_id: &str,
        prompt: &str,
        input_type: InputType,
        options: Value,
        timeout: Option<Duration>,
    ) -> String {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let interaction_id = new_interaction_id();
        let now = Utc::now();
        let is_urgent = matches!(input_type, InputType::Password | InputType::Confirmation)
            || options.get("urgent").and_then(Value::as_bool).unwrap_or(false);

        let request = UserInteractionRequest {
            interaction_id: interaction_id.clone(),
            conversation_id: conversation_id.to_string(),
            prompt_message: prompt.to_string(),
            input_type,
            input_options: options,
            request_time: now,
            timeout_time: now + chrono::Duration::milliseconds(timeout.as_millis() as i64),
            is_urgent,
            has_response: false,
            user_response: Value::Null,
        };

        self.pending.lock().unwrap().insert(
            interaction_id.clone(),
            Pending {
                request: request.clone(),
                deadline: Instant::now() + timeout,
                timeout_ms: timeout.as_millis() as u64,
            },
        );

        info!(
            interaction_id = %interaction_id,
            conversation_id,
            input_type = input_type.as_str(),
            urgent = is_urgent,
            "User input requested"
        );
        if let Some(ui) = &self.ui {
            ui.notify_interaction(&request);
        }
        if let Some(events) = &self.events {
            events.publish(DomainEvent::InteractionRequested {
                interaction_id: interaction_id.clone(),
                input_type: input_type.as_str().to_string(),
                urgent: is_urgent,
                timestamp: now,
            });
        }
        interaction_id
    }

    /// Record an answer. Invalid shapes leave the request pending.
    pub fn provide_response(&self, interaction_id: &str, response: Value) -> Result<(), InteractionError> {
        let mut pending = self.pending.lock().unwrap();
        let Some(entry) = pending.get_mut(interaction_id) else {
            return Err(InteractionError::NotFound(interaction_id.to_string()));
        };
        if entry.request.has_response {
            return Err(InteractionError::AlreadyAnswered(interaction_id.to_string()));
        }
        entry
            .request
            .input_type
            .validate(&response, &entry.request.input_options)
            .map_err(|reason| InteractionError::InvalidResponse {
                interaction_id: interaction_id.to_string(),
                reason,
            })?;

        entry.request.has_response = true;
        entry.request.user_response = response;
        drop(pending);
        self.changed.notify_all();
        debug!(interaction_id, "User response recorded");
        Ok(())
    }

    /// Block until the request is answered, times out, or is cancelled.
    ///
    /// The request leaves the registry in every case.
    pub fn wait_for_response(&self, interaction_id: &str, cancel: &CancellationToken) -> ExecutionResult {
        let mut pending = self.pending.lock().unwrap();
        loop {
            let Some(entry) = pending.get(interaction_id) else {
                return ExecutionResult::cancelled(format!("User interaction cancelled: {interaction_id}"));
            };

            if entry.request.has_response {
                let Some(entry) = pending.remove(interaction_id) else {
                    unreachable!("entry observed under the same lock");
                };
                let answer = entry.request.user_response;
                return ExecutionResult::completed(render_answer(&answer)).with_result(json!({
                    "interaction_id": interaction_id,
                    "user_response": answer,
                }));
            }

            let now = Instant::now();
            if now >= entry.deadline {
                let timeout_ms = entry.timeout_ms;
                pending.remove(interaction_id);
                warn!(interaction_id, timeout_ms, "User input timed out");
                return ExecutionResult::failed(
                    FailureKind::Timeout,
                    format!("User input timeout after {timeout_ms}ms"),
                );
            }

            if cancel.is_cancelled() {
                pending.remove(interaction_id);
                return ExecutionResult::cancelled(format!("User interaction cancelled: {interaction_id}"));
            }

            let slice = WAIT_SLICE.min(entry.deadline - now);
            pending = self.changed.wait_timeout(pending, slice).unwrap().0;
        }
    }

    /// Unanswered requests, oldest first.
    pub fn pending(&self) -> Vec<UserInteractionRequest> {
        let mut out: Vec<UserInteractionRequest> = self
            .pending
            .lock()
            .unwrap()
            .values()
            .filter(|p| !p.request.has_response)
            .map(|p| p.request.clone())
            .collect();
        out.sort_by_key(|r| r.request_time);
        out
    }

    pub fn request(&self, interaction_id: &str) -> Option<UserInteractionRequest> {
        self.pending
            .lock()
            .unwrap()
            .get(interaction_id)
            .map(|p| p.request.clone())
    }

    /// Withdraw a request; a waiter sees CANCELLED.
    pub fn cancel(&self, interaction_id: &str) -> bool {
        let removed = self.pending.lock().unwrap().remove(interaction_id).is_some();
        if removed {
            self.changed.notify_all();
            debug!(interaction_id, "User interaction cancelled");
        }
        removed
    }

    /// Withdraw every request belonging to a conversation.
    pub fn cancel_conversation(&self, conversation_id: &str) -> usize {
        let mut pending = self.pending.lock().unwrap();
        let before = pending.len();
        pending.retain(|_, p| p.request.conversation_id != conversation_id);
        let removed = before - pending.len();
        drop(pending);
        if removed > 0 {
            self.changed.notify_all();
        }
        removed
    }

    /// Remove unanswered requests past their deadline.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut pending = self.pending.lock().unwrap();
        let before = pending.len();
        pending.retain(|_, p| p.request.has_response || p.deadline > now);
        let removed = before - pending.len();
        drop(pending);
        if removed > 0 {
            self.changed.notify_all();
            debug!(removed, "Swept expired user interactions");
        }
        removed
    }
}

fn new_interaction_id() -> String {
    let hex = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("INT-{}", &hex[..12])
}

/// The answer as plain text for command output.
fn render_answer(answer: &Value) -> String {
    for key in ["text", "file_path"] {
        if let Some(Value::String(s)) = answer.get(key) {
            return s.clone();
        }
    }
    if let Some(choice) = answer.get("choice") {
        return deskpilot_core::value_to_plain_string(choice);
    }
    if let Some(Value::Bool(b)) = answer.get("confirmed") {
        return b.to_string();
    }
    answer.to_string()
}
