//! Planner collaborator: the LLM side of the control plane.
//!
//! A planner turns a natural-language request plus context into a [`Plan`].
//! During a conversation it may instead ask for more environment data, adapt
//! earlier commands, or ask the user something; those are [`PlannerTurn`]s.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::command::Command;
use crate::environment::EnvironmentSnapshot;
use crate::error::PlannerError;
use crate::interface::InputType;

/// Everything a planner gets to see besides the request text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanningContext {
    pub request_id: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentSnapshot>,
    /// Extra structured input (environment comparisons, failure details)
    #[serde(default)]
    pub structured_data: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversation_history: Vec<Value>,
}

/// A planner's answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub is_valid: bool,
    /// Present when the planner wants a conversational turn instead of
    /// (or before) plain execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<PlannerTurn>,
}

impl Plan {
    pub fn valid(commands: Vec<Command>) -> Self {
        Self {
            commands,
            is_valid: true,
            ..Self::default()
        }
    }
}

/// One step of a multi-turn planning session, tagged by `action_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum PlannerTurn {
    RequestEnvironmentData {
        #[serde(default)]
        environment_request: EnvironmentRequest,
    },
    AdaptCommands(AdaptationRequest),
    RequestUserInput(InteractionSpec),
    ExecutePlan {
        #[serde(default)]
        commands: Vec<Command>,
    },
}

/// What environment data the planner wants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentRequest {
    /// `general`, `screen_analysis`, `window_focus`, `coordinate_mapping`,
    /// or `application_state`
    #[serde(rename = "type", default = "default_request_type")]
    pub kind: String,
    #[serde(default)]
    pub include_screenshot: bool,
}

fn default_request_type() -> String {
    "general".into()
}

impl Default for EnvironmentRequest {
    fn default() -> Self {
        Self {
            kind: default_request_type(),
            include_screenshot: false,
        }
    }
}

/// A planner's request to rewrite commands after feedback.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AdaptationRequest {
    #[serde(default = "default_adaptation_type")]
    pub adaptation_type: String,
    #[serde(default)]
    pub original_commands: Vec<Command>,
    #[serde(default)]
    pub modifications: Vec<CommandModification>,
    #[serde(default)]
    pub failed_commands: Vec<Command>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

fn default_adaptation_type() -> String {
    "command_modification".into()
}

/// An index-addressed edit to one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandModification {
    pub command_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_params: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_delay: Option<u64>,
}

/// A planner's request for human input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionSpec {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default = "default_user_prompt", alias = "prompt")]
    pub user_prompt: String,
    #[serde(default, alias = "type")]
    pub input_type: InputType,
    #[serde(default)]
    pub options: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_user_prompt() -> String {
    "Input required".into()
}

/// The LLM collaborator.
pub trait Planner: Send + Sync {
    fn generate_plan_with_context(
        &self,
        request: &str,
        context: &PlanningContext,
    ) -> Result<Plan, PlannerError>;

    /// Whether credentials and endpoint are in place.
    fn validate_configuration(&self) -> bool;

    fn supports_vision(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn turn_parses_from_action_type_tag() {
        let turn: PlannerTurn = serde_json::from_value(json!({
            "action_type": "request_user_input",
            "user_prompt": "Which file?",
            "input_type": "file_path",
            "timeout_ms": 500
        }))
        .unwrap();
        match turn {
            PlannerTurn::RequestUserInput(spec) => {
                assert_eq!(spec.user_prompt, "Which file?");
                assert_eq!(spec.input_type, InputType::FilePath);
                assert_eq!(spec.timeout_ms, Some(500));
            }
            other => panic!("Expected RequestUserInput, got {other:?}"),
        }
    }

    #[test]
    fn environment_request_defaults_to_general() {
        let turn: PlannerTurn =
            serde_json::from_value(json!({"action_type": "request_environment_data"})).unwrap();
        assert_eq!(
            turn,
            PlannerTurn::RequestEnvironmentData {
                environment_request: EnvironmentRequest::default()
            }
        );
    }

    #[test]
    fn adaptation_defaults_to_command_modification() {
        let turn: PlannerTurn = serde_json::from_value(json!({
            "action_type": "adapt_commands",
            "original_commands": [{"command": "MOUSE_CLICK", "parameters": {"x": 1, "y": 2}}],
            "modifications": [{"command_index": 0, "additional_delay": 250}]
        }))
        .unwrap();
        let PlannerTurn::AdaptCommands(req) = turn else {
            panic!("Expected AdaptCommands");
        };
        assert_eq!(req.adaptation_type, "command_modification");
        assert_eq!(req.modifications[0].additional_delay, Some(250));
    }
}
