//! User-interface collaborator and the human-input request record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::InterfaceError;

/// Declared shape of an expected answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    #[default]
    Text,
    Password,
    Choice,
    Confirmation,
    FilePath,
}

impl InputType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Password => "password",
            Self::Choice => "choice",
            Self::Confirmation => "confirmation",
            Self::FilePath => "file_path",
        }
    }

    /// Check an answer's shape against this type.
    ///
    /// - text/password: `{"text": string}`
    /// - choice: `{"choice": any}`, which must be in `options.choices` when given
    /// - confirmation: `{"confirmed": bool}`
    /// - file_path: `{"file_path": string}`
    pub fn validate(self, response: &Value, options: &Value) -> Result<(), String> {
        match self {
            Self::Text | Self::Password => match response.get("text") {
                Some(Value::String(_)) => Ok(()),
                _ => Err("Text response must contain 'text' field with string value".into()),
            },
            Self::Choice => {
                let Some(choice) = response.get("choice") else {
                    return Err("Choice response must contain 'choice' field".into());
                };
                match options.get("choices").and_then(Value::as_array) {
                    Some(choices) if !choices.contains(choice) => {
                        Err("Choice not in allowed options".into())
                    }
                    _ => Ok(()),
                }
            }
            Self::Confirmation => match response.get("confirmed") {
                Some(Value::Bool(_)) => Ok(()),
                _ => Err(
                    "Confirmation response must contain 'confirmed' field with boolean value"
                        .into(),
                ),
            },
            Self::FilePath => match response.get("file_path") {
                Some(Value::String(_)) => Ok(()),
                _ => Err("File path response must contain 'file_path' field with string value".into()),
            },
        }
    }
}

/// A pending request for human input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInteractionRequest {
    pub interaction_id: String,
    pub conversation_id: String,
    pub prompt_message: String,
    pub input_type: InputType,
    pub input_options: Value,
    pub request_time: DateTime<Utc>,
    pub timeout_time: DateTime<Utc>,
    pub is_urgent: bool,
    pub has_response: bool,
    #[serde(default)]
    pub user_response: Value,
}

impl UserInteractionRequest {
    /// Prompt text as shown to the user; choices are listed with numbers.
    pub fn formatted_prompt(&self) -> String {
        let mut prompt = self.prompt_message.clone();
        if self.input_type == InputType::Choice
            && let Some(choices) = self.input_options.get("choices").and_then(Value::as_array)
        {
            prompt.push_str("\nOptions:");
            for (i, choice) in choices.iter().enumerate() {
                let label = choice.as_str().map(str::to_string).unwrap_or_else(|| choice.to_string());
                prompt.push_str(&format!("\n  {}. {}", i + 1, label));
            }
        }
        prompt
    }
}

/// The console/UI front end.
pub trait UserInterface: Send + Sync {
    /// Ask a yes/no question. An error counts as "no".
    fn request_confirmation(&self, prompt: &str) -> Result<bool, InterfaceError>;

    fn display_feedback(&self, message: &str);

    /// Called when a new human-input request is registered.
    fn notify_interaction(&self, request: &UserInteractionRequest) {
        self.display_feedback(&request.formatted_prompt());
    }
}
