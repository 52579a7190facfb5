//! Error classification: which recovery strategy fits a failure message.
//!
//! The classification is plain substring matching over lower-cased error
//! text. The pattern lists come from configuration so deployments can tune
//! them without code changes.

use deskpilot_config::RecoveryConfig;
use serde::{Deserialize, Serialize};

/// How a failed command should be recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Retry with small parameter perturbations
    SimpleRetry,
    /// Ask the planner to analyze the failure and propose alternatives
    LlmAnalysis,
}

impl RecoveryStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SimpleRetry => "simple_retry",
            Self::LlmAnalysis => "llm_analysis",
        }
    }
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPolicy {
    simple_retry_patterns: Vec<String>,
    llm_patterns: Vec<String>,
}

impl RecoveryPolicy {
    pub fn new(simple_retry_patterns: Vec<String>, llm_patterns: Vec<String>) -> Self {
        Self {
            simple_retry_patterns: lowercase(simple_retry_patterns),
            llm_patterns: lowercase(llm_patterns),
        }
    }

    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self::new(
            config.simple_retry_patterns.clone(),
            config.llm_patterns.clone(),
        )
    }

    /// Simple-retry patterns win over LLM patterns; unmatched errors get a
    /// simple retry.
    pub fn classify(&self, error: &str) -> RecoveryStrategy {
        let error = error.to_lowercase();
        if self.simple_retry_patterns.iter().any(|p| error.contains(p.as_str())) {
            RecoveryStrategy::SimpleRetry
        } else if self.llm_patterns.iter().any(|p| error.contains(p.as_str())) {
            RecoveryStrategy::LlmAnalysis
        } else {
            RecoveryStrategy::SimpleRetry
        }
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

fn lowercase(patterns: Vec<String>) -> Vec<String> {
    patterns
        .into_iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_get_simple_retry() {
        let policy = RecoveryPolicy::default();
        assert_eq!(policy.classify("Connection reset by peer"), RecoveryStrategy::SimpleRetry);
        assert_eq!(policy.classify("operation TIMEOUT"), RecoveryStrategy::SimpleRetry);
    }

    #[test]
    fn lookup_errors_escalate() {
        let policy = RecoveryPolicy::default();
        assert_eq!(policy.classify("window_focus failed: Window not found"), RecoveryStrategy::LlmAnalysis);
        assert_eq!(policy.classify("Access denied"), RecoveryStrategy::LlmAnalysis);
        assert_eq!(policy.classify("UI element is disabled"), RecoveryStrategy::LlmAnalysis);
    }

    #[test]
    fn simple_patterns_take_precedence() {
        let policy = RecoveryPolicy::default();
        assert_eq!(
            policy.classify("network path not found"),
            RecoveryStrategy::SimpleRetry
        );
    }

    #[test]
    fn unknown_errors_default_to_simple_retry() {
        let policy = RecoveryPolicy::new(vec![], vec!["boom".into()]);
        assert_eq!(policy.classify("something odd"), RecoveryStrategy::SimpleRetry);
        assert_eq!(policy.classify("BOOM"), RecoveryStrategy::LlmAnalysis);
    }
}
