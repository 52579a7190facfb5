//! Configuration loading, validation, and management for deskpilot.
//!
//! Loads configuration from `~/.deskpilot/config.toml` with environment
//! variable overrides. Validates all settings at startup. Services receive
//! the section they need by value; there is no process-wide config instance.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.deskpilot/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Command execution settings
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Script loading and nesting
    #[serde(default)]
    pub scripts: ScriptsConfig,

    /// Worker threads and planner connection pool
    #[serde(default)]
    pub pool: PoolConfig,

    /// Failure recovery policy
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Conversational planning and user interaction
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Continuous environment monitoring
    #[serde(default)]
    pub feedback: FeedbackConfig,

    /// Top-level request queue
    #[serde(default)]
    pub queue: QueueConfig,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Delay between sequence steps when a command sets none
    #[serde(default = "default_delay_ms")]
    pub default_delay_ms: u64,

    /// Whole-sequence deadline, checked between commands
    #[serde(default = "default_sequence_timeout_ms")]
    pub sequence_timeout_ms: u64,

    /// Prompt before confirm-listed commands (denylisted ones always prompt)
    #[serde(default = "default_true")]
    pub confirmation_required: bool,

    #[serde(default = "default_substitution_max_iterations")]
    pub substitution_max_iterations: usize,

    /// Hard cap for WHILE_LOOP iterations
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u64,

    /// How often WAIT checks for cancellation
    #[serde(default = "default_wait_poll_ms")]
    pub wait_poll_ms: u64,
}

fn default_delay_ms() -> u64 {
    1000
}
fn default_sequence_timeout_ms() -> u64 {
    30_000
}
fn default_substitution_max_iterations() -> usize {
    10
}
fn default_max_loop_iterations() -> u64 {
    1000
}
fn default_wait_poll_ms() -> u64 {
    50
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: default_delay_ms(),
            sequence_timeout_ms: default_sequence_timeout_ms(),
            confirmation_required: true,
            substitution_max_iterations: default_substitution_max_iterations(),
            max_loop_iterations: default_max_loop_iterations(),
            wait_poll_ms: default_wait_poll_ms(),
        }
    }
}

impl ExecutionConfig {
    pub fn sequence_timeout(&self) -> Duration {
        Duration::from_millis(self.sequence_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptsConfig {
    /// Directory relative script paths resolve against
    #[serde(default = "default_script_dir")]
    pub directory: PathBuf,

    #[serde(default = "default_max_nesting_level")]
    pub max_nesting_level: usize,

    #[serde(default = "default_true")]
    pub cache_enabled: bool,
}

fn default_script_dir() -> PathBuf {
    PathBuf::from("scripts")
}
fn default_max_nesting_level() -> usize {
    3
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            directory: default_script_dir(),
            max_nesting_level: default_max_nesting_level(),
            cache_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Concurrent planner sessions
    #[serde(default = "default_planner_connections")]
    pub planner_connections: usize,

    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_worker_threads() -> usize {
    4
}
fn default_planner_connections() -> usize {
    4
}
fn default_acquire_timeout_ms() -> u64 {
    5000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            planner_connections: default_planner_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Recovery records older than this are swept
    #[serde(default = "default_state_max_age_secs")]
    pub state_max_age_secs: u64,

    /// Error fragments that only warrant a plain retry
    #[serde(default = "default_simple_retry_patterns")]
    pub simple_retry_patterns: Vec<String>,

    /// Error fragments that warrant planner-assisted analysis
    #[serde(default = "default_llm_patterns")]
    pub llm_patterns: Vec<String>,
}

fn default_max_retries() -> u32 {
    3
}
fn default_state_max_age_secs() -> u64 {
    15 * 60
}
fn default_simple_retry_patterns() -> Vec<String> {
    vec!["timeout".into(), "connection".into(), "network".into()]
}
fn default_llm_patterns() -> Vec<String> {
    vec![
        "not found".into(),
        "invalid".into(),
        "permission".into(),
        "access denied".into(),
        "ui element".into(),
    ]
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            state_max_age_secs: default_state_max_age_secs(),
            simple_retry_patterns: default_simple_retry_patterns(),
            llm_patterns: default_llm_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Idle conversations older than this are swept
    #[serde(default = "default_expiration_secs")]
    pub expiration_secs: u64,

    /// Snapshots older than this are refreshed before planning
    #[serde(default = "default_environment_staleness_ms")]
    pub environment_staleness_ms: u64,

    /// Default wait for a human answer
    #[serde(default = "default_interaction_timeout_ms")]
    pub interaction_timeout_ms: u64,

    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_max_turns() -> u32 {
    10
}
fn default_expiration_secs() -> u64 {
    600
}
fn default_environment_staleness_ms() -> u64 {
    5000
}
fn default_interaction_timeout_ms() -> u64 {
    30_000
}
fn default_history_limit() -> usize {
    50
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            expiration_secs: default_expiration_secs(),
            environment_staleness_ms: default_environment_staleness_ms(),
            interaction_timeout_ms: default_interaction_timeout_ms(),
            history_limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// Recorded changes kept in memory
    #[serde(default = "default_feedback_history")]
    pub history_limit: usize,
}

fn default_check_interval_ms() -> u64 {
    1000
}
fn default_feedback_history() -> usize {
    100
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: default_check_interval_ms(),
            history_limit: default_feedback_history(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_workers")]
    pub workers: usize,
}

fn default_queue_workers() -> usize {
    1
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_queue_workers(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.deskpilot/config.toml).
    ///
    /// Environment variables override file values:
    /// - `DESKPILOT_SCRIPT_DIR`
    /// - `DESKPILOT_MAX_NESTING`
    /// - `DESKPILOT_WORKER_THREADS`
    /// - `DESKPILOT_CONFIRMATION` (`true`/`false`)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the environment, in production).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(dir) = lookup("DESKPILOT_SCRIPT_DIR") {
            self.scripts.directory = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("DESKPILOT_MAX_NESTING") {
            self.scripts.max_nesting_level = parse_override("DESKPILOT_MAX_NESTING", &raw)?;
        }
        if let Some(raw) = lookup("DESKPILOT_WORKER_THREADS") {
            self.pool.worker_threads = parse_override("DESKPILOT_WORKER_THREADS", &raw)?;
        }
        if let Some(raw) = lookup("DESKPILOT_CONFIRMATION") {
            self.execution.confirmation_required = parse_override("DESKPILOT_CONFIRMATION", &raw)?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".deskpilot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.worker_threads == 0 {
            return Err(ConfigError::ValidationError(
                "pool.worker_threads must be at least 1".into(),
            ));
        }
        if self.pool.planner_connections == 0 {
            return Err(ConfigError::ValidationError(
                "pool.planner_connections must be at least 1".into(),
            ));
        }
        if self.scripts.max_nesting_level == 0 {
            return Err(ConfigError::ValidationError(
                "scripts.max_nesting_level must be at least 1".into(),
            ));
        }
        if self.execution.substitution_max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "execution.substitution_max_iterations must be at least 1".into(),
            ));
        }
        if self.feedback.enabled && self.feedback.check_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "feedback.check_interval_ms must be > 0 when feedback is enabled".into(),
            ));
        }
        if self.queue.workers == 0 {
            return Err(ConfigError::ValidationError(
                "queue.workers must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| {
        ConfigError::ValidationError(format!("{key} has an invalid value: '{raw}'"))
    })
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for deskpilot_core::Error {
    fn from(err: ConfigError) -> Self {
        deskpilot_core::Error::Config {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.execution.default_delay_ms, 1000);
        assert_eq!(config.execution.sequence_timeout_ms, 30_000);
        assert_eq!(config.scripts.max_nesting_level, 3);
        assert_eq!(config.recovery.max_retries, 3);
        assert_eq!(config.conversation.max_turns, 10);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.pool.worker_threads, config.pool.worker_threads);
        assert_eq!(parsed.recovery.llm_patterns, config.recovery.llm_patterns);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[execution]\ndefault_delay_ms = 0\n\n[scripts]\ndirectory = \"automation\"\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.execution.default_delay_ms, 0);
        assert!(config.execution.confirmation_required);
        assert_eq!(config.scripts.directory, PathBuf::from("automation"));
        assert!(config.scripts.cache_enabled);
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = AppConfig::default();
        config.pool.worker_threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_nesting_rejected() {
        let mut config = AppConfig::default();
        config.scripts.max_nesting_level = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("max_nesting_level")
        ));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().pool.planner_connections, 4);
    }

    #[test]
    fn overrides_apply_and_validate_types() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DESKPILOT_SCRIPT_DIR", "/opt/scripts"),
            ("DESKPILOT_MAX_NESTING", "5"),
            ("DESKPILOT_CONFIRMATION", "false"),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.scripts.directory, PathBuf::from("/opt/scripts"));
        assert_eq!(config.scripts.max_nesting_level, 5);
        assert!(!config.execution.confirmation_required);

        let mut bad = AppConfig::default();
        let err = bad
            .apply_overrides(|k| (k == "DESKPILOT_WORKER_THREADS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("DESKPILOT_WORKER_THREADS"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("sequence_timeout_ms"));
        assert!(toml_str.contains("access denied"));
    }
}
