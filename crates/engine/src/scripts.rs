//! Script documents: loading, validation, caching, and discovery.
//!
//! A script is a JSON document:
//!
//! ```json
//! {
//!   "metadata": { "description": "Log in", "version": "1.0" },
//!   "variables": { "user": "admin" },
//!   "commands": [ { "command": "TYPE_TEXT", "parameters": { "text": "${user}" } } ],
//!   "result_variable": "login_status",
//!   "continue_on_failure": false
//! }
//! ```
//!
//! `sequence` is accepted in place of `commands`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use deskpilot_config::ScriptsConfig;
use deskpilot_core::error::ScriptError;
use deskpilot_core::{Command, Variables};
use deskpilot_security::{PathValidationError, resolve_script_path};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Descriptive script metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub required_parameters: Vec<String>,
    #[serde(default)]
    pub optional_parameters: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// A parsed, validated script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDocument {
    #[serde(alias = "sequence")]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub metadata: ScriptMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_variable: Option<String>,
    #[serde(default)]
    pub continue_on_failure: bool,
}

/// One entry of [`ScriptManager::list_available_scripts`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptSummary {
    /// Path relative to the script directory
    pub path: String,
    pub metadata: ScriptMetadata,
}

/// Loads scripts from a directory and caches parsed documents.
pub struct ScriptManager {
    directory: PathBuf,
    cache_enabled: bool,
    cache: RwLock<HashMap<PathBuf, Arc<ScriptDocument>>>,
}

impl ScriptManager {
    pub fn new(directory: impl Into<PathBuf>, cache_enabled: bool) -> Self {
        Self {
            directory: directory.into(),
            cache_enabled,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &ScriptsConfig) -> Self {
        Self::new(config.directory.clone(), config.cache_enabled)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Resolve a script reference without touching the filesystem.
    pub fn resolve_path(&self, path: &str) -> Result<PathBuf, ScriptError> {
        resolve_script_path(path, &self.directory).map_err(|e| ScriptError::InvalidPath {
            path: path.to_string(),
            reason: match e {
                PathValidationError::Empty => "path is empty".into(),
                PathValidationError::PathTraversal { .. } => "path traversal is not allowed".into(),
            },
        })
    }

    /// Load, parse, and validate a script, using the cache when enabled.
    pub fn load_script(&self, path: &str) -> Result<Arc<ScriptDocument>, ScriptError> {
        let resolved = self.resolve_path(path)?;

        if self.cache_enabled
            && let Some(doc) = self.cache.read().unwrap().get(&resolved)
        {
            debug!(script = %resolved.display(), "Script cache hit");
            return Ok(Arc::clone(doc));
        }

        let display_path = resolved.display().to_string();
        if !resolved.exists() {
            return Err(ScriptError::NotFound { path: display_path });
        }
        let content = std::fs::read_to_string(&resolved).map_err(|e| ScriptError::Read {
            path: display_path.clone(),
            reason: e.to_string(),
        })?;
        let raw: Value = serde_json::from_str(&content).map_err(|e| ScriptError::Parse {
            path: display_path.clone(),
            reason: e.to_string(),
        })?;
        let doc = Arc::new(Self::parse_document(&display_path, raw)?);

        info!(script = %display_path, commands = doc.commands.len(), "Script loaded");
        if self.cache_enabled {
            self.cache
                .write()
                .unwrap()
                .insert(resolved, Arc::clone(&doc));
        }
        Ok(doc)
    }

    /// Validate then deserialize a raw script value.
    pub fn parse_document(path: &str, raw: Value) -> Result<ScriptDocument, ScriptError> {
        Self::validate_script(&raw).map_err(|reason| ScriptError::Malformed {
            path: path.to_string(),
            reason,
        })?;
        serde_json::from_value(raw).map_err(|e| ScriptError::Malformed {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Structural checks on a raw script document.
    ///
    /// Rules:
    /// - the document is an object
    /// - `commands` (or `sequence`) is a non-empty array of objects
    /// - each command has a string `command` or `action`
    /// - `variables`, when present, is an object
    pub fn validate_script(doc: &Value) -> Result<(), String> {
        let Some(obj) = doc.as_object() else {
            return Err("Script must be a JSON object".into());
        };

        let commands = obj
            .get("commands")
            .or_else(|| obj.get("sequence"))
            .ok_or_else(|| "Script must contain a 'commands' or 'sequence' array".to_string())?;
        let Some(commands) = commands.as_array() else {
            return Err("'commands' must be an array".into());
        };
        if commands.is_empty() {
            return Err("Script contains no commands".into());
        }

        for (i, command) in commands.iter().enumerate() {
            let Some(command) = command.as_object() else {
                return Err(format!("Command {} is not an object", i + 1));
            };
            let name = command.get("command").or_else(|| command.get("action"));
            if !name.is_some_and(Value::is_string) {
                return Err(format!("Command {} is missing a string 'command' field", i + 1));
            }
        }

        if let Some(variables) = obj.get("variables")
            && !variables.is_object()
        {
            return Err("'variables' must be an object".into());
        }

        Ok(())
    }

    pub fn script_metadata(&self, path: &str) -> Result<ScriptMetadata, ScriptError> {
        Ok(self.load_script(path)?.metadata.clone())
    }

    /// Every `.json` file under the script directory that parses as a
    /// script, sorted by path. Unreadable files are skipped with a warning.
    pub fn list_available_scripts(&self) -> Vec<ScriptSummary> {
        let mut files = Vec::new();
        collect_json_files(&self.directory, &mut files);
        files.sort();

        files
            .into_iter()
            .filter_map(|file| {
                let relative = file
                    .strip_prefix(&self.directory)
                    .unwrap_or(&file)
                    .to_string_lossy()
                    .replace('\\', "/");
                match self.load_script(&relative) {
                    Ok(doc) => Some(ScriptSummary {
                        path: relative,
                        metadata: doc.metadata.clone(),
                    }),
                    Err(e) => {
                        warn!(script = %relative, error = %e, "Skipping unreadable script");
                        None
                    }
                }
            })
            .collect()
    }

    pub fn clear_cache(&self) {
        self.cache.write().unwrap().clear();
        debug!("Script cache cleared");
    }

    pub fn cached_scripts(&self) -> usize {
        self.cache.read().unwrap().len()
    }
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_json_files(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, name: &str, doc: Value) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();
    }

    #[test]
    fn loads_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "hello.json",
            json!({
                "metadata": {"description": "Say hello"},
                "variables": {"who": "world"},
                "sequence": [{"command": "TYPE_TEXT", "parameters": {"text": "hi ${who}"}}]
            }),
        );
        let manager = ScriptManager::new(dir.path(), true);

        let doc = manager.load_script("hello").unwrap();
        assert_eq!(doc.commands.len(), 1);
        assert_eq!(doc.variables["who"], "world");
        assert_eq!(manager.cached_scripts(), 1);

        // Cached copy survives the file going away
        std::fs::remove_file(dir.path().join("hello.json")).unwrap();
        assert!(manager.load_script("hello.json").is_ok());
        manager.clear_cache();
        assert!(matches!(
            manager.load_script("hello"),
            Err(ScriptError::NotFound { .. })
        ));
    }

    #[test]
    fn validation_rules() {
        assert!(ScriptManager::validate_script(&json!([])).is_err());
        assert!(ScriptManager::validate_script(&json!({})).is_err());
        assert!(ScriptManager::validate_script(&json!({"commands": []})).is_err());
        assert!(ScriptManager::validate_script(&json!({"commands": [1]})).is_err());
        assert!(ScriptManager::validate_script(&json!({"commands": [{"parameters": {}}]})).is_err());
        assert!(
            ScriptManager::validate_script(&json!({"commands": [{"command": "WAIT"}], "variables": []}))
                .is_err()
        );
        assert!(ScriptManager::validate_script(&json!({"commands": [{"action": "wait"}]})).is_ok());
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        let manager = ScriptManager::new(dir.path(), false);
        assert!(matches!(manager.load_script("bad"), Err(ScriptError::Parse { .. })));
    }

    #[test]
    fn traversal_rejected_before_io() {
        let manager = ScriptManager::new("scripts", true);
        assert!(matches!(
            manager.load_script("../secrets"),
            Err(ScriptError::InvalidPath { .. })
        ));
    }

    #[test]
    fn lists_scripts_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "b.json",
            json!({"metadata": {"description": "B"}, "commands": [{"command": "WAIT"}]}),
        );
        write(
            dir.path(),
            "nested/a.json",
            json!({"metadata": {"author": "ops"}, "commands": [{"command": "WAIT"}]}),
        );
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("broken.json"), "[]").unwrap();

        let manager = ScriptManager::new(dir.path(), true);
        let scripts = manager.list_available_scripts();
        let paths: Vec<&str> = scripts.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["b.json", "nested/a.json"]);
        assert_eq!(scripts[0].metadata.description, "B");
        assert_eq!(manager.script_metadata("nested/a").unwrap().author, "ops");
    }
}
