//! Collaborators for running without a real desktop or planner.
//!
//! The dry-run desktop accepts every operation, logs it, and keeps a
//! transcript so the caller can show what a script would have done.

use std::sync::Mutex;

use deskpilot_core::desktop::ControlResult;
use deskpilot_core::error::{PerceptionError, PlannerError};
use deskpilot_core::{
    DesktopControl, EnvironmentSnapshot, MouseButton, Perception, Plan, Planner, PlanningContext, ScreenImage,
    WindowInfo,
};
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, Default)]
pub struct DryRunDesktop {
    actions: Mutex<Vec<String>>,
}

impl DryRunDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation performed so far, in order.
    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }

    fn perform(&self, action: String) -> ControlResult {
        info!(action = %action, "dry-run");
        self.actions.lock().unwrap().push(action);
        Ok(())
    }
}

impl DesktopControl for DryRunDesktop {
    fn mouse_move(&self, x: i32, y: i32) -> ControlResult {
        self.perform(format!("move mouse to ({x}, {y})"))
    }

    fn mouse_click(&self, x: i32, y: i32, button: MouseButton, double: bool) -> ControlResult {
        let kind = if double { "double-click" } else { "click" };
        self.perform(format!("{button:?} {kind} at ({x}, {y})"))
    }

    fn keyboard_type(&self, text: &str, _delay: u64) -> ControlResult {
        self.perform(format!("type {text:?}"))
    }

    fn keyboard_hotkey(&self, keys: &[String]) -> ControlResult {
        self.perform(format!("press {}", keys.join("+")))
    }

    fn window_find(&self, title: &str) -> ControlResult<Option<WindowInfo>> {
        self.perform(format!("find window {title:?}"))?;
        Ok(Some(WindowInfo::titled(title)))
    }

    fn window_focus(&self, title: &str) -> ControlResult {
        self.perform(format!("focus window {title:?}"))
    }

    fn window_resize(&self, title: &str, width: i32, height: i32) -> ControlResult {
        self.perform(format!("resize window {title:?} to {width}x{height}"))
    }

    fn window_move(&self, title: &str, x: i32, y: i32) -> ControlResult {
        self.perform(format!("move window {title:?} to ({x}, {y})"))
    }

    fn window_enumerate(&self) -> ControlResult<Vec<WindowInfo>> {
        self.perform("enumerate windows".into())?;
        Ok(Vec::new())
    }

    fn window_close(&self, title: &str) -> ControlResult {
        self.perform(format!("close window {title:?}"))
    }

    fn process_launch(&self, path: &str, args: &[String]) -> ControlResult<u32> {
        self.perform(format!("launch {path} {}", args.join(" ")).trim_end().to_string())?;
        Ok(0)
    }

    fn process_terminate(&self, name: &str) -> ControlResult {
        self.perform(format!("terminate {name}"))
    }

    fn file_find(&self, directory: &str, pattern: &str) -> ControlResult<Vec<String>> {
        self.perform(format!("find {pattern:?} in {directory}"))?;
        Ok(Vec::new())
    }

    fn file_move(&self, source: &str, destination: &str) -> ControlResult {
        self.perform(format!("move {source} to {destination}"))
    }

    fn file_delete(&self, path: &str) -> ControlResult {
        self.perform(format!("delete {path}"))
    }

    fn file_create_dir(&self, path: &str) -> ControlResult {
        self.perform(format!("create directory {path}"))
    }

    fn file_info(&self, path: &str) -> ControlResult<Value> {
        self.perform(format!("stat {path}"))?;
        Ok(json!({"path": path, "exists": false}))
    }

    fn clipboard_get(&self) -> ControlResult<String> {
        self.perform("read clipboard".into())?;
        Ok(String::new())
    }

    fn clipboard_set(&self, text: &str) -> ControlResult {
        self.perform(format!("set clipboard to {text:?}"))
    }

    fn shell_execute(&self, command: &str) -> ControlResult<String> {
        self.perform(format!("shell {command:?}"))?;
        Ok(String::new())
    }
}

/// Perception with no screen attached.
pub struct NoScreen;

impl Perception for NoScreen {
    fn capture_screen(&self) -> Result<ScreenImage, PerceptionError> {
        Err(PerceptionError::Unavailable("no screen in dry-run mode".into()))
    }

    fn gather_environment_info(&self) -> Result<EnvironmentSnapshot, PerceptionError> {
        let mut snapshot = EnvironmentSnapshot::empty();
        snapshot.description = "dry-run desktop".into();
        Ok(snapshot)
    }
}

/// Stands in when no planner backend is configured.
pub struct OfflinePlanner;

impl Planner for OfflinePlanner {
    fn generate_plan_with_context(&self, _request: &str, _context: &PlanningContext) -> Result<Plan, PlannerError> {
        Err(PlannerError::NotConfigured("no planner backend in the command-line runner".into()))
    }

    fn validate_configuration(&self) -> bool {
        true
    }
}
