//! Shared test helpers for recovery tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use deskpilot_config::ExecutionConfig;
use deskpilot_core::desktop::ControlResult;
use deskpilot_core::error::{ControlError, InterfaceError, PerceptionError, PlannerError};
use deskpilot_core::{
    DesktopControl, EnvironmentSnapshot, MouseButton, Perception, Plan, Planner, PlanningContext,
    ScreenImage, UserInterface, WindowInfo,
};
use deskpilot_engine::{ExecutionEngine, ScriptManager};

/// A desktop whose operations fail a configured number of times.
#[derive(Default)]
pub struct FlakyDesktop {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, (usize, String)>>,
}

impl FlakyDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_times(&self, operation: &str, times: usize, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(operation.to_string(), (times, message.to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, operation: &str, call: String) -> ControlResult {
        self.calls.lock().unwrap().push(call);
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(operation) {
            Some((remaining, message)) if *remaining > 0 => {
                *remaining -= 1;
                Err(ControlError::failed(operation, message.clone()))
            }
            _ => Ok(()),
        }
    }
}

impl DesktopControl for FlakyDesktop {
    fn mouse_move(&self, x: i32, y: i32) -> ControlResult {
        self.record("mouse_move", format!("mouse_move({x},{y})"))
    }

    fn mouse_click(&self, x: i32, y: i32, button: MouseButton, double: bool) -> ControlResult {
        self.record("mouse_click", format!("mouse_click({x},{y},{button:?},{double})"))
    }

    fn keyboard_type(&self, text: &str, delay: u64) -> ControlResult {
        self.record("keyboard_type", format!("keyboard_type({text},{delay})"))
    }

    fn keyboard_hotkey(&self, keys: &[String]) -> ControlResult {
        self.record("keyboard_hotkey", format!("keyboard_hotkey({})", keys.join("+")))
    }

    fn window_find(&self, title: &str) -> ControlResult<Option<WindowInfo>> {
        self.record("window_find", format!("window_find({title})"))?;
        Ok(Some(WindowInfo::titled(title)))
    }

    fn window_focus(&self, title: &str) -> ControlResult {
        self.record("window_focus", format!("window_focus({title})"))
    }

    fn window_resize(&self, title: &str, width: i32, height: i32) -> ControlResult {
        self.record("window_resize", format!("window_resize({title},{width},{height})"))
    }

    fn window_move(&self, title: &str, x: i32, y: i32) -> ControlResult {
        self.record("window_move", format!("window_move({title},{x},{y})"))
    }

    fn window_enumerate(&self) -> ControlResult<Vec<WindowInfo>> {
        self.record("window_enumerate", "window_enumerate()".into())?;
        Ok(Vec::new())
    }

    fn window_close(&self, title: &str) -> ControlResult {
        self.record("window_close", format!("window_close({title})"))
    }

    fn process_launch(&self, path: &str, _args: &[String]) -> ControlResult<u32> {
        self.record("process_launch", format!("process_launch({path})"))?;
        Ok(1)
    }

    fn process_terminate(&self, name: &str) -> ControlResult {
        self.record("process_terminate", format!("process_terminate({name})"))
    }

    fn file_find(&self, directory: &str, pattern: &str) -> ControlResult<Vec<String>> {
        self.record("file_find", format!("file_find({directory},{pattern})"))?;
        Ok(Vec::new())
    }

    fn file_move(&self, source: &str, destination: &str) -> ControlResult {
        self.record("file_move", format!("file_move({source},{destination})"))
    }

    fn file_delete(&self, path: &str) -> ControlResult {
        self.record("file_delete", format!("file_delete({path})"))
    }

    fn file_create_dir(&self, path: &str) -> ControlResult {
        self.record("file_create_dir", format!("file_create_dir({path})"))
    }

    fn file_info(&self, path: &str) -> ControlResult<serde_json::Value> {
        self.record("file_info", format!("file_info({path})"))?;
        Ok(serde_json::Value::Null)
    }

    fn clipboard_get(&self) -> ControlResult<String> {
        self.record("clipboard_get", "clipboard_get()".into())?;
        Ok(String::new())
    }

    fn clipboard_set(&self, text: &str) -> ControlResult {
        self.record("clipboard_set", format!("clipboard_set({text})"))
    }

    fn shell_execute(&self, command: &str) -> ControlResult<String> {
        self.record("shell_execute", format!("shell_execute({command})"))?;
        Ok(String::new())
    }
}

/// A planner that replays scripted plans and records what it was asked.
pub struct ScriptedPlanner {
    plans: Mutex<Vec<Plan>>,
    requests: Mutex<Vec<(String, PlanningContext)>>,
    configured: bool,
}

impl ScriptedPlanner {
    pub fn new(plans: Vec<Plan>) -> Self {
        Self {
            plans: Mutex::new(plans),
            requests: Mutex::new(Vec::new()),
            configured: true,
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new(Vec::new())
        }
    }

    pub fn requests(&self) -> Vec<(String, PlanningContext)> {
        self.requests.lock().unwrap().clone()
    }
}

impl Planner for ScriptedPlanner {
    fn generate_plan_with_context(
        &self,
        request: &str,
        context: &PlanningContext,
    ) -> Result<Plan, PlannerError> {
        self.requests
            .lock()
            .unwrap()
            .push((request.to_string(), context.clone()));
        let mut plans = self.plans.lock().unwrap();
        if plans.is_empty() {
            return Err(PlannerError::InvalidResponse("no scripted plan left".into()));
        }
        Ok(plans.remove(0))
    }

    fn validate_configuration(&self) -> bool {
        self.configured
    }
}

/// Perception that always reports the same windows.
pub struct FixedPerception {
    windows: Vec<WindowInfo>,
}

impl FixedPerception {
    pub fn with_windows(titles: &[&str]) -> Self {
        Self {
            windows: titles.iter().map(|t| WindowInfo::titled(*t)).collect(),
        }
    }
}

impl Perception for FixedPerception {
    fn capture_screen(&self) -> Result<ScreenImage, PerceptionError> {
        Ok(ScreenImage::default())
    }

    fn gather_environment_info(&self) -> Result<EnvironmentSnapshot, PerceptionError> {
        let mut snapshot = EnvironmentSnapshot::empty();
        snapshot.active_window = self.windows.first().cloned();
        snapshot.windows = self.windows.clone();
        Ok(snapshot)
    }
}

struct Approving;

impl UserInterface for Approving {
    fn request_confirmation(&self, _prompt: &str) -> Result<bool, InterfaceError> {
        Ok(true)
    }

    fn display_feedback(&self, _message: &str) {}
}

/// An engine with no inter-command delay over `desktop`.
pub fn engine_over(desktop: Arc<FlakyDesktop>) -> ExecutionEngine {
    let settings = ExecutionConfig {
        default_delay_ms: 0,
        wait_poll_ms: 5,
        ..ExecutionConfig::default()
    };
    ExecutionEngine::new(
        desktop,
        Arc::new(Approving),
        Arc::new(ScriptManager::new("scripts", false)),
        settings,
    )
}
