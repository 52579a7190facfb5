//! Fakes shared by the orchestrator integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use deskpilot_config::AppConfig;
use deskpilot_core::desktop::ControlResult;
use deskpilot_core::error::{InterfaceError, PerceptionError, PlannerError};
use deskpilot_core::{
    DesktopControl, EnvironmentSnapshot, ExecutionResult, ExecutionStatus, MouseButton, Perception, Plan,
    Planner, PlanningContext, ScreenImage, UserInterface, WindowInfo,
};
use deskpilot_orchestrator::{Collaborators, Orchestrator};
use serde_json::Value;

#[derive(Default)]
pub struct RecordingDesktop {
    calls: Mutex<Vec<String>>,
}

impl RecordingDesktop {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> ControlResult {
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

impl DesktopControl for RecordingDesktop {
    fn mouse_move(&self, x: i32, y: i32) -> ControlResult {
        self.record(format!("mouse_move({x},{y})"))
    }

    fn mouse_click(&self, x: i32, y: i32, button: MouseButton, double: bool) -> ControlResult {
        self.record(format!("mouse_click({x},{y},{button:?},{double})"))
    }

    fn keyboard_type(&self, text: &str, _delay: u64) -> ControlResult {
        self.record(format!("keyboard_type({text})"))
    }

    fn keyboard_hotkey(&self, keys: &[String]) -> ControlResult {
        self.record(format!("keyboard_hotkey({})", keys.join("+")))
    }

    fn window_find(&self, title: &str) -> ControlResult<Option<WindowInfo>> {
        self.record(format!("window_find({title})"))?;
        Ok(Some(WindowInfo::titled(title)))
    }

    fn window_focus(&self, title: &str) -> ControlResult {
        self.record(format!("window_focus({title})"))
    }

    fn window_resize(&self, title: &str, width: i32, height: i32) -> ControlResult {
        self.record(format!("window_resize({title},{width},{height})"))
    }

    fn window_move(&self, title: &str, x: i32, y: i32) -> ControlResult {
        self.record(format!("window_move({title},{x},{y})"))
    }

    fn window_enumerate(&self) -> ControlResult<Vec<WindowInfo>> {
        Ok(Vec::new())
    }

    fn window_close(&self, title: &str) -> ControlResult {
        self.record(format!("window_close({title})"))
    }

    fn process_launch(&self, path: &str, _args: &[String]) -> ControlResult<u32> {
        self.record(format!("process_launch({path})"))?;
        Ok(1)
    }

    fn process_terminate(&self, name: &str) -> ControlResult {
        self.record(format!("process_terminate({name})"))
    }

    fn file_find(&self, _directory: &str, _pattern: &str) -> ControlResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn file_move(&self, source: &str, destination: &str) -> ControlResult {
        self.record(format!("file_move({source},{destination})"))
    }

    fn file_delete(&self, path: &str) -> ControlResult {
        self.record(format!("file_delete({path})"))
    }

    fn file_create_dir(&self, path: &str) -> ControlResult {
        self.record(format!("file_create_dir({path})"))
    }

    fn file_info(&self, _path: &str) -> ControlResult<Value> {
        Ok(Value::Null)
    }

    fn clipboard_get(&self) -> ControlResult<String> {
        Ok(String::new())
    }

    fn clipboard_set(&self, text: &str) -> ControlResult {
        self.record(format!("clipboard_set({text})"))
    }

    fn shell_execute(&self, command: &str) -> ControlResult<String> {
        self.record(format!("shell_execute({command})"))?;
        Ok(String::new())
    }
}

/// Replays plans in order. Once they run out, planning fails.
#[derive(Default)]
pub struct ScriptedPlanner {
    plans: Mutex<Vec<Result<Plan, String>>>,
    requests: Mutex<Vec<(String, PlanningContext)>>,
}

impl ScriptedPlanner {
    pub fn new(plans: Vec<Plan>) -> Self {
        Self {
            plans: Mutex::new(plans.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            plans: Mutex::new(vec![Err(message.to_string())]),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<(String, PlanningContext)> {
        self.requests.lock().unwrap().clone()
    }
}

impl Planner for ScriptedPlanner {
    fn generate_plan_with_context(&self, request: &str, context: &PlanningContext) -> Result<Plan, PlannerError> {
        self.requests
            .lock()
            .unwrap()
            .push((request.to_string(), context.clone()));
        let mut plans = self.plans.lock().unwrap();
        if plans.is_empty() {
            return Err(PlannerError::InvalidResponse("no scripted plan left".into()));
        }
        plans.remove(0).map_err(PlannerError::InvalidResponse)
    }

    fn validate_configuration(&self) -> bool {
        true
    }
}

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
        Err(PerceptionError::Unavailable("no screen in tests".into()))
    }

    fn gather_environment_info(&self) -> Result<EnvironmentSnapshot, PerceptionError> {
        let mut snapshot = EnvironmentSnapshot::empty();
        snapshot.active_window = self.windows.first().cloned();
        snapshot.windows = self.windows.clone();
        Ok(snapshot)
    }
}

pub struct ApprovingUi;

impl UserInterface for ApprovingUi {
    fn request_confirmation(&self, _prompt: &str) -> Result<bool, InterfaceError> {
        Ok(true)
    }

    fn display_feedback(&self, _message: &str) {}
}

/// Fast settings: no inter-command delay and no background feedback thread.
pub fn test_config(script_dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.execution.default_delay_ms = 0;
    config.execution.wait_poll_ms = 5;
    config.scripts.directory = script_dir.to_path_buf();
    config.scripts.cache_enabled = false;
    config.feedback.enabled = false;
    config.pool.worker_threads = 2;
    config.pool.acquire_timeout_ms = 500;
    config.conversation.interaction_timeout_ms = 2000;
    config
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub desktop: Arc<RecordingDesktop>,
    pub planner: Arc<ScriptedPlanner>,
    pub scripts: tempfile::TempDir,
}

pub fn harness(planner: ScriptedPlanner) -> Harness {
    let scripts = tempfile::tempdir().unwrap();
    let desktop = Arc::new(RecordingDesktop::default());
    let planner = Arc::new(planner);
    let orchestrator = Orchestrator::new(
        test_config(scripts.path()),
        Collaborators {
            desktop: desktop.clone(),
            perception: Arc::new(FixedPerception::with_windows(&["Notepad"])),
            planner: planner.clone(),
            ui: Arc::new(ApprovingUi),
        },
    )
    .unwrap();
    Harness {
        orchestrator,
        desktop,
        planner,
        scripts,
    }
}

/// Poll a queued request until it leaves IN_PROGRESS.
pub fn wait_for_result(orchestrator: &Orchestrator, request_id: &str) -> ExecutionResult {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let result = orchestrator.get_execution_result(request_id);
        if result.status != ExecutionStatus::InProgress || Instant::now() > deadline {
            return result;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
