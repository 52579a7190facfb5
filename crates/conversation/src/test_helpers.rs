//! Shared test helpers for conversation tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use deskpilot_config::ExecutionConfig;
use deskpilot_core::desktop::ControlResult;
use deskpilot_core::error::{InterfaceError, PerceptionError, PlannerError};
use deskpilot_core::{
    DesktopControl, EnvironmentSnapshot, MouseButton, Perception, Plan, Planner, PlanningContext,
    ScreenImage, UserInterface, WindowInfo,
};
use deskpilot_engine::{ExecutionEngine, ScriptManager};
use serde_json::Value;

use crate::broker::InteractionBroker;

/// A desktop that records every call and always succeeds.
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
        self.record("window_enumerate()".into())?;
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

    fn file_find(&self, directory: &str, pattern: &str) -> ControlResult<Vec<String>> {
        self.record(format!("file_find({directory},{pattern})"))?;
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

    fn file_info(&self, path: &str) -> ControlResult<Value> {
        self.record(format!("file_info({path})"))?;
        Ok(Value::Null)
    }

    fn clipboard_get(&self) -> ControlResult<String> {
        self.record("clipboard_get()".into())?;
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

/// A planner that replays scripted plans and records what it was asked.
pub struct ScriptedPlanner {
    plans: Mutex<Vec<Plan>>,
    requests: Mutex<Vec<(String, PlanningContext)>>,
    vision: bool,
}

impl ScriptedPlanner {
    pub fn new(plans: Vec<Plan>) -> Self {
        Self {
            plans: Mutex::new(plans),
            requests: Mutex::new(Vec::new()),
            vision: false,
        }
    }

    pub fn with_vision(mut self) -> Self {
        self.vision = true;
        self
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
        Ok(plans.remove(0))
    }

    fn validate_configuration(&self) -> bool {
        true
    }

    fn supports_vision(&self) -> bool {
        self.vision
    }
}

/// Perception reporting fixed windows; counts environment queries.
pub struct FixedPerception {
    windows: Vec<WindowInfo>,
    queries: AtomicUsize,
}

impl FixedPerception {
    pub fn with_windows(titles: &[&str]) -> Self {
        Self {
            windows: titles.iter().map(|t| WindowInfo::titled(*t)).collect(),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl Perception for FixedPerception {
    fn capture_screen(&self) -> Result<ScreenImage, PerceptionError> {
        Ok(ScreenImage {
            width: 1920,
            height: 1080,
            format: "png".into(),
            data: vec![0; 4],
        })
    }

    fn gather_environment_info(&self) -> Result<EnvironmentSnapshot, PerceptionError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
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

pub fn broker() -> Arc<InteractionBroker> {
    Arc::new(InteractionBroker::new(Duration::from_secs(2)))
}

/// An engine with no inter-command delay, plus its desktop.
pub fn engine() -> (ExecutionEngine, Arc<RecordingDesktop>) {
    let desktop = Arc::new(RecordingDesktop::default());
    let settings = ExecutionConfig {
        default_delay_ms: 0,
        wait_poll_ms: 5,
        ..ExecutionConfig::default()
    };
    let engine = ExecutionEngine::new(
        desktop.clone(),
        Arc::new(Approving),
        Arc::new(ScriptManager::new("scripts", false)),
        settings,
    );
    (engine, desktop)
}

/// Answer the first request that shows up on `broker`.
pub fn answer_first_pending(broker: Arc<InteractionBroker>, answer: Value) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Some(request) = broker.pending().into_iter().next() {
                broker.provide_response(&request.interaction_id, answer).unwrap();
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("no interaction request appeared");
    })
}
