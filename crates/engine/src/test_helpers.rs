//! Shared test helpers for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use deskpilot_config::ExecutionConfig;
use deskpilot_core::desktop::ControlResult;
use deskpilot_core::error::{ControlError, InterfaceError};
use deskpilot_core::{DesktopControl, MouseButton, UserInterface, WindowInfo};

use crate::interpreter::ExecutionEngine;
use crate::scripts::ScriptManager;

/// A desktop that records every call and fails on request.
#[derive(Default)]
pub struct RecordingDesktop {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, VecDeque<String>>>,
    windows: Mutex<Vec<WindowInfo>>,
}

impl RecordingDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_windows(titles: &[&str]) -> Self {
        let desktop = Self::new();
        *desktop.windows.lock().unwrap() = titles.iter().map(|t| WindowInfo::titled(*t)).collect();
        desktop
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// The next call to `operation` fails with `message`.
    pub fn fail_next(&self, operation: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .entry(operation.to_string())
            .or_default()
            .push_back(message.to_string());
    }

    fn record(&self, operation: &str, call: String) -> ControlResult {
        self.calls.lock().unwrap().push(call);
        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(message) => Err(ControlError::failed(operation, message)),
            None => Ok(()),
        }
    }
}

impl DesktopControl for RecordingDesktop {
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
        Ok(self
            .windows
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.title.contains(title))
            .cloned())
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
        Ok(self.windows.lock().unwrap().clone())
    }

    fn window_close(&self, title: &str) -> ControlResult {
        self.record("window_close", format!("window_close({title})"))
    }

    fn process_launch(&self, path: &str, args: &[String]) -> ControlResult<u32> {
        self.record("process_launch", format!("process_launch({path},{})", args.join(" ")))?;
        Ok(4242)
    }

    fn process_terminate(&self, name: &str) -> ControlResult {
        self.record("process_terminate", format!("process_terminate({name})"))
    }

    fn file_find(&self, directory: &str, pattern: &str) -> ControlResult<Vec<String>> {
        self.record("file_find", format!("file_find({directory},{pattern})"))?;
        Ok(vec![format!("{directory}/match.txt")])
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
        Ok(serde_json::json!({ "path": path, "size": 0 }))
    }

    fn clipboard_get(&self) -> ControlResult<String> {
        self.record("clipboard_get", "clipboard_get()".into())?;
        Ok("clipboard text".into())
    }

    fn clipboard_set(&self, text: &str) -> ControlResult {
        self.record("clipboard_set", format!("clipboard_set({text})"))
    }

    fn shell_execute(&self, command: &str) -> ControlResult<String> {
        self.record("shell_execute", format!("shell_execute({command})"))?;
        Ok(format!("ran: {command}"))
    }
}

/// A UI that answers confirmations from a script and records prompts.
pub struct ScriptedUi {
    answers: Mutex<VecDeque<Result<bool, InterfaceError>>>,
    default_answer: bool,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedUi {
    pub fn approving() -> Self {
        Self::with_default(true)
    }

    pub fn with_default(default_answer: bool) -> Self {
        Self {
            answers: Mutex::new(VecDeque::new()),
            default_answer,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn push_answer(&self, answer: Result<bool, InterfaceError>) {
        self.answers.lock().unwrap().push_back(answer);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl UserInterface for ScriptedUi {
    fn request_confirmation(&self, prompt: &str) -> Result<bool, InterfaceError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(self.default_answer))
    }

    fn display_feedback(&self, _message: &str) {}
}

/// Settings with no inter-command delay so tests run fast.
pub fn fast_settings() -> ExecutionConfig {
    ExecutionConfig {
        default_delay_ms: 0,
        wait_poll_ms: 5,
        ..ExecutionConfig::default()
    }
}

/// An engine over the given desktop with scripts under `script_dir`.
pub fn engine_with(
    desktop: Arc<RecordingDesktop>,
    ui: Arc<ScriptedUi>,
    script_dir: &std::path::Path,
) -> ExecutionEngine {
    let scripts = Arc::new(ScriptManager::new(script_dir, true));
    ExecutionEngine::new(desktop, ui, scripts, fast_settings())
}
