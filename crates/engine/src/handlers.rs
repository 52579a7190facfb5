//! Desktop handlers: mouse, keyboard, application, system, and window
//! commands mapped onto the [`DesktopControl`] collaborator.

use std::sync::Arc;
use std::time::Duration;

use deskpilot_core::error::ControlError;
use deskpilot_core::{
    Command, DesktopControl, ExecutionContext, ExecutionResult, FailureKind, MouseButton,
    value_to_plain_string,
};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::control::missing_param;
use crate::names::Category;

const LAUNCH_WAIT_MS: u64 = 1000;

type HandlerResult = Result<ExecutionResult, ExecutionResult>;

/// Routes desktop commands to the OS-control collaborator.
pub struct DesktopHandlers {
    desktop: Arc<dyn DesktopControl>,
}

impl DesktopHandlers {
    pub fn new(desktop: Arc<dyn DesktopControl>) -> Self {
        Self { desktop }
    }

    pub fn desktop(&self) -> &Arc<dyn DesktopControl> {
        &self.desktop
    }

    /// Execute a substituted command whose action is canonical.
    ///
    /// `sleep` is the engine's cancellation-aware wait; it returns false if
    /// the wait was interrupted.
    pub fn execute(
        &self,
        category: Category,
        command: &Command,
        ctx: &ExecutionContext,
        sleep: &dyn Fn(&ExecutionContext, Duration) -> bool,
    ) -> ExecutionResult {
        let outcome = match category {
            Category::Mouse => self.mouse(command),
            Category::Keyboard => self.keyboard(command),
            Category::Application => self.application(command, ctx, sleep),
            Category::System => self.system(command),
            Category::Window => self.window(command),
            other => Err(ExecutionResult::failed(
                FailureKind::Validation,
                format!("{} is not a desktop command ({other:?})", command.action),
            )),
        };
        outcome.unwrap_or_else(|failure| failure)
    }

    // ── Mouse ───────────────────────────────────────────────────────────

    fn mouse(&self, command: &Command) -> HandlerResult {
        let name = command.action.as_str();
        let x = int_param(command, "x")?;
        let y = int_param(command, "y")?;

        match name {
            "MOUSE_MOVE" => {
                self.desktop.mouse_move(x, y).map_err(control_failure)?;
                Ok(ExecutionResult::completed(format!("Moved mouse to ({x}, {y})")))
            }
            "MOUSE_CLICK" | "MOUSE_DOUBLE_CLICK" | "MOUSE_RIGHT_CLICK" => {
                let (button, double) = match name {
                    "MOUSE_DOUBLE_CLICK" => (MouseButton::Left, true),
                    "MOUSE_RIGHT_CLICK" => (MouseButton::Right, false),
                    _ => {
                        let button = match command.str_param("button") {
                            Some(b) => MouseButton::parse(b).ok_or_else(|| {
                                ExecutionResult::failed(
                                    FailureKind::Validation,
                                    format!("Unknown mouse button: {b}"),
                                )
                            })?,
                            None => MouseButton::Left,
                        };
                        (button, bool_param(command, "double"))
                    }
                };
                self.desktop
                    .mouse_click(x, y, button, double)
                    .map_err(control_failure)?;
                Ok(ExecutionResult::completed(format!("Clicked at ({x}, {y})")))
            }
            other => Err(unknown(other)),
        }
    }

    // ── Keyboard ────────────────────────────────────────────────────────

    fn keyboard(&self, command: &Command) -> HandlerResult {
        match command.action.as_str() {
            "TYPE_TEXT" => {
                let text = string_param(command, &["text"])?;
                let delay = u64_param(command, "delay_between_chars").unwrap_or(0);
                self.desktop
                    .keyboard_type(&text, delay)
                    .map_err(control_failure)?;
                Ok(ExecutionResult::completed(format!("Typed {} characters", text.chars().count())))
            }
            "KEY_COMBO" => {
                let keys = key_list(command)?;
                self.desktop.keyboard_hotkey(&keys).map_err(control_failure)?;
                Ok(ExecutionResult::completed(format!("Pressed {}", keys.join("+"))))
            }
            "KEY_PRESS" => {
                let key = string_param(command, &["key"])?;
                self.desktop
                    .keyboard_hotkey(std::slice::from_ref(&key))
                    .map_err(control_failure)?;
                Ok(ExecutionResult::completed(format!("Pressed {key}")))
            }
            other => Err(unknown(other)),
        }
    }

    // ── Applications ────────────────────────────────────────────────────

    fn application(
        &self,
        command: &Command,
        ctx: &ExecutionContext,
        sleep: &dyn Fn(&ExecutionContext, Duration) -> bool,
    ) -> HandlerResult {
        match command.action.as_str() {
            "APP_LAUNCH" => {
                let path = string_param(command, &["path", "application", "app", "name"])?;
                let args: Vec<String> = match command.param("args") {
                    Some(Value::Array(items)) => items.iter().map(value_to_plain_string).collect(),
                    Some(Value::String(s)) if !s.is_empty() => {
                        s.split_whitespace().map(str::to_string).collect()
                    }
                    _ => Vec::new(),
                };
                let pid = self
                    .desktop
                    .process_launch(&path, &args)
                    .map_err(control_failure)?;

                if bool_param(command, "wait_for_launch") {
                    let wait = u64_param(command, "launch_timeout_ms").unwrap_or(LAUNCH_WAIT_MS);
                    debug!(app = %path, wait_ms = wait, "Waiting for application launch");
                    if !sleep(ctx, Duration::from_millis(wait)) {
                        return Err(interrupted());
                    }
                }
                Ok(ExecutionResult::completed(format!("Launched {path} (pid {pid})"))
                    .with_result(json!({ "pid": pid })))
            }
            "APP_CLOSE" => {
                let name = string_param(command, &["name", "process", "application", "app"])?;
                self.desktop.process_terminate(&name).map_err(control_failure)?;
                Ok(ExecutionResult::completed(format!("Closed {name}")))
            }
            other => Err(unknown(other)),
        }
    }

    // ── System ──────────────────────────────────────────────────────────

    fn system(&self, command: &Command) -> HandlerResult {
        match command.action.as_str() {
            "SYSTEM_RUN_COMMAND" => {
                let text = string_param(command, &["command", "cmd"])?;
                let output = self.desktop.shell_execute(&text).map_err(control_failure)?;
                Ok(ExecutionResult::completed(output))
            }
            "SYSTEM_CLIPBOARD_GET" => {
                let text = self.desktop.clipboard_get().map_err(control_failure)?;
                Ok(ExecutionResult::completed(text))
            }
            "SYSTEM_CLIPBOARD_SET" => {
                let text = string_param(command, &["text"])?;
                self.desktop.clipboard_set(&text).map_err(control_failure)?;
                Ok(ExecutionResult::completed("Clipboard updated"))
            }
            "SYSTEM_FILE_FIND" => {
                let directory = string_param(command, &["directory", "path"])?;
                let pattern = optional_string(command, "pattern").unwrap_or_else(|| "*".into());
                let found = self
                    .desktop
                    .file_find(&directory, &pattern)
                    .map_err(control_failure)?;
                Ok(ExecutionResult::completed(found.join("\n")).with_result(json!(found)))
            }
            "SYSTEM_FILE_MOVE" => {
                let source = string_param(command, &["source", "from"])?;
                let destination = string_param(command, &["destination", "to"])?;
                self.desktop
                    .file_move(&source, &destination)
                    .map_err(control_failure)?;
                Ok(ExecutionResult::completed(format!("Moved {source} to {destination}")))
            }
            "SYSTEM_DELETE_FILE" => {
                let path = string_param(command, &["path"])?;
                self.desktop.file_delete(&path).map_err(control_failure)?;
                Ok(ExecutionResult::completed(format!("Deleted {path}")))
            }
            "SYSTEM_CREATE_DIR" => {
                let path = string_param(command, &["path"])?;
                self.desktop.file_create_dir(&path).map_err(control_failure)?;
                Ok(ExecutionResult::completed(format!("Created {path}")))
            }
            "SYSTEM_FILE_INFO" => {
                let path = string_param(command, &["path"])?;
                let info = self.desktop.file_info(&path).map_err(control_failure)?;
                Ok(ExecutionResult::completed(info.to_string()).with_result(info))
            }
            recognized @ ("SYSTEM_FORMAT_DRIVE" | "SYSTEM_MODIFY_REGISTRY" | "SYSTEM_SHUTDOWN"
            | "SYSTEM_RESTART") => {
                warn!(command = %recognized, "Recognized system operation has no desktop binding");
                Err(ExecutionResult::failed(
                    FailureKind::Execution,
                    format!("{recognized} is not supported by the desktop backend"),
                ))
            }
            other => Err(unknown(other)),
        }
    }

    // ── Windows ─────────────────────────────────────────────────────────

    fn window(&self, command: &Command) -> HandlerResult {
        match command.action.as_str() {
            "WINDOW_FIND" => {
                let title = string_param(command, &["title", "window"])?;
                match self.desktop.window_find(&title).map_err(control_failure)? {
                    Some(window) => Ok(ExecutionResult::completed(window.title.clone())
                        .with_result(json!(window))),
                    None => Err(ExecutionResult::failed(
                        FailureKind::Execution,
                        format!("Window not found: {title}"),
                    )),
                }
            }
            "WINDOW_FOCUS" => {
                let title = string_param(command, &["title", "window"])?;
                self.desktop.window_focus(&title).map_err(control_failure)?;
                Ok(ExecutionResult::completed(format!("Focused {title}")))
            }
            "WINDOW_RESIZE" => {
                let title = string_param(command, &["title", "window"])?;
                let width = int_param(command, "width")?;
                let height = int_param(command, "height")?;
                self.desktop
                    .window_resize(&title, width, height)
                    .map_err(control_failure)?;
                Ok(ExecutionResult::completed(format!("Resized {title} to {width}x{height}")))
            }
            "WINDOW_MOVE" => {
                let title = string_param(command, &["title", "window"])?;
                let x = int_param(command, "x")?;
                let y = int_param(command, "y")?;
                self.desktop.window_move(&title, x, y).map_err(control_failure)?;
                Ok(ExecutionResult::completed(format!("Moved {title} to ({x}, {y})")))
            }
            "WINDOW_ENUMERATE" => {
                let windows = self.desktop.window_enumerate().map_err(control_failure)?;
                let titles: Vec<&str> = windows.iter().map(|w| w.title.as_str()).collect();
                Ok(ExecutionResult::completed(titles.join("\n")).with_result(json!(windows)))
            }
            "WINDOW_CLOSE" => {
                let title = string_param(command, &["title", "window"])?;
                self.desktop.window_close(&title).map_err(control_failure)?;
                Ok(ExecutionResult::completed(format!("Closed {title}")))
            }
            "WINDOW_CLOSE_ALL" => {
                let windows = self.desktop.window_enumerate().map_err(control_failure)?;
                let mut failures = Vec::new();
                for window in windows.iter().filter(|w| w.is_visible) {
                    if let Err(e) = self.desktop.window_close(&window.title) {
                        failures.push(e.to_string());
                    }
                }
                if failures.is_empty() {
                    Ok(ExecutionResult::completed(format!("Closed {} windows", windows.len())))
                } else {
                    Err(ExecutionResult::failed(
                        FailureKind::Execution,
                        format!("Failed to close {} windows: {}", failures.len(), failures.join("; ")),
                    ))
                }
            }
            other => Err(unknown(other)),
        }
    }
}

// ── Parameter helpers ───────────────────────────────────────────────────

fn control_failure(err: ControlError) -> ExecutionResult {
    ExecutionResult::failed(FailureKind::Execution, err.to_string())
}

fn interrupted() -> ExecutionResult {
    let mut r = ExecutionResult::cancelled("Execution cancelled");
    r.failure = Some(FailureKind::Interrupted);
    r
}

fn unknown(name: &str) -> ExecutionResult {
    ExecutionResult::failed(FailureKind::Validation, format!("Unknown command type: {name}"))
}

/// Integers arrive as numbers, or as strings after substitution.
fn int_param(command: &Command, name: &str) -> Result<i32, ExecutionResult> {
    let parsed = match command.param(name) {
        Some(Value::Number(n)) => n.as_f64().map(|f| f.round() as i32),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().map(|f| f.round() as i32),
        _ => None,
    };
    parsed.ok_or_else(|| {
        if command.param(name).is_some() {
            ExecutionResult::failed(
                FailureKind::Validation,
                format!("{} parameter '{name}' must be a number", command.action),
            )
        } else {
            missing_param(&command.action, name)
        }
    })
}

fn u64_param(command: &Command, name: &str) -> Option<u64> {
    match command.param(name)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn bool_param(command: &Command, name: &str) -> bool {
    command.param(name).is_some_and(crate::condition::is_truthy)
}

fn optional_string(command: &Command, name: &str) -> Option<String> {
    command
        .param(name)
        .filter(|v| !v.is_null())
        .map(value_to_plain_string)
}

/// First present of `names`, rendered as text.
fn string_param(command: &Command, names: &[&str]) -> Result<String, ExecutionResult> {
    names
        .iter()
        .find_map(|name| optional_string(command, name))
        .ok_or_else(|| missing_param(&command.action, names[0]))
}

/// `keys` as an array, or a `ctrl+shift+s` style string.
fn key_list(command: &Command) -> Result<Vec<String>, ExecutionResult> {
    let keys: Vec<String> = match command.param("keys").or_else(|| command.param("combo")) {
        Some(Value::Array(items)) => items.iter().map(value_to_plain_string).collect(),
        Some(Value::String(s)) => s
            .split('+')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect(),
        _ => return Err(missing_param(&command.action, "keys")),
    };
    if keys.is_empty() {
        return Err(missing_param(&command.action, "keys"));
    }
    Ok(keys)
}
