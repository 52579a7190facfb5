//! Desktop control collaborator: the OS-control layer.
//!
//! Every operation reports success or a [`ControlError`] carrying the error
//! string. The control plane never touches OS handles directly.

use serde::{Deserialize, Serialize};

use crate::environment::WindowInfo;
use crate::error::ControlError;

pub type ControlResult<T = ()> = std::result::Result<T, ControlError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "middle" => Some(Self::Middle),
            _ => None,
        }
    }
}

/// The OS-control layer performing actual desktop operations.
pub trait DesktopControl: Send + Sync {
    // ── Mouse ──
    fn mouse_move(&self, x: i32, y: i32) -> ControlResult;
    fn mouse_click(&self, x: i32, y: i32, button: MouseButton, double: bool) -> ControlResult;

    // ── Keyboard ──
    fn keyboard_type(&self, text: &str, delay_between_chars_ms: u64) -> ControlResult;
    fn keyboard_hotkey(&self, keys: &[String]) -> ControlResult;

    // ── Windows ──
    fn window_find(&self, title: &str) -> ControlResult<Option<WindowInfo>>;
    fn window_focus(&self, title: &str) -> ControlResult;
    fn window_resize(&self, title: &str, width: i32, height: i32) -> ControlResult;
    fn window_move(&self, title: &str, x: i32, y: i32) -> ControlResult;
    fn window_enumerate(&self) -> ControlResult<Vec<WindowInfo>>;
    fn window_close(&self, title: &str) -> ControlResult;

    // ── Processes ──
    fn process_launch(&self, path: &str, args: &[String]) -> ControlResult<u32>;
    fn process_terminate(&self, name: &str) -> ControlResult;

    // ── Files ──
    fn file_find(&self, directory: &str, pattern: &str) -> ControlResult<Vec<String>>;
    fn file_move(&self, source: &str, destination: &str) -> ControlResult;
    fn file_delete(&self, path: &str) -> ControlResult;
    fn file_create_dir(&self, path: &str) -> ControlResult;
    fn file_info(&self, path: &str) -> ControlResult<serde_json::Value>;

    // ── Clipboard ──
    fn clipboard_get(&self) -> ControlResult<String>;
    fn clipboard_set(&self, text: &str) -> ControlResult;

    // ── Shell ──
    fn shell_execute(&self, command: &str) -> ControlResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mouse_button_parses_case_insensitively() {
        assert_eq!(MouseButton::parse("RIGHT"), Some(MouseButton::Right));
        assert_eq!(MouseButton::parse("left"), Some(MouseButton::Left));
        assert_eq!(MouseButton::parse("wheel"), None);
    }
}
