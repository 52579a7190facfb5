//! Perception collaborator: what the desktop looks like right now.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PerceptionError;

/// Screen-space rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A top-level window as reported by perception or the desktop backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub title: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub process_name: String,
    #[serde(default = "default_visible")]
    pub is_visible: bool,
    #[serde(default)]
    pub bounds: Rect,
}

fn default_visible() -> bool {
    true
}

impl WindowInfo {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            is_visible: true,
            ..Self::default()
        }
    }
}

/// Display resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// A run of recognized text and where it sits on screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    pub text: String,
    pub x: i32,
    pub y: i32,
}

/// A point-in-time view of the desktop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    #[serde(default)]
    pub active_window: Option<WindowInfo>,
    #[serde(default)]
    pub windows: Vec<WindowInfo>,
    #[serde(default)]
    pub ocr_text: Vec<TextRegion>,
    #[serde(default)]
    pub screen: ScreenSize,
    #[serde(default)]
    pub current_directory: String,
    #[serde(default)]
    pub description: String,
    /// Detected UI elements, opaque to the control plane
    #[serde(default)]
    pub ui_elements: Vec<serde_json::Value>,
    #[serde(default)]
    pub running_processes: Vec<String>,
    pub captured_at: DateTime<Utc>,
}

impl EnvironmentSnapshot {
    /// An empty snapshot stamped now.
    pub fn empty() -> Self {
        Self {
            active_window: None,
            windows: Vec::new(),
            ocr_text: Vec::new(),
            screen: ScreenSize::default(),
            current_directory: String::new(),
            description: String::new(),
            ui_elements: Vec::new(),
            running_processes: Vec::new(),
            captured_at: Utc::now(),
        }
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn active_title(&self) -> Option<&str> {
        self.active_window.as_ref().map(|w| w.title.as_str())
    }

    /// Milliseconds since capture, relative to `now`.
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.captured_at).num_milliseconds()
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// A captured screen image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenImage {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub format: String,
    #[serde(default, skip_serializing)]
    pub data: Vec<u8>,
}

impl ScreenImage {
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && !self.data.is_empty()
    }
}

/// The screen-perception subsystem.
pub trait Perception: Send + Sync {
    fn capture_screen(&self) -> Result<ScreenImage, PerceptionError>;

    fn gather_environment_info(&self) -> Result<EnvironmentSnapshot, PerceptionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn snapshot_age_and_titles() {
        let mut snap = EnvironmentSnapshot::empty();
        snap.active_window = Some(WindowInfo::titled("Notepad"));
        snap.windows = vec![WindowInfo::titled("Notepad"), WindowInfo::titled("Explorer")];
        snap.captured_at = Utc::now() - Duration::seconds(6);

        assert_eq!(snap.window_count(), 2);
        assert_eq!(snap.active_title(), Some("Notepad"));
        assert!(snap.age_ms(Utc::now()) >= 6000);
    }

    #[test]
    fn empty_image_is_invalid() {
        assert!(!ScreenImage::default().is_valid());
        let img = ScreenImage {
            width: 2,
            height: 2,
            format: "png".into(),
            data: vec![1, 2, 3],
        };
        assert!(img.is_valid());
    }
}
