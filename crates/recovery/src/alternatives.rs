//! Alternative commands for a failed step.

use deskpilot_core::Command;

pub use deskpilot_core::command::MOUSE_OFFSET;

/// Per-character delay for a retried TYPE_TEXT.
pub const TYPE_DELAY_MS: u64 = 50;

/// Trailing delay for a retried KEY_COMBO.
pub const HOTKEY_DELAY_MS: u64 = 100;

/// Pause before re-running a command with no specific alternative.
pub const PLAIN_RETRY_WAIT_MS: u64 = 1000;

/// One candidate replacement for a failed command.
#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    pub command: Command,
    /// Pause before the attempt
    pub wait_before_ms: u64,
}

impl Alternative {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            wait_before_ms: 0,
        }
    }

    pub fn description(&self) -> String {
        self.command
            .description
            .clone()
            .unwrap_or_else(|| self.command.describe())
    }
}

/// Pause after an attempt, growing with the retry count.
pub fn backoff_delay_ms(retry_count: u32) -> u64 {
    500 + 200 * u64::from(retry_count)
}

/// Parameter-perturbation alternatives for `command`.
///
/// `command` must be substituted and carry its canonical name. Commands
/// with no dedicated variant get a plain retry after a short wait.
pub fn simple_alternatives(command: &Command, retry_count: u32) -> Vec<Alternative> {
    let mut alternatives = match command.action.as_str() {
        "MOUSE_MOVE" | "MOUSE_CLICK" | "MOUSE_DOUBLE_CLICK" | "MOUSE_RIGHT_CLICK" => mouse_alternatives(command),
        "TYPE_TEXT" => {
            vec![variant(command, &command.action, "Type with character delays")
                .with_param("delay_between_chars", TYPE_DELAY_MS)]
        }
        "KEY_COMBO" => {
            let mut alt = variant(command, &command.action, "Hotkey with delay");
            alt.delay_after_ms = Some(HOTKEY_DELAY_MS);
            vec![alt]
        }
        "APP_LAUNCH" => {
            vec![variant(command, &command.action, "Launch with wait").with_param("wait_for_launch", true)]
        }
        _ => Vec::new(),
    }
    .into_iter()
    .map(Alternative::new)
    .collect::<Vec<_>>();

    if alternatives.is_empty() {
        alternatives.push(Alternative {
            command: variant(command, &command.action, "Wait and retry original command"),
            wait_before_ms: PLAIN_RETRY_WAIT_MS,
        });
    }

    with_backoff(alternatives, retry_count)
}

/// Planner-proposed commands as alternatives, described by position when
/// the planner gave no description.
pub fn from_planner(commands: Vec<Command>, retry_count: u32) -> Vec<Alternative> {
    let alternatives = commands
        .into_iter()
        .enumerate()
        .map(|(i, mut command)| {
            if command.description.is_none() {
                command.description = Some(format!("Planner alternative {}", i + 1));
            }
            Alternative::new(command)
        })
        .collect();
    with_backoff(alternatives, retry_count)
}

fn with_backoff(mut alternatives: Vec<Alternative>, retry_count: u32) -> Vec<Alternative> {
    for alt in &mut alternatives {
        if alt.command.delay_after_ms.is_none() {
            alt.command.delay_after_ms = Some(backoff_delay_ms(retry_count));
        }
    }
    alternatives
}

fn variant(original: &Command, action: &str, description: &str) -> Command {
    let mut command = original.clone();
    command.action = action.to_string();
    command.description = Some(description.to_string());
    command.result_variable = None;
    command.delay_after_ms = None;
    command
}

fn mouse_alternatives(command: &Command) -> Vec<Command> {
    let mut out = Vec::new();

    for (dx, dy, label) in [(MOUSE_OFFSET, MOUSE_OFFSET, "+"), (-MOUSE_OFFSET, -MOUSE_OFFSET, "-")] {
        let moved = command.offset_by(dx, dy);
        out.push(variant(&moved, &command.action, &format!("Offset click ({label}{MOUSE_OFFSET},{label}{MOUSE_OFFSET})")));
    }

    if command.action == "MOUSE_CLICK" {
        out.push(variant(command, "MOUSE_DOUBLE_CLICK", "Try double-click instead"));
        out.push(variant(command, "MOUSE_RIGHT_CLICK", "Try right-click context menu"));
    }
    out
}
