//! Command safety policy: which commands need a human to say yes.
//!
//! Two fixed lists drive the decision:
//! - the **denylist** (destructive operations, or shell text carrying
//!   metacharacters) always requires confirmation
//! - the **confirm list** (shell run, closing apps or all windows, nested
//!   scripts) requires confirmation while `confirmation_required` is on
//!
//! A declined or failed confirmation is a safety violation. The engine turns
//! it into CANCELLED; it never skips the command silently.

use deskpilot_core::Command;
use serde::Serialize;

/// Characters that make a shell string unsafe to run unconfirmed.
pub const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '<', '>', '\\', '\'', '"', '(', ')', '[', ']', '{', '}', '*', '?',
    '~',
];

/// Outcome of checking one command against the policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum SafetyVerdict {
    /// Run without asking
    Allowed,
    /// Ask the user first
    RequiresConfirmation { reason: String },
}

impl SafetyVerdict {
    pub fn needs_confirmation(&self) -> bool {
        matches!(self, Self::RequiresConfirmation { .. })
    }
}

/// Unified safety policy enforcement.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    confirmation_required: bool,
}

impl CommandPolicy {
    /// Destructive operations.
    pub const DENYLIST: &'static [&'static str] = &[
        "SYSTEM_DELETE_FILE",
        "SYSTEM_FORMAT_DRIVE",
        "SYSTEM_MODIFY_REGISTRY",
        "SYSTEM_SHUTDOWN",
        "SYSTEM_RESTART",
    ];

    /// Operations that are fine but worth a second look.
    pub const CONFIRM_LIST: &'static [&'static str] = &[
        "SYSTEM_RUN_COMMAND",
        "APP_CLOSE",
        "WINDOW_CLOSE_ALL",
        "EXECUTE_SCRIPT",
    ];

    pub fn new(confirmation_required: bool) -> Self {
        Self {
            confirmation_required,
        }
    }

    pub fn confirmation_required(&self) -> bool {
        self.confirmation_required
    }

    /// Check a substituted command whose action is already canonical.
    ///
    /// Rules:
    /// - denylisted → always confirm
    /// - `SYSTEM_RUN_COMMAND` with metacharacters → treated as denylisted
    /// - confirm-listed → confirm only while `confirmation_required` is on
    /// - anything else → allowed
    pub fn evaluate(&self, command: &Command) -> SafetyVerdict {
        let name = command.action.as_str();

        if Self::DENYLIST.contains(&name) {
            return SafetyVerdict::RequiresConfirmation {
                reason: format!("'{name}' is a destructive operation"),
            };
        }

        if name == "SYSTEM_RUN_COMMAND"
            && let Some(text) = shell_text(command)
            && contains_shell_metacharacters(text)
        {
            return SafetyVerdict::RequiresConfirmation {
                reason: "Shell command contains metacharacters".into(),
            };
        }

        if self.confirmation_required && Self::CONFIRM_LIST.contains(&name) {
            return SafetyVerdict::RequiresConfirmation {
                reason: format!("'{name}' requires confirmation"),
            };
        }

        SafetyVerdict::Allowed
    }

    /// The question shown to the user.
    pub fn confirmation_prompt(command: &Command) -> String {
        format!("Execute command: {}?", command.describe())
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

fn shell_text(command: &Command) -> Option<&str> {
    command.str_param("command").or_else(|| command.str_param("cmd"))
}

/// Whether `text` contains any character from [`SHELL_METACHARACTERS`].
pub fn contains_shell_metacharacters(text: &str) -> bool {
    text.contains(SHELL_METACHARACTERS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denylisted_always_confirms() {
        let policy = CommandPolicy::new(false);
        let cmd = Command::new("SYSTEM_DELETE_FILE").with_param("path", "C:/tmp/x");
        assert!(policy.evaluate(&cmd).needs_confirmation());
    }

    #[test]
    fn confirm_list_respects_setting() {
        let cmd = Command::new("APP_CLOSE").with_param("name", "notepad");
        assert!(CommandPolicy::new(true).evaluate(&cmd).needs_confirmation());
        assert_eq!(CommandPolicy::new(false).evaluate(&cmd), SafetyVerdict::Allowed);
    }

    #[test]
    fn shell_metacharacters_escalate_run_command() {
        let policy = CommandPolicy::new(false);
        let plain = Command::new("SYSTEM_RUN_COMMAND").with_param("command", "dir");
        assert_eq!(policy.evaluate(&plain), SafetyVerdict::Allowed);

        let piped = Command::new("SYSTEM_RUN_COMMAND").with_param("command", "dir | del");
        assert!(policy.evaluate(&piped).needs_confirmation());
    }

    #[test]
    fn metacharacter_set() {
        for text in ["a;b", "a&&b", "$(x)", "`x`", "a > b", "~/x", "x*", "a\\b", "'q'"] {
            assert!(contains_shell_metacharacters(text), "{text}");
        }
        assert!(!contains_shell_metacharacters("notepad.exe C:/notes.txt"));
    }

    #[test]
    fn ordinary_commands_allowed() {
        let policy = CommandPolicy::default();
        let cmd = Command::new("MOUSE_CLICK").with_param("x", 1).with_param("y", 2);
        assert_eq!(policy.evaluate(&cmd), SafetyVerdict::Allowed);
    }

    #[test]
    fn prompt_describes_command() {
        let cmd = Command::new("EXECUTE_SCRIPT").with_param("script", "cleanup.json");
        assert_eq!(
            CommandPolicy::confirmation_prompt(&cmd),
            "Execute command: EXECUTE_SCRIPT (script=cleanup.json)?"
        );
    }
}
