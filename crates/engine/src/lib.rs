//! The command interpreter for deskpilot.
//!
//! A request arrives as an ordered list of [`Command`](deskpilot_core::Command)s.
//! The engine runs them one at a time:
//!
//! 1. **Resolve** the action name through the alias table
//! 2. **Substitute** `${...}` expressions against the context variables
//! 3. **Check safety**: destructive commands need the user's confirmation
//! 4. **Dispatch** to a desktop handler or a control-flow construct
//! 5. **Record** the output, timing, and an event
//!
//! Control flow (variables, conditionals, WHILE_LOOP, nested scripts) is
//! interpreted here; every side effect on the desktop goes through
//! [`DesktopControl`](deskpilot_core::DesktopControl).

pub mod condition;
pub mod control;
pub mod handlers;
pub mod interpreter;
pub mod names;
pub mod scripts;
pub mod substitution;

pub use interpreter::{ExecutionEngine, FailureHandler, SequenceOptions};
pub use names::{Category, CommandSpec};
pub use scripts::{ScriptDocument, ScriptManager, ScriptMetadata, ScriptSummary};
pub use substitution::Substitutor;

#[cfg(test)]
pub(crate) mod test_helpers;
