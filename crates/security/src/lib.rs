//! Security module for deskpilot: command safety policy and path validation.
//!
//! Provides:
//! - **Command policy**: the unsafe denylist, the confirm list, and shell
//!   metacharacter detection that gate execution behind user confirmation
//! - **Path validation**: script path resolution confined to the script
//!   directory, with traversal rejected before any I/O

pub mod path;
pub mod policy;

pub use path::{PathValidationError, resolve_script_path};
pub use policy::{CommandPolicy, SafetyVerdict, contains_shell_metacharacters};
