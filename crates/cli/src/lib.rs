//! The `deskpilot` command-line front end.
//!
//! Runs scripts against a dry-run desktop that records instead of acting,
//! so scripts can be checked anywhere before they touch a real machine.

pub mod cli;
pub mod commands;
pub mod console;
pub mod dry_run;

pub use cli::{Cli, Commands, RunArgs, parse_var};
