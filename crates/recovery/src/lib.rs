//! Failure recovery for deskpilot.
//!
//! When a command fails with an execution error, the [`RecoveryManager`]
//! classifies the error text, builds alternative commands (small parameter
//! perturbations, or planner-proposed replacements for lookup-style errors),
//! and tries them in order until one succeeds or the retry budget runs out.
//! Every attempt is recorded, whatever its outcome.

pub mod alternatives;
pub mod manager;
pub mod policy;

pub use alternatives::{Alternative, simple_alternatives};
pub use manager::{RecoveryManager, RecoveryState};
pub use policy::{RecoveryPolicy, RecoveryStrategy};

#[cfg(test)]
pub(crate) mod test_helpers;
