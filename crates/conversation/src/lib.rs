//! Conversational planning for deskpilot.
//!
//! - [`InteractionBroker`] holds questions for the human and hands each
//!   answer back exactly once.
//! - [`ConversationManager`] runs multi-turn planning sessions where the
//!   planner may ask for environment data, adapt commands, or ask the user
//!   before committing to a plan.

pub mod broker;
pub mod manager;

pub use broker::InteractionBroker;
pub use manager::{ConversationManager, ConversationState, NEXT_CONTINUE, NEXT_CONTINUE_WITH_INPUT};

#[cfg(test)]
pub(crate) mod test_helpers;
