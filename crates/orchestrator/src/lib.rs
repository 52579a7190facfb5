//! # deskpilot orchestrator
//!
//! The facade front ends talk to. An [`Orchestrator`] is built from an
//! [`AppConfig`](deskpilot_config::AppConfig) plus the four collaborators and
//! owns everything else: the worker and planner pools, the engine with
//! recovery attached, the interaction broker, conversations, the feedback
//! loop, the request queue, and the emergency-stop token.

pub mod orchestrator;

pub use orchestrator::{Collaborators, MAINTENANCE_INTERVAL, MaintenanceReport, Orchestrator, OrchestratorStatus};
pub use deskpilot_runtime::TaskPriority;
