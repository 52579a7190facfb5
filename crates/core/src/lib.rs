//! # deskpilot core
//!
//! Domain types, collaborator traits, and error definitions for the deskpilot
//! desktop-automation control plane. Everything that executes, plans, or
//! observes depends inward on this crate.
//!
//! ## Collaborators
//!
//! The control plane never touches OS handles, pixels, or the LLM wire format
//! itself. Those live behind traits defined here:
//! - [`DesktopControl`] performs mouse, keyboard, window, process, file,
//!   clipboard, and shell operations
//! - [`Perception`] captures the screen and gathers environment snapshots
//! - [`Planner`] turns a request plus context into a command plan
//! - [`UserInterface`] asks the human for confirmation and shows feedback

pub mod command;
pub mod context;
pub mod desktop;
pub mod environment;
pub mod error;
pub mod event;
pub mod interface;
pub mod planner;
pub mod result;

// Re-export key types at crate root for ergonomics
pub use command::Command;
pub use context::{ExecutionContext, Variables, value_to_plain_string};
pub use desktop::{ControlResult, DesktopControl, MouseButton};
pub use environment::{EnvironmentSnapshot, Perception, Rect, ScreenImage, ScreenSize, TextRegion, WindowInfo};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use interface::{InputType, UserInteractionRequest, UserInterface};
pub use planner::{
    AdaptationRequest, CommandModification, EnvironmentRequest, InteractionSpec, Plan, Planner,
    PlannerTurn, PlanningContext,
};
pub use result::{CONDITIONAL_STOP_MESSAGE, ExecutionResult, ExecutionStatus, FailureKind};

pub use tokio_util::sync::CancellationToken;
