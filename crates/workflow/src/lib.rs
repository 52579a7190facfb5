//! Background workflow for deskpilot.
//!
//! - [`FeedbackLoop`] watches the desktop between steps and records changes
//!   that should influence the next planning step.
//! - [`RequestQueue`] accepts top-level requests and runs them on worker
//!   threads in submission order.

pub mod feedback;
pub mod queue;

pub use feedback::{
    AdaptationAction, AdaptationRule, ChangeCondition, CommandMetrics, EnvironmentChange,
    EnvironmentDelta, FeedbackLoop,
};
pub use queue::{QueuedRequest, RequestHandler, RequestQueue};
