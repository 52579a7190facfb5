//! Concurrency substrate for deskpilot.
//!
//! Everything here runs on plain OS threads cooperating through mutexes and
//! condition variables. There is no async scheduler underneath:
//! - [`WorkerPool`]: fixed workers draining a priority queue
//! - [`TaskExecutor`]: cancellable units of work with wait/cancel handles
//! - [`ResourcePool`]: bounded reusable resources with scoped return

pub mod resource_pool;
pub mod task;
pub mod worker_pool;

pub use resource_pool::{
    PlannerPool, PoolStatistics, PooledResource, ResourcePool, ResourcePoolBuilder, planner_pool,
};
pub use task::{TaskExecutor, TaskState};
pub use worker_pool::{PoolStats, TaskHandle, TaskPriority, WorkerPool};

/// Best-effort text from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
