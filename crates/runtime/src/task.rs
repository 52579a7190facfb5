//! Cancellable tasks on top of the worker pool.
//!
//! Each task receives a [`CancellationToken`] it should poll at safe points.
//! Cancellation is cooperative: [`TaskExecutor::cancel_task`] only flips the
//! token. Finished tasks are swept lazily whenever a new task is submitted.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use deskpilot_core::error::{TaskError, WorkerPoolError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::panic_message;
use crate::worker_pool::{TaskPriority, WorkerPool};

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Completed,
    /// Cancelled before it started, or returned after observing cancellation
    Cancelled,
    Panicked(String),
}

type Completion = Arc<(Mutex<Option<TaskState>>, Condvar)>;

struct TaskEntry {
    token: CancellationToken,
    completion: Completion,
}

impl TaskEntry {
    fn is_finished(&self) -> bool {
        self.completion.0.lock().unwrap().is_some()
    }
}

/// Resolves the completion exactly once, even if the job is dropped unrun.
struct CompletionGuard {
    completion: Completion,
    state: Option<TaskState>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.completion;
        let mut slot = lock.lock().unwrap();
        if slot.is_none() {
            *slot = Some(self.state.take().unwrap_or(TaskState::Cancelled));
        }
        cvar.notify_all();
    }
}

/// Submits cancellable work to a shared [`WorkerPool`].
pub struct TaskExecutor {
    pool: Arc<WorkerPool>,
    tasks: Mutex<HashMap<u64, TaskEntry>>,
    next_id: AtomicU64,
}

impl TaskExecutor {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Queue `work` and return its task id.
    pub fn submit_task<F>(&self, work: F, priority: TaskPriority) -> Result<u64, WorkerPoolError>
    where
        F: FnOnce(&CancellationToken) + Send + 'static,
    {
        self.sweep_finished();

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        let completion: Completion = Arc::new((Mutex::new(None), Condvar::new()));

        let mut guard = CompletionGuard {
            completion: Arc::clone(&completion),
            state: None,
        };
        let job_token = token.clone();
        self.pool.submit_detached(priority, move || {
            if job_token.is_cancelled() {
                guard.state = Some(TaskState::Cancelled);
                return;
            }
            match catch_unwind(AssertUnwindSafe(|| work(&job_token))) {
                Ok(()) => {
                    guard.state = Some(if job_token.is_cancelled() {
                        TaskState::Cancelled
                    } else {
                        TaskState::Completed
                    });
                }
                Err(payload) => {
                    guard.state = Some(TaskState::Panicked(panic_message(payload.as_ref())));
                    drop(guard);
                    std::panic::resume_unwind(payload);
                }
            }
        })?;

        self.tasks
            .lock()
            .unwrap()
            .insert(id, TaskEntry { token, completion });
        debug!(task_id = id, ?priority, "Task submitted");
        Ok(id)
    }

    /// Request cooperative cancellation. Returns false for unknown ids.
    pub fn cancel_task(&self, task_id: u64) -> bool {
        match self.tasks.lock().unwrap().get(&task_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Queued or running, and not yet swept.
    pub fn is_task_running(&self, task_id: u64) -> bool {
        self.tasks
            .lock()
            .unwrap()
            .get(&task_id)
            .is_some_and(|entry| !entry.is_finished())
    }

    /// Block until the task finishes, or until `timeout` elapses.
    pub fn wait_for_task(&self, task_id: u64, timeout: Option<Duration>) -> Result<TaskState, TaskError> {
        let completion = {
            let tasks = self.tasks.lock().unwrap();
            let entry = tasks.get(&task_id).ok_or(TaskError::NotFound(task_id))?;
            Arc::clone(&entry.completion)
        };

        let (lock, cvar) = &*completion;
        let slot = lock.lock().unwrap();
        let slot = match timeout {
            Some(timeout) => {
                let (slot, result) = cvar.wait_timeout_while(slot, timeout, |s| s.is_none()).unwrap();
                if result.timed_out() && slot.is_none() {
                    return Err(TaskError::Timeout {
                        task_id,
                        waited_ms: timeout.as_millis() as u64,
                    });
                }
                slot
            }
            None => cvar.wait_while(slot, |s| s.is_none()).unwrap(),
        };
        slot.clone().ok_or(TaskError::Dropped)
    }

    /// Number of tracked tasks, finished ones included until swept.
    pub fn tracked_tasks(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    fn sweep_finished(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|_, entry| !entry.is_finished());
        let swept = before - tasks.len();
        if swept > 0 {
            debug!(swept, "Swept finished tasks");
        }
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        let entries: Vec<TaskEntry> = self.tasks.lock().unwrap().drain().map(|(_, e)| e).collect();
        for entry in &entries {
            entry.token.cancel();
        }
        for entry in entries {
            let (lock, cvar) = &*entry.completion;
            let slot = lock.lock().unwrap();
            // Jobs the pool discards resolve through their guard
            let _guard = cvar.wait_while(slot, |s| s.is_none()).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    fn executor() -> TaskExecutor {
        TaskExecutor::new(Arc::new(WorkerPool::new(2)))
    }

    #[test]
    fn task_completes() {
        let exec = executor();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let id = exec
            .submit_task(move |_| flag.store(true, Ordering::SeqCst), TaskPriority::Normal)
            .unwrap();
        assert_eq!(exec.wait_for_task(id, None).unwrap(), TaskState::Completed);
        assert!(ran.load(Ordering::SeqCst));
        assert!(!exec.is_task_running(id));
    }

    #[test]
    fn cancel_is_observed_cooperatively() {
        let exec = executor();
        let id = exec
            .submit_task(
                |token| {
                    let deadline = Instant::now() + Duration::from_secs(5);
                    while !token.is_cancelled() && Instant::now() < deadline {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                },
                TaskPriority::High,
            )
            .unwrap();

        assert!(exec.is_task_running(id));
        assert!(exec.cancel_task(id));
        let state = exec.wait_for_task(id, Some(Duration::from_secs(2))).unwrap();
        assert_eq!(state, TaskState::Cancelled);
    }

    #[test]
    fn wait_times_out() {
        let exec = executor();
        let id = exec
            .submit_task(
                |_| std::thread::sleep(Duration::from_millis(300)),
                TaskPriority::Normal,
            )
            .unwrap();
        let err = exec.wait_for_task(id, Some(Duration::from_millis(10))).unwrap_err();
        assert!(matches!(err, TaskError::Timeout { task_id, .. } if task_id == id));
    }

    #[test]
    fn panicking_task_is_reported() {
        let exec = executor();
        let id = exec
            .submit_task(|_| panic!("task exploded"), TaskPriority::Normal)
            .unwrap();
        assert_eq!(
            exec.wait_for_task(id, Some(Duration::from_secs(2))).unwrap(),
            TaskState::Panicked("task exploded".into())
        );
    }

    #[test]
    fn finished_tasks_swept_on_submit() {
        let exec = executor();
        let first = exec.submit_task(|_| {}, TaskPriority::Normal).unwrap();
        exec.wait_for_task(first, None).unwrap();
        let _second = exec.submit_task(|_| {}, TaskPriority::Normal).unwrap();
        assert_eq!(exec.wait_for_task(first, None), Err(TaskError::NotFound(first)));
    }

    #[test]
    fn unknown_task_not_found() {
        let exec = executor();
        assert!(!exec.cancel_task(99));
        assert_eq!(exec.wait_for_task(99, None), Err(TaskError::NotFound(99)));
    }
}
