//! Priority worker pool.
//!
//! A fixed set of worker threads drains a max-priority queue. Within one
//! priority level jobs run in submission order. One lock guards the queue and
//! two condition variables signal "work available" and "all idle".
//!
//! Panics inside a job are caught at the worker boundary and routed to the
//! exception handler; the worker keeps running.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use deskpilot_core::error::{TaskError, WorkerPoolError};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::panic_message;

/// Scheduling priority. Higher runs first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TaskPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

type Job = Box<dyn FnOnce() + Send + 'static>;
type ExceptionHandler = Arc<dyn Fn(&str) + Send + Sync>;

struct QueuedJob {
    priority: TaskPriority,
    seq: u64,
    job: Job,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence number first
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    queue: BinaryHeap<QueuedJob>,
    stopping: bool,
    active: usize,
    next_seq: u64,
    total_executed: u64,
    total_failed: u64,
    total_time: Duration,
}

struct Shared {
    state: Mutex<QueueState>,
    work_available: Condvar,
    all_idle: Condvar,
    exception_handler: RwLock<ExceptionHandler>,
}

/// Snapshot of pool activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub thread_count: usize,
    pub idle_threads: usize,
    pub busy_threads: usize,
    pub pending_tasks: usize,
    pub total_executed: u64,
    pub total_failed: u64,
    pub total_execution_time_ms: u64,
    pub average_execution_time_ms: f64,
}

/// Handle to a submitted job's return value.
pub struct TaskHandle<T> {
    id: u64,
    receiver: mpsc::Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the job finishes.
    ///
    /// Returns [`TaskError::Dropped`] if the job was discarded by
    /// `shutdown(false)` before it ran.
    pub fn wait(self) -> Result<T, TaskError> {
        self.receiver.recv().unwrap_or(Err(TaskError::Dropped))
    }

    pub fn wait_timeout(self, timeout: Duration) -> Result<T, TaskError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(TaskError::Timeout {
                task_id: self.id,
                waited_ms: timeout.as_millis() as u64,
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(TaskError::Dropped),
        }
    }
}

/// Fixed-size pool of worker threads.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    thread_count: usize,
}

impl WorkerPool {
    /// Spawn `thread_count` workers (at least one).
    pub fn new(thread_count: usize) -> Self {
        let thread_count = thread_count.max(1);
        let default_handler: ExceptionHandler = Arc::new(|message: &str| {
            error!(error = %message, "Worker task panicked");
        });
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            work_available: Condvar::new(),
            all_idle: Condvar::new(),
            exception_handler: RwLock::new(default_handler),
        });

        let workers = (0..thread_count)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("deskpilot-worker-{index}"))
                    .spawn(move || worker_loop(shared))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!(error = %e, "Failed to spawn worker thread");
                    None
                }
            })
            .collect::<Vec<_>>();

        info!(threads = workers.len(), "Worker pool started");

        Self {
            shared,
            workers: Mutex::new(workers),
            thread_count,
        }
    }

    /// Replace the handler that receives panic messages from jobs.
    pub fn set_exception_handler(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        *self.shared.exception_handler.write().unwrap() = Arc::new(handler);
    }

    /// Submit a job and get a handle to its result.
    pub fn submit<T, F>(&self, priority: TaskPriority, work: F) -> Result<TaskHandle<T>, WorkerPoolError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let id = self.enqueue(
            priority,
            Box::new(move || match catch_unwind(AssertUnwindSafe(work)) {
                Ok(value) => {
                    let _ = sender.send(Ok(value));
                }
                Err(payload) => {
                    let _ = sender.send(Err(TaskError::Panicked(panic_message(payload.as_ref()))));
                    // Let the worker boundary count it and notify the handler
                    std::panic::resume_unwind(payload);
                }
            }),
        )?;
        Ok(TaskHandle { id, receiver })
    }

    /// Submit a job whose result nobody waits for.
    pub fn submit_detached<F>(&self, priority: TaskPriority, work: F) -> Result<(), WorkerPoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(priority, Box::new(work)).map(|_| ())
    }

    fn enqueue(&self, priority: TaskPriority, job: Job) -> Result<u64, WorkerPoolError> {
        let mut state = self.shared.state.lock().unwrap();
        if state.stopping {
            return Err(WorkerPoolError::Stopped);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(QueuedJob { priority, seq, job });
        drop(state);
        self.shared.work_available.notify_one();
        Ok(seq)
    }

    /// Block until the queue is empty and no job is running.
    pub fn wait_for_all(&self) {
        let state = self.shared.state.lock().unwrap();
        let _state = self
            .shared
            .all_idle
            .wait_while(state, |s| !s.queue.is_empty() || s.active > 0)
            .unwrap();
    }

    pub fn is_running(&self) -> bool {
        !self.shared.state.lock().unwrap().stopping
    }

    /// Stop accepting work and join the workers.
    ///
    /// With `wait_for_pending` the queue is drained first; otherwise queued
    /// jobs are dropped and their handles resolve to [`TaskError::Dropped`].
    pub fn shutdown(&self, wait_for_pending: bool) {
        let dropped = {
            let mut state = self.shared.state.lock().unwrap();
            state.stopping = true;
            if wait_for_pending {
                0
            } else {
                let count = state.queue.len();
                state.queue.clear();
                count
            }
        };
        self.shared.work_available.notify_all();
        self.shared.all_idle.notify_all();

        if dropped > 0 {
            debug!(dropped, "Discarded pending jobs on shutdown");
        }

        let current = thread::current().id();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for handle in handles {
            // A job may own the last reference to the pool
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock().unwrap();
        let total_ms = state.total_time.as_millis() as u64;
        let finished = state.total_executed + state.total_failed;
        PoolStats {
            thread_count: self.thread_count,
            idle_threads: self.thread_count.saturating_sub(state.active),
            busy_threads: state.active,
            pending_tasks: state.queue.len(),
            total_executed: state.total_executed,
            total_failed: state.total_failed,
            total_execution_time_ms: total_ms,
            average_execution_time_ms: if finished == 0 {
                0.0
            } else {
                total_ms as f64 / finished as f64
            },
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if let Some(job) = state.queue.pop() {
                    state.active += 1;
                    break job;
                }
                if state.stopping {
                    return;
                }
                state = shared.work_available.wait(state).unwrap();
            }
        };

        let started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(job.job));
        let elapsed = started.elapsed();

        if let Err(payload) = &outcome {
            let message = panic_message(payload.as_ref());
            let handler = Arc::clone(&*shared.exception_handler.read().unwrap());
            // The handler itself must not take the worker down either
            let _ = catch_unwind(AssertUnwindSafe(|| handler(&message)));
        }

        let mut state = shared.state.lock().unwrap();
        state.active -= 1;
        state.total_time += elapsed;
        if outcome.is_ok() {
            state.total_executed += 1;
        } else {
            state.total_failed += 1;
        }
        if state.active == 0 && state.queue.is_empty() {
            shared.all_idle.notify_all();
        }
    }
}
