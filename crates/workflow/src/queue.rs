//! The top-level request queue.
//!
//! Natural-language requests are accepted immediately and handed to a small
//! set of worker threads in FIFO order. Callers poll for the outcome by id.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use chrono::{DateTime, Utc};
use deskpilot_config::QueueConfig;
use deskpilot_core::{DomainEvent, EventBus, ExecutionResult, FailureKind};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A request waiting for, or undergoing, execution.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    pub request_id: String,
    pub text: String,
    pub submitted_at: DateTime<Utc>,
}

/// Runs one request to completion.
pub type RequestHandler = Arc<dyn Fn(&QueuedRequest) -> ExecutionResult + Send + Sync>;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedRequest>,
    running: HashSet<String>,
    results: HashMap<String, ExecutionResult>,
    paused: bool,
    /// Workers exit once the queue is empty
    draining: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    changed: Condvar,
    handler: RequestHandler,
    events: Option<Arc<EventBus>>,
}

pub struct RequestQueue {
    config: QueueConfig,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RequestQueue {
    pub fn new(config: QueueConfig, handler: RequestHandler) -> Self {
        Self::build(config, handler, None)
    }

    pub fn with_event_bus(config: QueueConfig, handler: RequestHandler, events: Arc<EventBus>) -> Self {
        Self::build(config, handler, Some(events))
    }

    fn build(config: QueueConfig, handler: RequestHandler, events: Option<Arc<EventBus>>) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                changed: Condvar::new(),
                handler,
                events,
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker threads. Calling it again is a no-op.
    pub fn start(&self) {
        let mut workers = self.workers.lock().unwrap();
        if !workers.is_empty() {
            return;
        }
        self.shared.state.lock().unwrap().draining = false;

        for index in 0..self.config.workers.max(1) {
            let shared = Arc::clone(&self.shared);
            match std::thread::Builder::new()
                .name(format!("deskpilot-queue-{index}"))
                .spawn(move || worker_loop(&shared, index))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => error!(worker = index, error = %e, "Could not spawn queue worker"),
            }
        }
        info!(workers = workers.len(), "Request queue started");
    }

    /// Enqueue a request and return its id.
    pub fn submit(&self, text: impl Into<String>) -> String {
        let request = QueuedRequest {
            request_id: format!("REQ-{}", Uuid::new_v4()),
            text: text.into(),
            submitted_at: Utc::now(),
        };
        let request_id = request.request_id.clone();

        self.shared.state.lock().unwrap().pending.push_back(request);
        self.shared.changed.notify_one();

        debug!(request_id = %request_id, "Request queued");
        if let Some(events) = &self.shared.events {
            events.publish(DomainEvent::RequestQueued {
                request_id: request_id.clone(),
                timestamp: Utc::now(),
            });
        }
        request_id
    }

    /// The outcome so far: the final result, IN_PROGRESS while queued or
    /// running, or FAILED for an unknown id.
    pub fn result(&self, request_id: &str) -> ExecutionResult {
        let state = self.shared.state.lock().unwrap();
        if let Some(result) = state.results.get(request_id) {
            return result.clone();
        }
        if state.running.contains(request_id) || state.pending.iter().any(|r| r.request_id == request_id) {
            return ExecutionResult::in_progress();
        }
        ExecutionResult::failed(FailureKind::Validation, "Request ID not found")
    }

    /// Stop handing out new work. Running requests finish normally.
    pub fn pause(&self) {
        self.shared.state.lock().unwrap().paused = true;
        info!("Request queue paused");
    }

    pub fn resume(&self) {
        self.shared.state.lock().unwrap().paused = false;
        self.shared.changed.notify_all();
        info!("Request queue resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().unwrap().paused
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().unwrap().pending.len()
    }

    pub fn running_count(&self) -> usize {
        self.shared.state.lock().unwrap().running.len()
    }

    /// Finish everything queued, then stop the workers.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.draining = true;
            state.paused = false;
        }
        self.shared.changed.notify_all();
        self.join_workers();
        info!("Request queue shut down");
    }

    /// Complete every queued request as CANCELLED. Running ones continue.
    pub fn cancel_pending(&self, reason: &str) -> usize {
        let mut state = self.shared.state.lock().unwrap();
        let dropped: Vec<QueuedRequest> = state.pending.drain(..).collect();
        for request in &dropped {
            state
                .results
                .insert(request.request_id.clone(), ExecutionResult::cancelled(reason));
        }
        dropped.len()
    }

    /// Drop everything queued, completing each as CANCELLED, then stop.
    pub fn shutdown_now(&self) {
        self.shared.state.lock().unwrap().draining = true;
        let dropped = self.cancel_pending("Request cancelled by shutdown");
        self.shared.changed.notify_all();
        self.join_workers();
        warn!(dropped, "Request queue shut down immediately");
    }

    fn join_workers(&self) {
        let workers: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                warn!("Queue worker panicked");
            }
        }
    }
}

impl Drop for RequestQueue {
    fn drop(&mut self) {
        let started = self.workers.get_mut().map(|w| !w.is_empty()).unwrap_or(false);
        if started {
            self.shutdown_now();
        }
    }
}

fn worker_loop(shared: &Shared, index: usize) {
    loop {
        let request = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if !state.paused && let Some(request) = state.pending.pop_front() {
                    state.running.insert(request.request_id.clone());
                    break request;
                }
                if state.draining && (state.pending.is_empty() || state.paused) {
                    debug!(worker = index, "Queue worker exiting");
                    return;
                }
                state = shared.changed.wait(state).unwrap();
            }
        };

        let started = Instant::now();
        debug!(worker = index, request_id = %request.request_id, "Processing request");
        let mut result = match catch_unwind(AssertUnwindSafe(|| (shared.handler)(&request))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(request_id = %request.request_id, panic = %message, "Request handler panicked");
                ExecutionResult::failed(FailureKind::Execution, format!("Request handler panicked: {message}"))
            }
        };
        if result.execution_time_ms == 0 {
            result.execution_time_ms = started.elapsed().as_millis() as u64;
        }

        if let Some(events) = &shared.events {
            events.publish(DomainEvent::RequestCompleted {
                request_id: request.request_id.clone(),
                status: result.status,
                duration_ms: result.execution_time_ms,
                timestamp: Utc::now(),
            });
        }
        info!(
            request_id = %request.request_id,
            success = result.success,
            duration_ms = result.execution_time_ms,
            "Request finished"
        );

        let mut state = shared.state.lock().unwrap();
        state.running.remove(&request.request_id);
        state.results.insert(request.request_id, result);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskpilot_core::ExecutionStatus;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn echo() -> RequestHandler {
        Arc::new(|req: &QueuedRequest| ExecutionResult::completed(req.text.to_uppercase()))
    }

    fn wait_for(queue: &RequestQueue, id: &str) -> ExecutionResult {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let r = queue.result(id);
            if r.status != ExecutionStatus::InProgress || Instant::now() > deadline {
                return r;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn ids_have_expected_shape() {
        let queue = RequestQueue::new(QueueConfig::default(), echo());
        let id = queue.submit("x");
        assert!(id.starts_with("REQ-"));
        assert_eq!(id.len(), 4 + 36);
    }

    #[test]
    fn requests_complete_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let handler: RequestHandler = Arc::new(move |req: &QueuedRequest| {
            recorder.lock().unwrap().push(req.text.clone());
            ExecutionResult::completed("ok")
        });
        let queue = RequestQueue::new(QueueConfig::default(), handler);
        let ids: Vec<String> = ["a", "b", "c"].iter().map(|t| queue.submit(*t)).collect();
        queue.start();

        for id in &ids {
            assert!(wait_for(&queue, id).success);
        }
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn unknown_id_fails() {
        let queue = RequestQueue::new(QueueConfig::default(), echo());
        let r = queue.result("REQ-missing");
        assert_eq!(r.status, ExecutionStatus::Failed);
        assert_eq!(r.error_message, "Request ID not found");
    }

    #[test]
    fn paused_queue_holds_work() {
        let queue = RequestQueue::new(QueueConfig::default(), echo());
        queue.start();
        queue.pause();
        let id = queue.submit("later");
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.result(&id).status, ExecutionStatus::InProgress);
        assert_eq!(queue.pending_count(), 1);

        queue.resume();
        assert_eq!(wait_for(&queue, &id).output, "LATER");
    }

    #[test]
    fn shutdown_drains_then_stops() {
        let queue = RequestQueue::new(QueueConfig { workers: 2 }, echo());
        let ids: Vec<String> = (0..5).map(|i| queue.submit(format!("r{i}"))).collect();
        queue.start();
        queue.shutdown();
        for id in &ids {
            assert!(queue.result(id).success);
        }
    }

    #[test]
    fn shutdown_now_cancels_pending() {
        let release = Arc::new(AtomicBool::new(false));
        let gate = release.clone();
        let handler: RequestHandler = Arc::new(move |_req: &QueuedRequest| {
            while !gate.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(2));
            }
            ExecutionResult::completed("done")
        });
        let queue = Arc::new(RequestQueue::new(QueueConfig::default(), handler));
        queue.start();
        let first = queue.submit("first");
        while queue.running_count() == 0 {
            std::thread::sleep(Duration::from_millis(2));
        }
        let second = queue.submit("second");

        let stopper = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.shutdown_now())
        };
        while queue.pending_count() > 0 {
            std::thread::sleep(Duration::from_millis(2));
        }
        release.store(true, Ordering::SeqCst);
        stopper.join().unwrap();

        // In-flight work is never aborted
        assert!(queue.result(&first).success);
        assert_eq!(queue.result(&second).status, ExecutionStatus::Cancelled);
    }

    #[test]
    fn panicking_handler_fails_request() {
        let handler: RequestHandler = Arc::new(|_req: &QueuedRequest| panic!("boom"));
        let queue = RequestQueue::new(QueueConfig::default(), handler);
        queue.start();
        let id = queue.submit("x");
        let r = wait_for(&queue, &id);
        assert_eq!(r.status, ExecutionStatus::Failed);
        assert!(r.error_message.contains("boom"));
    }

    #[test]
    fn events_are_published() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let queue = RequestQueue::with_event_bus(QueueConfig::default(), echo(), bus);
        queue.start();
        let id = queue.submit("x");
        wait_for(&queue, &id);
        queue.shutdown();

        let first = rx.try_recv().unwrap();
        assert!(matches!(first.as_ref(), DomainEvent::RequestQueued { request_id, .. } if *request_id == id));
        let second = rx.try_recv().unwrap();
        assert!(matches!(second.as_ref(), DomainEvent::RequestCompleted { status: ExecutionStatus::Completed, .. }));
    }
}
