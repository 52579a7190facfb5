//! Generic bounded resource pool.
//!
//! Resources come from a factory, are handed out as scoped [`PooledResource`]
//! guards, and return to the pool exactly once when the guard drops. On
//! return a resource is validated and reset, and idle resources are
//! validated again before reuse. Invalid ones are discarded and the freed
//! slot can be refilled by the factory.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use deskpilot_core::Planner;
use deskpilot_core::error::PoolError;
use tracing::{debug, info, warn};

type Factory<T> = Box<dyn Fn() -> Result<T, String> + Send + Sync>;
type Validator<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type Reset<T> = Box<dyn Fn(&mut T) + Send + Sync>;

pub const DEFAULT_MAX_SIZE: usize = 10;

struct PoolState<T> {
    idle: VecDeque<T>,
    checked_out: usize,
    shutting_down: bool,
    total_created: u64,
    last_acquire: Option<Instant>,
}

struct PoolInner<T> {
    name: String,
    state: Mutex<PoolState<T>>,
    available: Condvar,
    all_returned: Condvar,
    factory: Factory<T>,
    validator: Option<Validator<T>>,
    reset: Option<Reset<T>>,
    max_size: usize,
}

impl<T> PoolInner<T> {
    fn is_valid(&self, resource: &T) -> bool {
        self.validator.as_ref().is_none_or(|v| v(resource))
    }

    fn release(&self, mut resource: T) {
        let valid = self.is_valid(&resource);
        if valid && let Some(reset) = &self.reset {
            reset(&mut resource);
        }

        let mut state = self.state.lock().unwrap();
        state.checked_out -= 1;
        if valid && !state.shutting_down {
            state.idle.push_back(resource);
        } else if !valid {
            debug!(pool = %self.name, "Discarded invalid resource on release");
        }
        drop(state);
        self.available.notify_one();
        self.all_returned.notify_all();
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolStatistics {
    pub active: usize,
    pub available: usize,
    pub total_created: u64,
    pub max_size: usize,
    pub last_acquire: Option<Instant>,
}

/// Configures a [`ResourcePool`] before it is shared.
pub struct ResourcePoolBuilder<T> {
    name: String,
    factory: Factory<T>,
    validator: Option<Validator<T>>,
    reset: Option<Reset<T>>,
    max_size: usize,
}

impl<T: Send + 'static> ResourcePoolBuilder<T> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    /// Checked when a resource comes back and again before it is reused;
    /// false discards it.
    pub fn validator(mut self, validator: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Applied to valid resources before they go back to the idle list.
    pub fn reset(mut self, reset: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.reset = Some(Box::new(reset));
        self
    }

    pub fn build(self) -> ResourcePool<T> {
        info!(pool = %self.name, max_size = self.max_size, "Resource pool created");
        ResourcePool {
            inner: Arc::new(PoolInner {
                name: self.name,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    checked_out: 0,
                    shutting_down: false,
                    total_created: 0,
                    last_acquire: None,
                }),
                available: Condvar::new(),
                all_returned: Condvar::new(),
                factory: self.factory,
                validator: self.validator,
                reset: self.reset,
                max_size: self.max_size,
            }),
        }
    }
}

/// A bounded pool of reusable `T`.
pub struct ResourcePool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> ResourcePool<T> {
    pub fn builder(factory: impl Fn() -> Result<T, String> + Send + Sync + 'static) -> ResourcePoolBuilder<T> {
        ResourcePoolBuilder {
            name: "resources".into(),
            factory: Box::new(factory),
            validator: None,
            reset: None,
            max_size: DEFAULT_MAX_SIZE,
        }
    }

    /// Take a resource, creating one if under the cap.
    ///
    /// Blocks until a resource is free or `timeout` elapses. Fails
    /// immediately once the pool is shutting down.
    pub fn acquire(&self, timeout: Duration) -> Result<PooledResource<T>, PoolError> {
        let inner = &self.inner;
        let deadline = Instant::now() + timeout;
        let mut state = inner.state.lock().unwrap();

        loop {
            if state.shutting_down {
                return Err(PoolError::ShuttingDown);
            }

            while let Some(resource) = state.idle.pop_front() {
                if !inner.is_valid(&resource) {
                    debug!(pool = %inner.name, "Discarded stale idle resource");
                    continue;
                }
                state.checked_out += 1;
                state.last_acquire = Some(Instant::now());
                return Ok(PooledResource {
                    resource: Some(resource),
                    pool: Arc::clone(inner),
                });
            }

            if state.checked_out + state.idle.len() < inner.max_size {
                state.checked_out += 1;
                drop(state);

                return match (inner.factory)() {
                    Ok(resource) => {
                        let mut state = inner.state.lock().unwrap();
                        state.total_created += 1;
                        state.last_acquire = Some(Instant::now());
                        debug!(pool = %inner.name, total = state.total_created, "Created pooled resource");
                        Ok(PooledResource {
                            resource: Some(resource),
                            pool: Arc::clone(inner),
                        })
                    }
                    Err(reason) => {
                        let mut state = inner.state.lock().unwrap();
                        state.checked_out -= 1;
                        drop(state);
                        inner.available.notify_one();
                        inner.all_returned.notify_all();
                        warn!(pool = %inner.name, error = %reason, "Resource factory failed");
                        Err(PoolError::Factory(reason))
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::Timeout {
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            let (next, _) = inner.available.wait_timeout(state, deadline - now).unwrap();
            state = next;
        }
    }

    /// Refuse new acquisitions, flush idle resources, and block until every
    /// checked-out resource has come back.
    pub fn shutdown(&self) {
        let state = self.begin_shutdown();
        let _state = self
            .inner
            .all_returned
            .wait_while(state, |s| s.checked_out > 0)
            .unwrap();
        info!(pool = %self.inner.name, "Resource pool shut down");
    }

    /// Like [`shutdown`](Self::shutdown) but gives up after `timeout`.
    /// Returns whether every resource came back.
    pub fn shutdown_with_timeout(&self, timeout: Duration) -> bool {
        let state = self.begin_shutdown();
        let (state, _) = self
            .inner
            .all_returned
            .wait_timeout_while(state, timeout, |s| s.checked_out > 0)
            .unwrap();
        if state.checked_out > 0 {
            warn!(pool = %self.inner.name, outstanding = state.checked_out, "Shutdown timed out with resources still checked out");
            return false;
        }
        true
    }

    fn begin_shutdown(&self) -> std::sync::MutexGuard<'_, PoolState<T>> {
        let mut state = self.inner.state.lock().unwrap();
        state.shutting_down = true;
        state.idle.clear();
        self.inner.available.notify_all();
        state
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().unwrap().shutting_down
    }

    pub fn stats(&self) -> PoolStatistics {
        let state = self.inner.state.lock().unwrap();
        PoolStatistics {
            active: state.checked_out,
            available: state.idle.len(),
            total_created: state.total_created,
            max_size: self.inner.max_size,
            last_acquire: state.last_acquire,
        }
    }
}

/// Scoped handle; the resource goes back to its pool on drop.
pub struct PooledResource<T> {
    resource: Option<T>,
    pool: Arc<PoolInner<T>>,
}

impl<T> PooledResource<T> {
    /// Return the resource now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PooledResource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledResource")
            .field("pool", &self.pool.name)
            .field("resource", &self.resource)
            .finish()
    }
}

impl<T> Deref for PooledResource<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.resource {
            Some(resource) => resource,
            None => unreachable!("pooled resource used after release"),
        }
    }
}

impl<T> DerefMut for PooledResource<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.resource {
            Some(resource) => resource,
            None => unreachable!("pooled resource used after release"),
        }
    }
}

impl<T> Drop for PooledResource<T> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.release(resource);
        }
    }
}

/// Pool of planner sessions. Bounds how many planning calls run at once.
pub type PlannerPool = ResourcePool<Arc<dyn Planner>>;

/// Build a planner pool that hands out clones of one planner.
///
/// Sessions whose planner reports itself unconfigured are discarded on
/// return.
pub fn planner_pool(planner: Arc<dyn Planner>, max_size: usize) -> PlannerPool {
    ResourcePool::builder(move || Ok(Arc::clone(&planner)))
        .name("planner")
        .max_size(max_size)
        .validator(|p: &Arc<dyn Planner>| p.validate_configuration())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    fn counting_pool(max: usize) -> (ResourcePool<usize>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let pool = ResourcePool::builder(move || Ok(counter.fetch_add(1, Ordering::SeqCst)))
            .max_size(max)
            .build();
        (pool, created)
    }

    #[test]
    fn reuses_returned_resources() {
        let (pool, created) = counting_pool(2);
        {
            let r = pool.acquire(Duration::from_millis(10)).unwrap();
            assert_eq!(*r, 0);
        }
        let r = pool.acquire(Duration::from_millis(10)).unwrap();
        assert_eq!(*r, 0);
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn acquire_beyond_cap_times_out() {
        let (pool, _) = counting_pool(1);
        let _held = pool.acquire(Duration::from_millis(10)).unwrap();
        let err = pool.acquire(Duration::from_millis(30)).unwrap_err();
        assert_eq!(err, PoolError::Timeout { waited_ms: 30 });
        assert!(err.to_string().contains("Timeout waiting for connection"));
    }

    #[test]
    fn blocked_acquire_wakes_on_release() {
        let (pool, _) = counting_pool(1);
        let held = pool.acquire(Duration::from_millis(10)).unwrap();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire(Duration::from_secs(2)).map(|r| *r))
        };
        thread::sleep(Duration::from_millis(30));
        held.release();
        assert_eq!(waiter.join().unwrap(), Ok(0));
    }

    #[test]
    fn never_exceeds_cap_under_contention() {
        let (pool, _) = counting_pool(3);
        let in_use = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let in_use = Arc::clone(&in_use);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    for _ in 0..5 {
                        let _r = pool.acquire(Duration::from_secs(5)).unwrap();
                        let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(2));
                        in_use.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(pool.stats().total_created <= 3);
    }

    #[test]
    fn invalid_resources_discarded_without_shrinking() {
        let valid = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&valid);
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let pool = ResourcePool::builder(move || Ok(counter.fetch_add(1, Ordering::SeqCst)))
            .max_size(1)
            .validator(move |_| flag.load(Ordering::SeqCst))
            .build();

        drop(pool.acquire(Duration::from_millis(10)).unwrap());
        assert_eq!(pool.stats().available, 0);

        // Capacity is still there: a fresh resource gets created
        valid.store(true, Ordering::SeqCst);
        let r = pool.acquire(Duration::from_millis(10)).unwrap();
        assert_eq!(*r, 1);
    }

    #[test]
    fn resource_gone_stale_while_idle_is_replaced() {
        let valid = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&valid);
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let pool = ResourcePool::builder(move || Ok(counter.fetch_add(1, Ordering::SeqCst)))
            .max_size(1)
            .validator(move |_| flag.load(Ordering::SeqCst))
            .build();

        drop(pool.acquire(Duration::from_millis(10)).unwrap());
        assert_eq!(pool.stats().available, 1);

        valid.store(false, Ordering::SeqCst);
        let r = pool.acquire(Duration::from_millis(10)).unwrap();
        assert_eq!(*r, 1);
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().available, 0);
    }

    #[test]
    fn reset_runs_before_reuse() {
        let pool = ResourcePool::builder(|| Ok(Vec::<u8>::new()))
            .max_size(1)
            .reset(|v: &mut Vec<u8>| v.clear())
            .build();
        {
            let mut r = pool.acquire(Duration::from_millis(10)).unwrap();
            r.push(1);
        }
        assert!(pool.acquire(Duration::from_millis(10)).unwrap().is_empty());
    }

    #[test]
    fn acquire_after_shutdown_fails() {
        let (pool, _) = counting_pool(2);
        pool.shutdown();
        assert_eq!(
            pool.acquire(Duration::from_millis(10)).err(),
            Some(PoolError::ShuttingDown)
        );
    }

    #[test]
    fn shutdown_waits_for_checked_out() {
        let (pool, _) = counting_pool(1);
        let held = pool.acquire(Duration::from_millis(10)).unwrap();
        assert!(!pool.shutdown_with_timeout(Duration::from_millis(20)));

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            drop(held);
        });
        pool.shutdown();
        releaser.join().unwrap();
        assert_eq!(pool.stats().active, 0);
    }

    #[test]
    fn factory_failure_frees_slot() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let pool = ResourcePool::builder(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("endpoint down".to_string())
            } else {
                Ok(())
            }
        })
        .max_size(1)
        .build();

        assert_eq!(
            pool.acquire(Duration::from_millis(10)).err(),
            Some(PoolError::Factory("endpoint down".into()))
        );
        assert!(pool.acquire(Duration::from_millis(10)).is_ok());
    }
}
