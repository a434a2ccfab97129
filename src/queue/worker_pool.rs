//! Bounded pool for running check tasks

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of check tasks running at once, across all reviews
    pub max_concurrent: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_concurrent: 16 }
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStats {
    pub max_concurrent: usize,
    pub in_flight: u64,
    pub completed: u64,
}

struct Counters {
    in_flight: AtomicU64,
    completed: AtomicU64,
}

/// Decrements `in_flight` even if the task panics
struct InFlightGuard(Arc<Counters>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.0.completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Spawns tasks that wait for one of `max_concurrent` permits before running.
///
/// Each task is independent; dropping its `JoinHandle` detaches it and the
/// permit is released when it finishes.
#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    config: PoolConfig,
    counters: Arc<Counters>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
            counters: Arc::new(Counters {
                in_flight: AtomicU64::new(0),
                completed: AtomicU64::new(0),
            }),
        }
    }

    /// Spawn `task` once a permit is free. Yields `None` if the pool was closed.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let counters = self.counters.clone();

        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;

            counters.in_flight.fetch_add(1, Ordering::Relaxed);
            let _guard = InFlightGuard(counters);

            Some(task.await)
        })
    }

    /// Stop handing out permits; queued tasks resolve to `None`.
    pub fn close(&self) {
        self.semaphore.close();
        debug!("Worker pool closed");
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_concurrent: self.config.max_concurrent,
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
        }
    }
}
