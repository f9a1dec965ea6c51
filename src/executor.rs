//! Background execution for fetch-heavy work.
//!
//! Sampling itself is synchronous. The pool exists for callers that want a
//! result later, such as an interactive preview that is rebuilt whenever the
//! view moves; [`PreviewRequests`] drops results that a newer request has
//! superseded.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{GeoDataError, Result};

pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Fixed-size pool for blocking fetch and decode jobs.
pub struct WorkerPool {
    runtime: Option<Runtime>,
    handle: Handle,
    threads: usize,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .max_blocking_threads(threads)
            .thread_name("terra-tiles-worker")
            .enable_time()
            .build()?;
        debug!(threads, "worker pool started");
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            threads,
        })
    }

    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn spawn_blocking<F, R>(&self, job: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.spawn_blocking(job)
    }

    /// Runs a future to completion on the pool from a synchronous caller.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    /// Runs a blocking job on the pool and waits for it.
    pub fn run<F, R>(&self, job: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.block_on(self.spawn_blocking(job))
            .map_err(|e| GeoDataError::Transport(format!("worker task failed: {e}")))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Safe to drop from inside an async context, unlike a plain Runtime drop.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// A submitted preview job.
pub struct PreviewTicket {
    pub generation: u64,
    handle: JoinHandle<bool>,
}

impl PreviewTicket {
    /// Waits for the job; `true` when its result was kept.
    pub fn wait(self, pool: &WorkerPool) -> bool {
        pool.block_on(self.handle).unwrap_or(false)
    }
}

/// Latest-wins slot for asynchronous preview builds.
///
/// Every submission bumps a generation counter. A job's result is only
/// published if no newer job was submitted while it ran, and [`poll`] only
/// hands out results of the current generation.
///
/// [`poll`]: PreviewRequests::poll
pub struct PreviewRequests<T> {
    generation: Arc<AtomicU64>,
    latest: Arc<Mutex<Option<(u64, T)>>>,
}

impl<T> Default for PreviewRequests<T> {
    fn default() -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            latest: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T: Send + 'static> PreviewRequests<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Supersedes everything submitted so far.
    pub fn cancel(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn submit<F>(&self, pool: &WorkerPool, job: F) -> PreviewTicket
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let generation = self.cancel();
        let current = Arc::clone(&self.generation);
        let latest = Arc::clone(&self.latest);
        let handle = pool.spawn_blocking(move || {
            let result = job();
            let mut slot = latest.lock().unwrap_or_else(PoisonError::into_inner);
            if current.load(Ordering::SeqCst) != generation {
                trace!(generation, "discarding stale preview");
                return false;
            }
            *slot = Some((generation, result));
            true
        });
        PreviewTicket { generation, handle }
    }

    /// Takes the finished result of the latest submission, if ready.
    pub fn poll(&self) -> Option<T> {
        let mut slot = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.take() {
            Some((generation, result)) if generation == self.current_generation() => Some(result),
            _ => None,
        }
    }
}
