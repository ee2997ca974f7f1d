//! Execution context for the data-parallel stages.
//!
//! The engine never decides on its own where work runs. It receives an
//! `ExecutionContext` at construction and wraps every vectorised stage
//! (distance matrices, soft ranks, gradient accumulation) in
//! [`ExecutionContext::install`]. The algorithm code is therefore identical
//! on a single host worker and on a multi-worker rayon pool.
//!
//! If a pool cannot be created the context degrades to running on the
//! caller's thread; this is logged and never surfaces as an error.

use std::sync::Arc;

use log::{debug, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};

#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pool: Option<Arc<ThreadPool>>,
    requested: usize,
}

impl ExecutionContext {
    /// One worker: data-parallel iterators run sequentially.
    pub fn host() -> Self {
        Self::with_threads(1)
    }

    /// Pool with `threads` workers; `0` lets rayon pick one per core.
    pub fn parallel(threads: usize) -> Self {
        Self::with_threads(threads)
    }

    fn with_threads(threads: usize) -> Self {
        match ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => {
                debug!(
                    "Execution context with {} worker(s)",
                    pool.current_num_threads()
                );
                Self {
                    pool: Some(Arc::new(pool)),
                    requested: threads,
                }
            }
            Err(err) => {
                warn!(
                    "Could not build a {}-thread pool ({}); running on the caller's thread",
                    threads, err
                );
                Self {
                    pool: None,
                    requested: threads,
                }
            }
        }
    }

    /// Workers actually available to `install`.
    pub fn threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// Number of workers that was asked for.
    pub fn requested_threads(&self) -> usize {
        self.requested
    }

    /// True when the context fell back to the caller's thread.
    pub fn is_degraded(&self) -> bool {
        self.pool.is_none()
    }

    /// Runs `op` inside this context.
    pub fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::parallel(0)
    }
}
