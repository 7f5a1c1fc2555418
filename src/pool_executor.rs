//! A work-stealing [`crate::Executor`] for CPU-bound resumptions, built on
//! `rayon`.
//!
//! Grounded on the teacher crate's `threadpool.rs` (`ThreadPool::global()`,
//! a `rayon::ThreadPool` wrapped with a global `OnceLock`). This module
//! keeps that dependency for the same concern it already covered — dispatch
//! across a fixed worker pool — rather than introducing a new one.

use std::sync::{Arc, OnceLock};

use rayon::{ThreadPool as RayonPool, ThreadPoolBuilder};

use crate::executor::Executor;
use crate::invocation::Invocation;

/// An `Executor` backed by a `rayon` work-stealing pool.
pub struct PoolExecutor {
    rayon: RayonPool,
    name: String,
}

impl PoolExecutor {
    /// Build a pool with `threads` workers (0 lets rayon pick a default
    /// based on available parallelism).
    pub fn new(name: impl Into<String>, threads: usize) -> Self {
        let name = name.into();
        let thread_name = name.clone();
        let rayon = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{thread_name}-{i}"))
            .build()
            .expect("failed to build rayon thread pool");
        Self { rayon, name }
    }

    /// The name this pool was constructed with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of worker threads in the pool.
    pub fn thread_count(&self) -> usize {
        self.rayon.current_num_threads()
    }
}

impl Executor for PoolExecutor {
    fn schedule_invocation(&self, invocation: Invocation) {
        self.rayon.spawn(move || {
            invocation.invoke();
        });
    }
}

static GLOBAL_POOL: OnceLock<Arc<PoolExecutor>> = OnceLock::new();

/// The process-wide default CPU-bound pool, created lazily on first use.
pub fn global() -> Arc<PoolExecutor> {
    GLOBAL_POOL
        .get_or_init(|| Arc::new(PoolExecutor::new("task-kernel-pool", 0)))
        .clone()
}
