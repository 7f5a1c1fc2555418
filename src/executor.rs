//! Pluggable executors and the process-wide executor registry.
//!
//! Grounded on `nau::async::Executor` in `original_source/` (abstract
//! `scheduleInvocation`, a thread-local "currently invoking" stack via
//! `InvokeGuard`, and a static default/this-thread/by-name registry) and on
//! the teacher crate's `threadpool.rs`/`worker.rs`, which are this crate's
//! two concrete `Executor` implementations ([`crate::PoolExecutor`] and
//! [`crate::WorkQueue`]).

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::invocation::Invocation;

/// Something that can run scheduled [`Invocation`]s.
///
/// Implementors provide only [`Executor::schedule_invocation`]; `execute` is
/// a thin wrapper kept separate so that future instrumentation (e.g.
/// batching) can wrap every entry point in one place, matching the split
/// between `Executor::execute` and the `scheduleInvocation` virtual in the
/// original source.
pub trait Executor: Send + Sync {
    /// Enqueue an invocation for later execution. Implementations must be
    /// callable from any thread.
    fn schedule_invocation(&self, invocation: Invocation);

    /// Block the calling thread until this executor has processed at least
    /// one invocation since the call began, or has been finalized. Used by
    /// shutdown loops that need to know the executor made forward progress.
    fn wait_any_activity(&self) {}
}

impl dyn Executor {
    /// Enqueue an invocation. Equivalent to [`Executor::schedule_invocation`];
    /// wrapping every dispatch in an [`InvokeGuard`] so nested scheduling sees
    /// accurate `Executor::current()`/`Executor::invoked()` values is instead
    /// handled by each executor's poll loop (see [`crate::WorkQueue`] and
    /// [`crate::PoolExecutor`]), since only the executor driving the
    /// invocation — not the caller enqueuing it — knows when the invocation
    /// actually runs.
    pub fn execute(&self, invocation: Invocation) {
        self.schedule_invocation(invocation);
    }

    /// Convenience for scheduling a plain closure.
    pub fn execute_fn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_invocation(Invocation::from_fn(f));
    }
}

/// Dispose of `executor`, blocking the calling thread until no other
/// `Arc<dyn Executor>` handle (an in-flight `TaskDriver`, the default/named
/// registry, another clone held elsewhere) still references it, or until
/// `timeout` elapses. Grounded on the static `Executor::finalize(Executor::Ptr&&)`
/// in `original_source`, referenced by spec's shutdown sequence ("disposes
/// the executor ... then polls until quiescent").
///
/// Callers should drop their own other handles (e.g. unregister it from the
/// default-executor registry) before calling this, or quiescence driven
/// purely by in-flight tasks will never be observed — `RuntimeGuard::drop`
/// does exactly that.
pub fn finalize(executor: Arc<dyn Executor>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Arc::strong_count(&executor) > 1 {
        if Instant::now() >= deadline {
            tracing::warn!(
                target: "task_kernel::executor",
                "finalize() timed out waiting for the executor to become quiescent"
            );
            return;
        }
        executor.wait_any_activity();
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// RAII guard marking "we are currently running an invocation dispatched by
/// `executor`" for the lifetime of the guard. Pushed onto a thread-local
/// stack so that reentrant scheduling from inside a callback observes the
/// right executor via [`current`]/[`invoked`].
pub struct InvokeGuard {
    _private: (),
}

impl InvokeGuard {
    /// Enter the guard, recording `executor` as the currently-invoking
    /// executor on this thread until the guard is dropped.
    pub fn enter(executor: Arc<dyn Executor>) -> Self {
        INVOKED_STACK.with(|stack| stack.borrow_mut().push(executor));
        Self { _private: () }
    }
}

impl Drop for InvokeGuard {
    fn drop(&mut self) {
        INVOKED_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

thread_local! {
    static INVOKED_STACK: RefCell<Vec<Arc<dyn Executor>>> = const { RefCell::new(Vec::new()) };
    static THIS_THREAD_EXECUTOR: RefCell<Option<Arc<dyn Executor>>> = const { RefCell::new(None) };
}

static DEFAULT_EXECUTOR: OnceLock<Mutex<Option<Arc<dyn Executor>>>> = OnceLock::new();
static NAMED_EXECUTORS: OnceLock<RwLock<HashMap<String, Arc<dyn Executor>>>> = OnceLock::new();

fn default_slot() -> &'static Mutex<Option<Arc<dyn Executor>>> {
    DEFAULT_EXECUTOR.get_or_init(|| Mutex::new(None))
}

fn named_registry() -> &'static RwLock<HashMap<String, Arc<dyn Executor>>> {
    NAMED_EXECUTORS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Install the process-wide default executor, used whenever no other
/// executor has been captured (e.g. the first `run()` call in a process).
pub fn set_default(executor: Arc<dyn Executor>) {
    *default_slot().lock() = Some(executor);
}

/// Clear the process-wide default executor.
pub fn clear_default() {
    *default_slot().lock() = None;
}

/// The process-wide default executor, if one has been installed.
pub fn default() -> Option<Arc<dyn Executor>> {
    default_slot().lock().clone()
}

/// Install the executor used by [`current`] on this thread when no
/// invocation is in flight and no default is set.
pub fn set_this_thread_executor(executor: Arc<dyn Executor>) {
    THIS_THREAD_EXECUTOR.with(|slot| *slot.borrow_mut() = Some(executor));
}

/// The executor installed on this thread via [`set_this_thread_executor`].
pub fn this_thread_executor() -> Option<Arc<dyn Executor>> {
    THIS_THREAD_EXECUTOR.with(|slot| slot.borrow().clone())
}

/// The executor currently dispatching an invocation on this thread, i.e.
/// the innermost live [`InvokeGuard`]. `None` if called outside of any
/// executor's invocation loop.
pub fn invoked() -> Option<Arc<dyn Executor>> {
    INVOKED_STACK.with(|stack| stack.borrow().last().cloned())
}

/// The executor a coroutine suspending right now should capture as its
/// resumption target: [`invoked`], falling back to
/// [`this_thread_executor`], falling back to [`default`].
pub fn current() -> Option<Arc<dyn Executor>> {
    invoked().or_else(this_thread_executor).or_else(default)
}

/// Register `executor` under `name` for later lookup via [`find_by_name`].
pub fn set_executor_name(executor: Arc<dyn Executor>, name: impl Into<String>) {
    named_registry().write().unwrap().insert(name.into(), executor);
}

/// Look up a previously-named executor.
pub fn find_by_name(name: &str) -> Option<Arc<dyn Executor>> {
    named_registry().read().unwrap().get(name).cloned()
}

/// Thread id helper used by tests asserting that a resumption ran on the
/// expected worker thread.
pub fn current_thread_id() -> ThreadId {
    std::thread::current().id()
}
