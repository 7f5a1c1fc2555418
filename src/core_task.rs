//! The type-erased outcome+continuation node shared by every `Task`/
//! `TaskSource` pair.
//!
//! Grounded on `TaskBase<T>`/`TaskSourceBase<T>` in
//! `original_source/engine/core/kernel/include/nau/async/task_base.h`: a
//! single heap-allocated node holding an optional result, an optional
//! continuation, and a "ready" flag, shared between exactly one producer
//! (`TaskSource`) and one or more consumers. Ownership in the C++ source is
//! an intrusive ref count (`addRef`/`releaseRef`); here it's `Arc`, matching
//! how the teacher crate lets `Arc<Mutex<_>>` stand in for that pattern in
//! `invocation.rs`'s `CompletionHandle`.

use std::sync::Arc;
use std::task::Waker;

use parking_lot::Mutex;

use crate::error::Failure;

/// The outcome of a completed task: either a value or a [`Failure`].
pub type Outcome<T> = Result<T, Failure>;

enum Slot<T> {
    Pending,
    Ready(Outcome<T>),
    /// The outcome was already taken by a one-shot consumer (`Task::await`).
    Taken,
}

struct CoreTaskState<T> {
    slot: Slot<T>,
    waker: Option<Waker>,
    /// A plain on-ready callback, distinct from `waker`: installed by a
    /// synchronous, non-`Future` caller (`combinators::wait`) that wants to
    /// be notified exactly once without itself being polled.
    ready_callback: Option<Box<dyn FnOnce() + Send>>,
    /// Set once a `Task` has been produced for this node; a second call to
    /// `TaskSource::get_task` is a programmer error, matching
    /// `TaskSourceBase::getTask()`'s single-use assertion.
    task_taken: bool,
}

/// The shared node behind a `Task<T>`/`TaskSource<T>` pair.
///
/// Cloning a `CoreTask` clones the `Arc`; the underlying state is reference
/// counted the same way the C++ `CoreTaskPtr` is, just without a manual
/// `addRef`/`releaseRef` surface.
pub struct CoreTask<T> {
    state: Arc<Mutex<CoreTaskState<T>>>,
}

impl<T> Clone for CoreTask<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> CoreTask<T> {
    /// Create a new, pending node with no continuation.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CoreTaskState {
                slot: Slot::Pending,
                waker: None,
                ready_callback: None,
                task_taken: false,
            })),
        }
    }

    /// Mark this node as having handed out its one `Task`. Panics on reuse,
    /// matching the original's `getTask()` assertion.
    pub(crate) fn mark_task_taken(&self) {
        let mut state = self.state.lock();
        assert!(!state.task_taken, "get_task() called more than once on this TaskSource");
        state.task_taken = true;
    }

    /// Resolve with a value or a failure. Returns `false` if the node was
    /// already resolved (an at-most-once violation); callers log a warning
    /// in that case instead of panicking, matching the ambient logging
    /// contract for invariant violations.
    pub fn resolve(&self, outcome: Outcome<T>) -> bool {
        let (waker, ready_callback) = {
            let mut state = self.state.lock();
            if !matches!(state.slot, Slot::Pending) {
                tracing::warn!(target: "task_kernel::core_task", "resolve() called on an already-resolved task");
                return false;
            }
            state.slot = Slot::Ready(outcome);
            (state.waker.take(), state.ready_callback.take())
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        if let Some(ready_callback) = ready_callback {
            ready_callback();
        }
        true
    }

    /// `true` once [`resolve`](Self::resolve) has been called.
    /// `true` once this node has resolved, whether or not the outcome has
    /// since been taken by a consumer. Matches `Ready` and `Taken` alike:
    /// "ready" means "will never again transition", not "has an outcome
    /// still waiting to be read" — callers that need the latter use
    /// `poll_take`/`try_take`'s `Option` return instead.
    pub fn is_ready(&self) -> bool {
        matches!(self.state.lock().slot, Slot::Ready(_) | Slot::Taken)
    }

    /// Poll-style accessor used by the `Future` impl: installs `waker` if
    /// still pending, otherwise takes the outcome exactly once.
    pub fn poll_take(&self, waker: &Waker) -> Option<Outcome<T>> {
        let mut state = self.state.lock();
        match &state.slot {
            Slot::Pending => {
                state.waker = Some(waker.clone());
                None
            }
            Slot::Ready(_) => {
                let Slot::Ready(outcome) = std::mem::replace(&mut state.slot, Slot::Taken) else {
                    unreachable!()
                };
                Some(outcome)
            }
            Slot::Taken => {
                tracing::warn!(target: "task_kernel::core_task", "task outcome polled after being taken");
                None
            }
        }
    }

    /// Register a plain callback to run once this node becomes ready, for a
    /// synchronous (non-`Future`) caller. Runs `callback` immediately, on the
    /// calling thread, if already ready. Used by `combinators::wait` to block
    /// a thread on a condvar instead of driving a `Waker`-based poll loop.
    pub fn set_ready_callback<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if matches!(state.slot, Slot::Pending) {
            state.ready_callback = Some(Box::new(callback));
        } else {
            drop(state);
            callback();
        }
    }

    /// Non-blocking attempt to take a ready outcome without registering a
    /// waker. Used by `detach()`'s fire-and-forget path and by combinators
    /// that already know the task is ready.
    pub fn try_take(&self) -> Option<Outcome<T>> {
        let mut state = self.state.lock();
        if matches!(state.slot, Slot::Ready(_)) {
            let Slot::Ready(outcome) = std::mem::replace(&mut state.slot, Slot::Taken) else {
                unreachable!()
            };
            Some(outcome)
        } else {
            None
        }
    }
}

impl<T> Default for CoreTask<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_once_then_rejects_second_resolve() {
        let core = CoreTask::<i32>::new();
        assert!(core.resolve(Ok(1)));
        assert!(!core.resolve(Ok(2)));
        assert!(core.is_ready());
    }

    #[test]
    fn try_take_returns_outcome_exactly_once() {
        let core = CoreTask::<i32>::new();
        core.resolve(Ok(42));
        assert_eq!(core.try_take().unwrap().unwrap(), 42);
        assert!(core.try_take().is_none());
    }

    #[test]
    fn ready_callback_fires_once_on_resolve() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let core = CoreTask::<i32>::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        core.set_ready_callback(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        core.resolve(Ok(1));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ready_callback_on_already_ready_fires_immediately() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let core = CoreTask::<i32>::new();
        core.resolve(Ok(1));
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        core.set_ready_callback(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "more than once")]
    fn mark_task_taken_twice_panics() {
        let core = CoreTask::<i32>::new();
        core.mark_task_taken();
        core.mark_task_taken();
    }
}
