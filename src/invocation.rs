//! A type-erased deferred unit of work handed to an [`crate::Executor`].
//!
//! Grounded on the teacher crate's `QueuedInvocation` (boxed closure run
//! later, on a possibly different thread) and on
//! `nau::async::Executor::Invocation` in `original_source/`, which is a
//! tagged callable holding either a coroutine handle or a plain function
//! pointer. Rust has no need for the `(fn, data1, data2)` split the C++
//! source uses to stay allocation-free across an ABI boundary — a boxed
//! `FnOnce` already carries its captures, so `Invocation` only needs two
//! variants: a waker (coroutine resumption) and a closure.

use std::task::Waker;

/// A move-only, run-once unit of work scheduled onto an [`crate::Executor`].
///
/// Either a `Waker` (resuming a suspended `Future`/coroutine) or a boxed
/// closure (plain deferred work, e.g. a `TaskSource` continuation or a
/// `WorkQueue::execute` payload).
pub enum Invocation {
    /// Wake a suspended future. `Waker::wake` is itself just "enqueue this
    /// invocation again", so most of the time an `Invocation::Wake` is
    /// re-queued by whichever executor owns the woken task.
    Wake(Waker),
    /// A plain deferred closure.
    Fn(Box<dyn FnOnce() + Send + 'static>),
}

impl Invocation {
    /// Wrap a closure as a deferred invocation.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::Fn(Box::new(f))
    }

    /// Run the invocation, consuming it. At most once by construction: an
    /// `Invocation` is moved into the executor's queue and taken out by
    /// value to run.
    pub fn invoke(self) {
        match self {
            Self::Wake(waker) => waker.wake(),
            Self::Fn(f) => f(),
        }
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wake(_) => f.write_str("Invocation::Wake"),
            Self::Fn(_) => f.write_str("Invocation::Fn"),
        }
    }
}
