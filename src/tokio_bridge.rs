//! Bridges [`crate::Executor`] onto a `tokio` runtime handle, so tasks
//! spawned through this crate can run alongside ordinary `tokio::spawn`
//! work on the same runtime.
//!
//! Grounded on the teacher crate's `async_runtime.rs` (`AsyncRuntime`
//! wrapping a `tokio::runtime::Runtime`/`Handle`), generalized from a
//! standalone runtime owner into a thin `Executor` adapter over a handle the
//! host already owns.


use tokio::runtime::Handle;

use crate::executor::Executor;
use crate::invocation::Invocation;

/// An [`Executor`] that dispatches invocations via `Handle::spawn`.
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Bridge onto the currently entered tokio runtime.
    pub fn current() -> Self {
        Self { handle: Handle::current() }
    }

    /// Bridge onto an explicit runtime handle.
    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Executor for TokioExecutor {
    fn schedule_invocation(&self, invocation: Invocation) {
        self.handle.spawn(async move {
            invocation.invoke();
        });
    }
}
