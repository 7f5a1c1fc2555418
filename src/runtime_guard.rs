//! RAII installation of the process-wide default executor and timer
//! service, with quiescence-polling teardown.
//!
//! Spec §6 describes this guard in prose ("a host installs a default
//! executor and timer instance before spawning any task, and tears them
//! down only once nothing is outstanding") without naming it as its own
//! module. It's grounded on `examples/original_source/.../helpers/runtime_guard.{h,cpp}`
//! and on the teacher crate's `Application` lifecycle (`Application::new()`
//! installing global state, drop-time teardown in `application.rs`).

use std::sync::Arc;
use std::time::Duration;

use crate::executor::{self, Executor};
use crate::timer::{self, Timer};

/// How long [`RuntimeGuard::drop`] waits for the executor it installed to
/// become quiescent before giving up and logging a warning.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Installs a default [`Executor`] and a [`Timer`] service for the lifetime
/// of the guard. Intended to be constructed once near the top of `main`.
///
/// On drop, matches spec §6's shutdown sequence: unregisters the executor
/// and timer it installed, then calls [`executor::finalize`] to poll the
/// executor until quiescent (bounded by [`DEFAULT_SHUTDOWN_TIMEOUT`]) rather
/// than requiring the caller to remember to drain manually.
pub struct RuntimeGuard {
    // `Option` so `Drop` can move the sole remaining handle into
    // `executor::finalize` instead of leaving one behind in `self`.
    executor: Option<Arc<dyn Executor>>,
    timer: Arc<Timer>,
    /// Whatever was installed as the default executor/timer before this
    /// guard, restored on drop instead of just clearing the slot — so a
    /// guard constructed while another is already active unwinds back to
    /// that one rather than discarding it.
    previous_executor: Option<Arc<dyn Executor>>,
    previous_timer: Option<Arc<Timer>>,
}

impl RuntimeGuard {
    /// Install `executor` as the process default, and start and install a
    /// [`Timer`] service as the process default timer (used by
    /// [`crate::cancellation::Expiration`] to wire in deadlines).
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        let previous_executor = executor::default();
        executor::set_default(executor.clone());

        let previous_timer = timer::default();
        let timer = Arc::new(Timer::new());
        timer::set_default(timer.clone());

        Self {
            executor: Some(executor),
            timer,
            previous_executor,
            previous_timer,
        }
    }

    /// The timer service installed alongside the default executor.
    pub fn timer(&self) -> &Arc<Timer> {
        &self.timer
    }

    /// Poll `is_idle` until it reports `true` or `timeout` elapses, yielding
    /// briefly between polls. Used at shutdown to let in-flight work settle
    /// before tearing down the executor/timer.
    pub fn drain_until_idle<F: Fn() -> bool>(&self, is_idle: F, timeout: Duration) {
        let deadline = std::time::Instant::now() + timeout;
        while !is_idle() {
            if std::time::Instant::now() >= deadline {
                tracing::warn!(
                    target: "task_kernel::runtime_guard",
                    "timed out waiting for outstanding work to drain"
                );
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        match self.previous_executor.take() {
            Some(previous) => executor::set_default(previous),
            None => executor::clear_default(),
        }
        match self.previous_timer.take() {
            Some(previous) => timer::set_default(previous),
            None => timer::clear_default(),
        }
        // The default slot no longer holds this guard's executor either way
        // (restored to the previous one, or cleared); the handle taken here
        // is the only one `finalize` needs to see drop to zero once every
        // task driven by it has resolved.
        if let Some(executor) = self.executor.take() {
            executor::finalize(executor, DEFAULT_SHUTDOWN_TIMEOUT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::Invocation;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ImmediateExecutor;
    impl Executor for ImmediateExecutor {
        fn schedule_invocation(&self, invocation: Invocation) {
            invocation.invoke();
        }
    }

    #[test]
    fn installs_and_tears_down_default_executor() {
        executor::clear_default();
        {
            let _guard = RuntimeGuard::new(Arc::new(ImmediateExecutor));
            assert!(executor::default().is_some());
        }
        assert!(executor::default().is_none());
    }

    #[test]
    fn nested_guard_restores_the_previous_default_instead_of_clearing_it() {
        executor::clear_default();
        timer::clear_default();
        let outer_executor: Arc<dyn Executor> = Arc::new(ImmediateExecutor);
        let outer = RuntimeGuard::new(outer_executor.clone());
        let outer_timer = timer::default().unwrap();

        {
            let _inner = RuntimeGuard::new(Arc::new(ImmediateExecutor));
            assert!(!Arc::ptr_eq(&executor::default().unwrap(), &outer_executor));
        }

        assert!(Arc::ptr_eq(&executor::default().unwrap(), &outer_executor));
        assert!(Arc::ptr_eq(&timer::default().unwrap(), &outer_timer));

        drop(outer);
        assert!(executor::default().is_none());
        assert!(timer::default().is_none());
    }

    #[test]
    fn drain_until_idle_returns_once_condition_true() {
        executor::clear_default();
        let guard = RuntimeGuard::new(Arc::new(ImmediateExecutor));
        let done = AtomicBool::new(true);
        guard.drain_until_idle(|| done.load(Ordering::SeqCst), Duration::from_millis(50));
    }
}
