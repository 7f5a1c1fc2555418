//! Free functions combining several [`crate::Task`]s into one: `when_all`,
//! `when_any`, the synchronous `wait`/`wait_result` pair, and `run`.
//!
//! Grounded on the signatures declared in
//! `original_source/engine/core/kernel/include/nau/async/task.h`: `wait`/
//! `waitResult` are synchronous, non-coroutine functions that block the
//! calling thread; `whenAll`/`whenAny` return `Task<bool>` and race against
//! an [`crate::cancellation::Expiration`]; `run` is itself a coroutine that
//! hops onto an executor before producing its result as a `Task<R>`. The
//! blocking half (`wait`/`wait_result`) is grounded on the teacher crate's
//! `AsyncTaskHandle::blocking_wait` (condvar-backed park/wake), generalized
//! from waiting on a `tokio::task::JoinHandle` to waiting on a
//! [`crate::core_task::CoreTask`] ready callback.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cancellation::Expiration;
use crate::core_task::Outcome;
use crate::executor::{self, Executor};
use crate::task::Task;

/// Block the calling thread until `task` settles or `timeout` elapses.
/// Returns `true` if `task` is ready by the time this call returns —
/// returns immediately, without blocking, if it already was. Grounded on
/// `wait<T>(Task<T>&, timeout)` in `original_source`.
pub fn wait<T: Send + 'static>(task: &mut Task<T>, timeout: Option<Duration>) -> bool {
    if task.is_ready() {
        return true;
    }

    struct Parker {
        ready: Mutex<bool>,
        condvar: Condvar,
    }

    let parker = Arc::new(Parker {
        ready: Mutex::new(false),
        condvar: Condvar::new(),
    });
    let parker2 = parker.clone();
    task.core().set_ready_callback(move || {
        let mut ready = parker2.ready.lock();
        *ready = true;
        parker2.condvar.notify_all();
    });

    let mut ready = parker.ready.lock();
    match timeout {
        Some(timeout) => {
            let deadline = Instant::now() + timeout;
            while !*ready {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                let result = parker.condvar.wait_for(&mut ready, remaining);
                if result.timed_out() {
                    break;
                }
            }
        }
        None => {
            while !*ready {
                parker.condvar.wait(&mut ready);
            }
        }
    }
    drop(ready);
    task.is_ready()
}

/// `wait()` with no timeout, followed by taking the settled outcome.
/// Grounded on `waitResult(Task<T>)` in `original_source`, which is exactly
/// `wait()` plus `asResult()`.
pub fn wait_result<T: Send + 'static>(mut task: Task<T>) -> Outcome<T> {
    wait(&mut task, None);
    task.core()
        .try_take()
        .expect("wait() with no timeout returned with the task still pending")
}

/// Await every task in `tasks` concurrently, completing `true` once all of
/// them have settled, or `false` if `expiration` fires first. An empty
/// `tasks` resolves immediately with `true`. Grounded on
/// `whenAll(Container&, Expiration)` in `original_source`.
pub fn when_all<T: Send + 'static>(tasks: Vec<Task<T>>, expiration: Expiration) -> Task<bool> {
    crate::task::spawn(WhenAll {
        tasks,
        expiration,
        subscribed: false,
    })
}

struct WhenAll<T> {
    tasks: Vec<Task<T>>,
    expiration: Expiration,
    subscribed: bool,
}

impl<T: Send + 'static> Future for WhenAll<T> {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        let this = self.get_mut();
        if this.expiration.is_expired() {
            return Poll::Ready(false);
        }

        this.tasks.retain_mut(|task| {
            if task.is_ready() {
                // Drain the outcome so a ready task's `Drop` doesn't log a
                // spurious "still pending" warning; `when_all` only reports
                // completion, not individual outcomes.
                let waker = std::task::Waker::noop().clone();
                let _ = task.core().poll_take(&waker);
                false
            } else {
                Pin::new(task).poll(cx).is_pending()
            }
        });

        if this.tasks.is_empty() {
            return Poll::Ready(true);
        }

        subscribe_once(&mut this.subscribed, &this.expiration, cx);
        Poll::Pending
    }
}

/// Await `tasks` concurrently, completing `true` as soon as any one of them
/// settles, or `false` if `expiration` fires first. The tasks that didn't
/// win are left to resolve in the background; `when_any` only observes
/// outcomes and has no authority to cancel work it didn't create. Grounded
/// on `whenAny(Container&, Expiration)` in `original_source`.
pub fn when_any<T: Send + 'static>(tasks: Vec<Task<T>>, expiration: Expiration) -> Task<bool> {
    crate::task::spawn(WhenAny {
        tasks: tasks.into_iter().map(Some).collect(),
        expiration,
        subscribed: false,
    })
}

struct WhenAny<T> {
    tasks: Vec<Option<Task<T>>>,
    expiration: Expiration,
    subscribed: bool,
}

impl<T: Send + 'static> Future for WhenAny<T> {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        let this = self.get_mut();
        if this.expiration.is_expired() {
            return Poll::Ready(false);
        }

        if this.tasks.is_empty() {
            return Poll::Ready(false);
        }

        for slot in this.tasks.iter_mut() {
            if let Some(task) = slot
                && let Poll::Ready(_) = Pin::new(task).poll(cx)
            {
                *slot = None;
                return Poll::Ready(true);
            }
        }

        subscribe_once(&mut this.subscribed, &this.expiration, cx);
        Poll::Pending
    }
}

/// Subscribe `cx`'s waker to `expiration` exactly once per combinator
/// instance, so a later expiration wakes a combinator future that's only
/// waiting on the race, not on any individual task.
fn subscribe_once(subscribed: &mut bool, expiration: &Expiration, cx: &Context<'_>) {
    if *subscribed {
        return;
    }
    *subscribed = true;
    let waker = cx.waker().clone();
    expiration.subscribe(move || waker.wake_by_ref());
}

/// Spawn `operation` onto `executor` (or the caller's current executor if
/// `None`), returning a [`Task`] for its result. Grounded on
/// `run(fn, executor, args...)` in `original_source`, itself a coroutine
/// that `co_await`s the executor before invoking `operation` and forwards
/// its result as a `Task<R>`.
pub fn run<F, Fut, R>(operation: F, executor: Option<Arc<dyn Executor>>) -> Task<R>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    let executor = executor
        .or_else(executor::current)
        .expect("combinators::run() with no executor given and none installed");
    crate::task::spawn_on(executor, async move { operation().await })
}
