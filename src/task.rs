//! Typed `Task<T>`/`TaskSource<T>` handles over a [`crate::core_task::CoreTask`],
//! plus the broadcast variant `MultiTaskSource<T>`.
//!
//! Grounded on `TaskBase<T>`/`Task<T>`/`TaskSource<T>` in
//! `original_source/engine/core/kernel/include/nau/async/task_base.h` and the
//! `CoreTaskLinkedList` broadcast helper in
//! `original_source/engine/core/kernel/include/nau/async/core/core_task_linked_list.h`.
//! `Task<T>` implements [`std::future::Future`] directly: Rust's `async`/await
//! already is the coroutine mechanism the C++ source builds by hand.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;

use crate::core_task::{CoreTask, Outcome};
use crate::error::Failure;
use crate::executor;

/// The consumer half of a task: a one-shot, awaitable handle to a future
/// value or [`Failure`].
///
/// Exactly one `Task` exists per [`TaskSource`] (enforced by
/// [`CoreTask::mark_task_taken`]). Dropping a `Task` whose source has not
/// resolved is allowed — nothing asserts on the consumer side, matching the
/// original's handling of discarded `Task<T>` instances — but a `TaskSource`
/// dropped while its `Task` is still unresolved rejects it with
/// [`crate::error::FailureKind::AbandonedSource`].
pub struct Task<T> {
    core: CoreTask<T>,
    detached: bool,
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("ready", &self.core.is_ready()).finish()
    }
}

impl<T: Send + 'static> Task<T> {
    pub(crate) fn from_core(core: CoreTask<T>) -> Self {
        Self { core, detached: false }
    }

    /// The underlying [`CoreTask`] node, for combinators that need direct
    /// access to `poll_take`/`try_take`/`set_ready_callback` without going
    /// through the `Future` impl.
    pub(crate) fn core(&self) -> &CoreTask<T> {
        &self.core
    }

    /// Construct an already-resolved task. Grounded on `Task<T>::makeResolved`.
    pub fn resolved(value: T) -> Self {
        let core = CoreTask::new();
        core.resolve(Ok(value));
        Self::from_core(core)
    }

    /// Construct an already-rejected task. Grounded on `Task<T>::makeRejected`.
    pub fn rejected(failure: Failure) -> Self {
        let core = CoreTask::new();
        core.resolve(Err(failure));
        Self::from_core(core)
    }

    /// `true` once the task has resolved or rejected.
    pub fn is_ready(&self) -> bool {
        self.core.is_ready()
    }

    /// Suppress the "unfinished task dropped" diagnostic for fire-and-forget
    /// tasks. Grounded on `Task<T>::detach()`.
    pub fn detach(mut self) {
        self.detached = true;
        let core = self.core.clone();
        executor::current()
            .unwrap_or_else(|| panic!("Task::detach() with no current executor installed"))
            .execute_fn(move || {
                let waker = std::task::Waker::noop().clone();
                // Drain the outcome so a late resolve on an executor thread
                // doesn't log a false "polled after being taken" warning;
                // the value itself is discarded, this is fire-and-forget.
                let _ = core.poll_take(&waker);
            });
    }

    /// Convert rejection into an `Err` instead of propagating a poll-time
    /// panic; used by callers that want `Result<T, Failure>` without
    /// `.await`'s implicit propagation. Grounded on `Task<T>::doTry()`.
    pub async fn try_result(self) -> Outcome<T> {
        self.await
    }
}

impl<T: Send + 'static> Future for Task<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.core.poll_take(cx.waker()) {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if self.detached || self.core.is_ready() {
            return;
        }
        tracing::warn!(
            target: "task_kernel::task",
            "Task<T> dropped while still pending and not detached"
        );
    }
}

/// The producer half of a task. Resolves or rejects the paired [`Task`]
/// exactly once.
pub struct TaskSource<T> {
    core: CoreTask<T>,
    task_given: bool,
}

impl<T: Send + 'static> TaskSource<T> {
    /// Create a new, unresolved source with no `Task` handed out yet.
    pub fn new() -> Self {
        Self {
            core: CoreTask::new(),
            task_given: false,
        }
    }

    /// Produce the one [`Task`] paired with this source. Panics if called
    /// twice, matching `TaskSourceBase::getTask()`.
    pub fn get_task(&mut self) -> Task<T> {
        self.core.mark_task_taken();
        self.task_given = true;
        Task::from_core(self.core.clone())
    }

    /// Resolve the paired task with a value.
    pub fn resolve(&self, value: T) {
        self.core.resolve(Ok(value));
    }

    /// Reject the paired task with a failure.
    pub fn reject(&self, failure: Failure) {
        self.core.resolve(Err(failure));
    }
}

impl<T: Send + 'static> Default for TaskSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for TaskSource<T> {
    fn drop(&mut self) {
        if !self.task_given || self.core.is_ready() {
            return;
        }
        // The paired Task is still pending and will never resolve: reject it
        // so an awaiting coroutine doesn't hang forever.
        self.core.resolve(Err(Failure::with_kind(
            crate::error::FailureKind::AbandonedSource,
            "TaskSource dropped while its Task was still pending",
        )));
    }
}

/// Broadcast variant of [`TaskSource`]: each call to [`get_next_task`] hands
/// out a fresh [`Task`] that resolves on the *next* emission, rather than a
/// single fixed outcome. Grounded on `CoreTaskLinkedList`, which the original
/// keeps as an intrusive linked list of waiting `CoreTask` nodes threaded
/// through each broadcast emission.
pub struct MultiTaskSource<T> {
    inner: Arc<Mutex<MultiInner<T>>>,
}

struct MultiInner<T> {
    waiting: Vec<CoreTask<T>>,
    auto_reset_on_ready: bool,
    /// The most recent emission, held so a late `get_next_task()` can
    /// resolve immediately when `auto_reset_on_ready` is set. Consumed
    /// (cleared) the first time it is handed out.
    last_value: Option<T>,
}

impl<T: Clone + Send + 'static> MultiTaskSource<T> {
    /// Create a source with no pending emission and `auto_reset_on_ready`
    /// enabled.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MultiInner {
                waiting: Vec::new(),
                auto_reset_on_ready: true,
                last_value: None,
            })),
        }
    }

    /// When `true` (the default), a task handed out by [`get_next_task`]
    /// after an emission already occurred resolves immediately with that
    /// last value rather than waiting for the next one; the remembered
    /// value is then cleared. When `false`, every task only ever resolves
    /// against emissions that happen after it was requested.
    pub fn set_auto_reset_on_ready(&self, value: bool) {
        self.inner.lock().auto_reset_on_ready = value;
    }

    /// Hand out a task that resolves the next time [`emit`]/[`reject_all`]
    /// is called, or immediately if a value is already waiting and
    /// `auto_reset_on_ready` is set.
    pub fn get_next_task(&self) -> Task<T> {
        let mut inner = self.inner.lock();
        if inner.auto_reset_on_ready
            && let Some(value) = inner.last_value.take() {
                let core = CoreTask::new();
                core.resolve(Ok(value));
                return Task::from_core(core);
            }
        let core = CoreTask::new();
        inner.waiting.push(core.clone());
        Task::from_core(core)
    }

    /// Resolve every outstanding task from [`get_next_task`] with `value`.
    pub fn emit(&self, value: T) {
        let mut inner = self.inner.lock();
        let waiting = std::mem::take(&mut inner.waiting);
        if inner.auto_reset_on_ready {
            inner.last_value = Some(value.clone());
        }
        drop(inner);
        for core in waiting {
            core.resolve(Ok(value.clone()));
        }
    }

    /// Reject every outstanding task with `failure`.
    pub fn reject_all(&self, failure: Failure) {
        let waiting = std::mem::take(&mut self.inner.lock().waiting);
        for core in waiting {
            core.resolve(Err(failure.clone()));
        }
    }

    /// Number of tasks waiting on the next emission.
    pub fn waiting_count(&self) -> usize {
        self.inner.lock().waiting.len()
    }
}

impl<T: Clone + Send + 'static> Default for MultiTaskSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for MultiTaskSource<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

/// Spawn an async block onto the executor returned by [`executor::current`],
/// returning a [`Task`] for its result. Grounded on how the original's
/// coroutine promise schedules its first resumption via
/// `Executor::invoked()`/`Executor::getDefault()`.
pub fn spawn<F, T>(future: F) -> Task<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let exec = executor::current().expect("task::spawn() with no current executor installed");
    spawn_on(exec, future)
}

/// Spawn an async block onto a specific executor.
pub fn spawn_on<F, T>(exec: Arc<dyn executor::Executor>, future: F) -> Task<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let core = CoreTask::new();
    let task = Task::from_core(core.clone());
    let driver = Arc::new(TaskDriver {
        future: Mutex::new(Some(Box::pin(future))),
        core,
        executor: exec.clone(),
    });
    schedule_driver(driver);
    task
}

struct TaskDriver<T> {
    future: Mutex<Option<Pin<Box<dyn Future<Output = T> + Send>>>>,
    core: CoreTask<T>,
    executor: Arc<dyn executor::Executor>,
}

fn schedule_driver<T: Send + 'static>(driver: Arc<TaskDriver<T>>) {
    reschedule(driver);
}

/// Re-enqueue a drive of `driver` onto its own executor rather than running
/// it inline. Every resumption — the first poll and every subsequent wake —
/// goes through this same path, so a task driven on executor `A` is only
/// ever polled while `A` is dispatching, no matter which thread observed it
/// become ready.
fn reschedule<T: Send + 'static>(driver: Arc<TaskDriver<T>>) {
    let executor = driver.executor.clone();
    executor.execute_fn(move || drive(driver));
}

fn make_waker<T: Send + 'static>(driver: Arc<TaskDriver<T>>) -> std::task::Waker {
    use std::task::{RawWaker, RawWakerVTable, Waker};

    fn clone_fn<T: Send + 'static>(ptr: *const ()) -> RawWaker {
        let arc = unsafe { Arc::from_raw(ptr as *const TaskDriver<T>) };
        let cloned = arc.clone();
        std::mem::forget(arc);
        RawWaker::new(Arc::into_raw(cloned) as *const (), vtable::<T>())
    }
    fn wake_fn<T: Send + 'static>(ptr: *const ()) {
        let driver = unsafe { Arc::from_raw(ptr as *const TaskDriver<T>) };
        reschedule(driver);
    }
    fn wake_by_ref_fn<T: Send + 'static>(ptr: *const ()) {
        let arc = unsafe { Arc::from_raw(ptr as *const TaskDriver<T>) };
        let cloned = arc.clone();
        std::mem::forget(arc);
        reschedule(cloned);
    }
    fn drop_fn<T: Send + 'static>(ptr: *const ()) {
        unsafe { drop(Arc::from_raw(ptr as *const TaskDriver<T>)) };
    }
    fn vtable<T: Send + 'static>() -> &'static RawWakerVTable {
        &RawWakerVTable::new(clone_fn::<T>, wake_fn::<T>, wake_by_ref_fn::<T>, drop_fn::<T>)
    }

    let raw = RawWaker::new(Arc::into_raw(driver) as *const (), vtable::<T>());
    unsafe { Waker::from_raw(raw) }
}

fn drive<T: Send + 'static>(driver: Arc<TaskDriver<T>>) {
    let waker = make_waker(driver.clone());
    let mut cx = Context::from_waker(&waker);
    let mut slot = driver.future.lock();
    let Some(future) = slot.as_mut() else { return };
    match future.as_mut().poll(&mut cx) {
        Poll::Ready(value) => {
            *slot = None;
            drop(slot);
            driver.core.resolve(Ok(value));
        }
        Poll::Pending => {}
    }
}

/// Spawn an async block whose body returns `Result<T, Failure>`, the way the
/// original's coroutine promise resolves or rejects the enclosing task
/// depending on `co_return value | Error | Result<T>` (§4.6). Unlike
/// [`spawn`], an `Err` produced by the body — including one propagated with
/// `?` from an awaited, rejected [`Task`] — rejects the returned `Task`
/// itself rather than resolving it with an `Err` payload.
pub fn spawn_try<F, T>(future: F) -> Task<T>
where
    F: Future<Output = Outcome<T>> + Send + 'static,
    T: Send + 'static,
{
    let exec = executor::current().expect("task::spawn_try() with no current executor installed");
    spawn_try_on(exec, future)
}

/// Spawn a fallible async block onto a specific executor. See [`spawn_try`].
pub fn spawn_try_on<F, T>(exec: Arc<dyn executor::Executor>, future: F) -> Task<T>
where
    F: Future<Output = Outcome<T>> + Send + 'static,
    T: Send + 'static,
{
    let core = CoreTask::new();
    let task = Task::from_core(core.clone());
    let driver = Arc::new(TaskDriverTry {
        future: Mutex::new(Some(Box::pin(future))),
        core,
        executor: exec.clone(),
    });
    schedule_try_driver(driver);
    task
}

struct TaskDriverTry<T> {
    future: Mutex<Option<Pin<Box<dyn Future<Output = Outcome<T>> + Send>>>>,
    core: CoreTask<T>,
    executor: Arc<dyn executor::Executor>,
}

fn schedule_try_driver<T: Send + 'static>(driver: Arc<TaskDriverTry<T>>) {
    reschedule_try(driver);
}

/// See [`reschedule`]: the `spawn_try` counterpart, re-enqueued through
/// `driver.executor` rather than driven in place.
fn reschedule_try<T: Send + 'static>(driver: Arc<TaskDriverTry<T>>) {
    let executor = driver.executor.clone();
    executor.execute_fn(move || drive_try(driver));
}

fn make_try_waker<T: Send + 'static>(driver: Arc<TaskDriverTry<T>>) -> std::task::Waker {
    use std::task::{RawWaker, RawWakerVTable, Waker};

    fn clone_fn<T: Send + 'static>(ptr: *const ()) -> RawWaker {
        let arc = unsafe { Arc::from_raw(ptr as *const TaskDriverTry<T>) };
        let cloned = arc.clone();
        std::mem::forget(arc);
        RawWaker::new(Arc::into_raw(cloned) as *const (), vtable::<T>())
    }
    fn wake_fn<T: Send + 'static>(ptr: *const ()) {
        let driver = unsafe { Arc::from_raw(ptr as *const TaskDriverTry<T>) };
        reschedule_try(driver);
    }
    fn wake_by_ref_fn<T: Send + 'static>(ptr: *const ()) {
        let arc = unsafe { Arc::from_raw(ptr as *const TaskDriverTry<T>) };
        let cloned = arc.clone();
        std::mem::forget(arc);
        reschedule_try(cloned);
    }
    fn drop_fn<T: Send + 'static>(ptr: *const ()) {
        unsafe { drop(Arc::from_raw(ptr as *const TaskDriverTry<T>)) };
    }
    fn vtable<T: Send + 'static>() -> &'static RawWakerVTable {
        &RawWakerVTable::new(clone_fn::<T>, wake_fn::<T>, wake_by_ref_fn::<T>, drop_fn::<T>)
    }

    let raw = RawWaker::new(Arc::into_raw(driver) as *const (), vtable::<T>());
    unsafe { Waker::from_raw(raw) }
}

fn drive_try<T: Send + 'static>(driver: Arc<TaskDriverTry<T>>) {
    let waker = make_try_waker(driver.clone());
    let mut cx = Context::from_waker(&waker);
    let mut slot = driver.future.lock();
    let Some(future) = slot.as_mut() else { return };
    match future.as_mut().poll(&mut cx) {
        Poll::Ready(outcome) => {
            *slot = None;
            drop(slot);
            driver.core.resolve(outcome);
        }
        Poll::Pending => {}
    }
}
