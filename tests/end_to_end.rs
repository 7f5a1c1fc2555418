//! End-to-end scenarios spanning several layers of the runtime at once,
//! rather than one module in isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use task_kernel::cancellation::{CancellationSource, Expiration};
use task_kernel::error::FailureKind;
use task_kernel::executor::{self, Executor};
use task_kernel::invocation::Invocation;
use task_kernel::timer::Timer;
use task_kernel::work_queue::WorkQueue;
use task_kernel::{combinators, task};

struct Inline;
impl Executor for Inline {
    fn schedule_invocation(&self, invocation: Invocation) {
        invocation.invoke();
    }
}

fn install_inline_executor() {
    executor::set_default(Arc::new(Inline));
}

/// Also installs a default timer service, for scenarios that need
/// `Expiration` deadlines to actually fire.
fn install_inline_runtime() {
    install_inline_executor();
    task_kernel::timer::set_default(Arc::new(Timer::new()));
}

/// Scenario 1: a `TaskSource` resolved before its `Task` is ever awaited
/// hands back the value immediately, with no error.
#[test]
fn simple_resolve() {
    install_inline_executor();
    let mut source = task::TaskSource::new();
    source.resolve(10);
    let t = source.get_task();
    assert!(t.is_ready());
    assert_eq!(combinators::wait_result(t).unwrap(), 10);
}

/// Scenario 2: an inner task rejects after a real delay; the outer task
/// awaiting it (without `try_result`) rejects with the same message, and
/// nothing past the failed await runs.
#[test]
fn error_propagates_through_nesting() {
    install_inline_executor();

    let ran_past_await = Arc::new(AtomicUsize::new(0));
    let ran_past_await2 = ran_past_await.clone();

    let outer = task::spawn_try(async move {
        let inner = task::spawn_try(async {
            tokio_free_sleep(Duration::from_millis(5));
            Err::<i32, _>(task_kernel::error::Failure::new("ErrorChainTest"))
        });
        let value = inner.await?;
        ran_past_await2.fetch_add(1, Ordering::SeqCst);
        Ok::<_, task_kernel::error::Failure>(value)
    });

    let outcome = combinators::wait_result(outer);
    let failure = outcome.expect_err("outer task must reject");
    assert_eq!(failure.message(), "ErrorChainTest");
    assert_eq!(ran_past_await.load(Ordering::SeqCst), 0);
}

/// Scenario 3: the same rejecting inner task, but the outer uses
/// `try_result` (this crate's `doTry` equivalent) and keeps running.
#[test]
fn try_result_converts_rejection_to_a_value() {
    install_inline_executor();

    let outer = task::spawn(async {
        let inner = task::spawn_try(async {
            tokio_free_sleep(Duration::from_millis(5));
            Err::<i32, _>(task_kernel::error::Failure::new("ErrorChainTest"))
        });
        let observed = inner.try_result().await;
        // The statement after the await does run.
        observed.is_err()
    });

    assert!(combinators::wait_result(outer).unwrap());
}

/// Scenario 4: ten producer threads each push 10,000 no-op invocations
/// through a barrier; a single polling thread drains until the counter
/// reaches the expected total. No push is lost.
#[test]
fn work_queue_multithread_throughput() {
    let queue = WorkQueue::new("throughput");
    let counter = Arc::new(AtomicUsize::new(0));
    const PRODUCERS: usize = 10;
    const PER_PRODUCER: usize = 10_000;
    let barrier = Arc::new(Barrier::new(PRODUCERS + 1));

    std::thread::scope(|scope| {
        for _ in 0..PRODUCERS {
            let queue = queue.clone();
            let counter = counter.clone();
            let barrier = barrier.clone();
            scope.spawn(move || {
                barrier.wait();
                for _ in 0..PER_PRODUCER {
                    let counter = counter.clone();
                    queue.schedule_invocation(Invocation::from_fn(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }));
                }
            });
        }
        barrier.wait();
        let expected = PRODUCERS * PER_PRODUCER;
        loop {
            queue.poll();
            if counter.load(Ordering::SeqCst) == expected {
                break;
            }
            queue.wait_for_work(Duration::from_millis(50));
        }
    });

    assert_eq!(counter.load(Ordering::SeqCst), PRODUCERS * PER_PRODUCER);
}

/// Scenario 5: repeatedly race `when_any` over several `TaskSource`s against
/// a resolver that fires them all after a short delay. Every iteration must
/// complete within a bounded timeout, resolving `true`.
#[test]
fn when_any_completes_under_repeated_races() {
    install_inline_executor();

    for _ in 0..500 {
        let mut sources: Vec<task::TaskSource<usize>> = (0..4).map(|_| task::TaskSource::new()).collect();
        let tasks: Vec<task::Task<usize>> = sources.iter_mut().map(|s| s.get_task()).collect();

        let resolver = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_micros(200));
            for (i, source) in sources.iter().enumerate() {
                source.resolve(i);
            }
        });

        let winner = combinators::when_any(tasks, Expiration::never());
        assert!(combinators::wait_result(winner).unwrap());
        resolver.join().unwrap();
    }
}

/// Scenario 6: an `Expiration` built from a cancellation source and a
/// deadline fires its subscriber exactly once whether it's the cancel or
/// the timer that wins the race, with `is_expired` reflecting whichever
/// path actually fired.
#[test]
fn expiration_cancellation_wins_the_race_before_the_deadline() {
    install_inline_runtime();

    let source = CancellationSource::new();
    let expiration = Expiration::new(source.token(), Some(Duration::from_millis(50)));
    let fired = Arc::new(AtomicUsize::new(0));
    let fired2 = fired.clone();
    expiration.subscribe(move || {
        fired2.fetch_add(1, Ordering::SeqCst);
    });

    std::thread::sleep(Duration::from_millis(5));
    source.cancel();
    std::thread::sleep(Duration::from_millis(20));

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(expiration.is_expired());
}

/// Scenario 6b: the same race, but the source is never cancelled — the
/// timer is what actually fires the combined signal.
#[test]
fn expiration_timeout_wins_the_race_when_never_cancelled() {
    install_inline_runtime();

    let source = CancellationSource::new();
    let expiration = Expiration::new(source.token(), Some(Duration::from_millis(10)));
    let fired = Arc::new(AtomicUsize::new(0));
    let fired2 = fired.clone();
    expiration.subscribe(move || {
        fired2.fetch_add(1, Ordering::SeqCst);
    });

    std::thread::sleep(Duration::from_millis(150));

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(expiration.is_expired());
    assert!(!source.token().is_cancelled());
}

/// A `TaskSource` dropped while its paired `Task` is still pending rejects
/// it with `AbandonedSource`, so an awaiter never hangs forever.
#[test]
fn abandoned_source_rejects_its_task() {
    install_inline_executor();
    let mut source = task::TaskSource::<i32>::new();
    let t = source.get_task();
    drop(source);

    let failure = combinators::wait_result(t).unwrap_err();
    assert_eq!(failure.kind(), FailureKind::AbandonedSource);
}

fn tokio_free_sleep(duration: Duration) {
    std::thread::sleep(duration);
}
