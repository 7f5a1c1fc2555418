//! Cooperative cancellation: a fan-out signal subscribers can observe
//! without the source ever rejecting a task itself.
//!
//! Grounded on the teacher crate's `CancellationToken`
//! (`AtomicBool` + a waiter list woken on `cancel()`), generalized from a
//! single condvar-wait primitive into the subscriber-callback list spec §4.3
//! requires (subscribe/unsubscribe while firing must be safe). The
//! subscriber bookkeeping borrows `signal.rs`'s `slotmap`-keyed connection
//! list idea so an unsubscribe during `cancel()` can't invalidate the
//! in-progress iteration. [`Expiration`] composes a [`Cancellation`] with an
//! optional timeout, racing against [`crate::timer::Timer`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::invocation::Invocation;

new_key_type! {
    /// Handle returned by [`Cancellation::subscribe`], used to
    /// [`Cancellation::unsubscribe`].
    pub struct SubscriptionId;
}

struct State {
    cancelled: AtomicBool,
    subscribers: Mutex<SlotMap<SubscriptionId, Box<dyn FnMut() + Send>>>,
}

/// The producer half: triggers cancellation for every [`Cancellation`]
/// derived from it.
#[derive(Clone)]
pub struct CancellationSource {
    state: Arc<State>,
}

impl CancellationSource {
    /// Create a source with no subscribers, not yet cancelled.
    pub fn new() -> Self {
        Self {
            state: Arc::new(State {
                cancelled: AtomicBool::new(false),
                subscribers: Mutex::new(SlotMap::with_key()),
            }),
        }
    }

    /// Request cancellation. Idempotent: subscribers fire exactly once
    /// across any number of calls. A callback unsubscribing another
    /// not-yet-called subscriber prevents that subscriber from firing.
    #[tracing::instrument(skip(self), target = "task_kernel::cancellation", level = "trace")]
    pub fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        // Snapshot the keys, then remove-and-call one at a time so a
        // callback that unsubscribes another not-yet-called subscriber
        // actually prevents it from firing, instead of just racing a
        // pre-drained copy of the closure.
        let ids: Vec<SubscriptionId> = self.state.subscribers.lock().keys().collect();
        for id in ids {
            let callback = self.state.subscribers.lock().remove(id);
            if let Some(mut callback) = callback {
                callback();
            }
        }
    }

    /// Derive a consumer-side handle to this source's cancellation state.
    pub fn token(&self) -> Cancellation {
        Cancellation { state: self.state.clone() }
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// The consumer half: a cheaply-cloneable handle that code can poll or
/// subscribe to.
#[derive(Clone)]
pub struct Cancellation {
    state: Arc<State>,
}

impl Cancellation {
    /// A token that never cancels, for call sites that need a `Cancellation`
    /// but have nothing to cancel against.
    pub fn none() -> Self {
        CancellationSource::new().token()
    }

    /// `true` once [`CancellationSource::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Register `callback` to run (synchronously, on whatever thread calls
    /// `cancel()`) when cancellation fires. If already cancelled, runs
    /// `callback` immediately and returns a no-op subscription.
    pub fn subscribe<F>(&self, mut callback: F) -> SubscriptionId
    where
        F: FnMut() + Send + 'static,
    {
        if self.is_cancelled() {
            callback();
            return self.state.subscribers.lock().insert(Box::new(|| {}));
        }
        self.state.subscribers.lock().insert(Box::new(callback))
    }

    /// Remove a subscription registered via [`subscribe`]. Safe to call
    /// during the subscriber's own callback or any other subscriber's.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.state.subscribers.lock().remove(id);
    }

    /// Number of live subscriptions, for diagnostics.
    pub fn subscriber_count(&self) -> usize {
        self.state.subscribers.lock().len()
    }
}

/// A [`Cancellation`] optionally paired with a deadline, used by awaiters
/// that should stop waiting either because they were explicitly cancelled
/// or because a timeout elapsed — spec's "Expiration" concept, which races a
/// source cancellation against a single timer registered with
/// [`crate::timer`]'s default instance. `Expiration::cancellation()` returns
/// a signal that fires on whichever of the two wins, so subscribers don't
/// need to know which one actually happened.
#[derive(Clone)]
pub struct Expiration {
    combined: Cancellation,
    deadline: Option<Duration>,
}

impl Expiration {
    /// Pair a cancellation token with an optional deadline. If `deadline` is
    /// set, registers a one-shot timer with [`crate::timer::default`] (routed
    /// through [`crate::executor::current`]) that cancels this expiration's
    /// combined signal when it fires. If either service isn't installed, the
    /// deadline is logged and simply never fires — cancellation still works.
    pub fn new(cancellation: Cancellation, deadline: Option<Duration>) -> Self {
        let combined_source = CancellationSource::new();
        let combined = combined_source.token();

        let relay_source = combined_source.clone();
        cancellation.subscribe(move || relay_source.cancel());

        if let Some(delay) = deadline {
            match (crate::timer::default(), crate::executor::current()) {
                (Some(timer), Some(executor)) => {
                    let timeout_source = combined_source.clone();
                    timer.execute_after(
                        delay,
                        executor,
                        Invocation::from_fn(move || timeout_source.cancel()),
                        |_failure| {
                            // The scheduled timeout itself was cancelled
                            // (timer service shutting down); the combined
                            // signal only fires via the other race leg now.
                        },
                    );
                }
                _ => {
                    tracing::warn!(
                        target: "task_kernel::cancellation",
                        "Expiration deadline set with no default Timer/Executor installed; it will never fire"
                    );
                }
            }
        }

        Self { combined, deadline }
    }

    /// An expiration that never fires — a `Cancellation` that never cancels
    /// and no deadline.
    pub fn never() -> Self {
        Self::new(Cancellation::none(), None)
    }

    /// The composed signal: fires once either the source cancellation or the
    /// deadline elapses, whichever comes first.
    pub fn cancellation(&self) -> &Cancellation {
        &self.combined
    }

    /// The deadline this expiration races against, if any.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// `true` once either race leg has fired.
    pub fn is_cancelled(&self) -> bool {
        self.combined.is_cancelled()
    }

    /// Alias for [`is_cancelled`](Self::is_cancelled), matching the
    /// original's `isExpired`.
    pub fn is_expired(&self) -> bool {
        self.is_cancelled()
    }

    /// Subscribe to the composed signal directly, without going through
    /// [`cancellation`](Self::cancellation).
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnMut() + Send + 'static,
    {
        self.combined.subscribe(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AOrdering};

    #[test]
    fn cancel_is_idempotent_and_fires_subscribers_once() {
        let source = CancellationSource::new();
        let token = source.token();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        token.subscribe(move || {
            count2.fetch_add(1, AOrdering::SeqCst);
        });
        source.cancel();
        source.cancel();
        assert_eq!(count.load(AOrdering::SeqCst), 1);
        assert!(token.is_cancelled());
    }

    #[test]
    fn subscribe_after_cancel_fires_immediately() {
        let source = CancellationSource::new();
        let token = source.token();
        source.cancel();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        token.subscribe(move || {
            count2.fetch_add(1, AOrdering::SeqCst);
        });
        assert_eq!(count.load(AOrdering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_during_fire_is_safe() {
        let source = CancellationSource::new();
        let token = source.token();
        let token2 = token.clone();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        // Subscriber A unsubscribes subscriber B while firing.
        let b_id = Arc::new(Mutex::new(None));
        let b_id2 = b_id.clone();
        token.subscribe(move || {
            if let Some(id) = *b_id2.lock() {
                token2.unsubscribe(id);
            }
        });
        let id = token.subscribe(move || {
            fired2.fetch_add(1, AOrdering::SeqCst);
        });
        *b_id.lock() = Some(id);
        source.cancel();
        assert_eq!(fired.load(AOrdering::SeqCst), 0);
    }

    #[test]
    fn none_token_never_cancels() {
        let token = Cancellation::none();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn expiration_tracks_deadline_and_cancellation() {
        let source = CancellationSource::new();
        let exp = Expiration::new(source.token(), Some(Duration::from_millis(50)));
        assert!(!exp.is_cancelled());
        assert_eq!(exp.deadline(), Some(Duration::from_millis(50)));
        source.cancel();
        assert!(exp.is_cancelled());
    }

    struct Inline;
    impl crate::executor::Executor for Inline {
        fn schedule_invocation(&self, invocation: Invocation) {
            invocation.invoke();
        }
    }

    #[test]
    fn expiration_deadline_fires_through_the_default_timer_when_never_cancelled() {
        crate::executor::set_default(Arc::new(Inline));
        crate::timer::set_default(Arc::new(crate::timer::Timer::new()));

        let never_cancels = Cancellation::none();
        let exp = Expiration::new(never_cancels, Some(Duration::from_millis(10)));
        assert!(!exp.is_expired());
        std::thread::sleep(Duration::from_millis(100));
        assert!(exp.is_expired());

        crate::timer::clear_default();
        crate::executor::clear_default();
    }

    #[test]
    fn expiration_cancel_wins_when_it_fires_before_the_deadline() {
        crate::executor::set_default(Arc::new(Inline));
        crate::timer::set_default(Arc::new(crate::timer::Timer::new()));

        let source = CancellationSource::new();
        let exp = Expiration::new(source.token(), Some(Duration::from_secs(30)));
        source.cancel();
        assert!(exp.is_expired());

        crate::timer::clear_default();
        crate::executor::clear_default();
    }
}
