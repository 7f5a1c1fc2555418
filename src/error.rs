//! Error types for the task runtime.

use std::fmt;
use std::sync::Arc;

/// A polymorphic, reference-counted error carried by a rejected task.
///
/// Cloning a `Failure` is cheap (it clones the `Arc`), which matters because
/// the same error is often observed by several awaiters of a broadcast
/// outcome (see [`crate::task::MultiTaskSource`]).
#[derive(Clone)]
pub struct Failure {
    inner: Arc<FailureInner>,
}

struct FailureInner {
    message: String,
    kind: FailureKind,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Coarse classification of a [`Failure`], used by callers that want to
/// distinguish "the runtime gave up on you" from "your coroutine rejected".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Raised by user code via `reject`/an `Err` returned from a spawned
    /// coroutine.
    User,
    /// A `TaskSource` was dropped while its task was still pending.
    AbandonedSource,
    /// A `Timer::execute_after` callback fired because its timer was
    /// cancelled out from under it (typically runtime shutdown).
    TimerCancelled,
    /// An internal invariant was violated (double-resolve, missing
    /// continuation slot, ...); surfaced as an error instead of a panic so
    /// release builds degrade instead of aborting.
    Internal,
}

impl Failure {
    /// Construct a user-originated failure with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(FailureKind::User, message)
    }

    /// Construct a failure of a specific [`FailureKind`].
    pub fn with_kind(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(FailureInner {
                message: message.into(),
                kind,
                source: None,
            }),
        }
    }

    /// Wrap an existing `std::error::Error` as the source of a new failure.
    pub fn wrap(
        kind: FailureKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(FailureInner {
                message: message.into(),
                kind,
                source: Some(Box::new(source)),
            }),
        }
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// The classification of this failure.
    pub fn kind(&self) -> FailureKind {
        self.inner.kind
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("kind", &self.inner.kind)
            .field("message", &self.inner.message)
            .finish()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.message)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Runtime-level errors (executor registry, timer service, work queue
/// lifecycle) distinct from task-carried [`Failure`]s.
#[derive(Debug)]
pub enum RuntimeError {
    /// No default executor has been installed.
    NoDefaultExecutor,
    /// A named executor lookup found nothing registered under that name.
    ExecutorNotFound(String),
    /// The global timer service has not been installed.
    NoTimerInstance,
    /// The timer handle is unknown (already fired or never existed).
    InvalidTimerHandle,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDefaultExecutor => write!(f, "no default executor has been installed"),
            Self::ExecutorNotFound(name) => write!(f, "no executor registered under name {name:?}"),
            Self::NoTimerInstance => write!(f, "no timer service instance has been installed"),
            Self::InvalidTimerHandle => write!(f, "invalid or expired timer handle"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Result alias for runtime-level (non-task) operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
