//! A coroutine-aware asynchronous task runtime.
//!
//! Layers, bottom to top:
//!
//! - [`core_task`]: the type-erased outcome+continuation node shared by
//!   every `Task`/`TaskSource` pair.
//! - [`executor`]: the `Executor` trait, `InvokeGuard`, and the
//!   process-wide executor registry (default / this-thread / invoked /
//!   by-name).
//! - [`cancellation`]: cooperative, non-erroring fan-out cancellation, plus
//!   `Expiration` (cancellation composed with a deadline).
//! - [`timer`]: delayed dispatch onto an `Executor`.
//! - [`work_queue`] / [`pool_executor`] (/ [`tokio_bridge`] with the
//!   `tokio-executor` feature): concrete `Executor` implementations.
//! - [`task`]: `Task<T>`/`TaskSource<T>`/`MultiTaskSource<T>`, plus
//!   `spawn`/`spawn_on` for driving an `async` block through an `Executor`.
//! - [`combinators`]: `when_all`, `when_any`, `wait`, `wait_result`, `run`.
//! - [`task_collection`]: a drainable bag of detached tasks.
//! - [`runtime_guard`]: RAII installation/teardown of the default executor
//!   and timer service.
//!
//! `Task<T>` implements [`std::future::Future`] directly — Rust's
//! `async`/`await` already is the coroutine mechanism this runtime's design
//! was originally built around by hand; every resumption is still scheduled
//! through an `Executor`; nothing here piggybacks on a foreign scheduler for
//! that part.
//!
//! ```
//! use task_kernel::executor::{self, Executor};
//! use task_kernel::invocation::Invocation;
//! use task_kernel::{combinators, task};
//! use std::sync::Arc;
//!
//! struct Inline;
//! impl Executor for Inline {
//!     fn schedule_invocation(&self, invocation: Invocation) {
//!         invocation.invoke();
//!     }
//! }
//! executor::set_default(Arc::new(Inline));
//!
//! let task = combinators::run(
//!     || async {
//!         let doubled = task::spawn(async { 21 * 2 }).await.unwrap();
//!         doubled
//!     },
//!     None,
//! );
//! let result = combinators::wait_result(task).unwrap();
//! assert_eq!(result, 42);
//! ```

#![warn(missing_docs)]
#![allow(clippy::type_complexity)]

pub mod cancellation;
pub mod combinators;
pub mod core_task;
pub mod error;
pub mod executor;
pub mod invocation;
pub mod pool_executor;
pub mod runtime_guard;
pub mod task;
pub mod task_collection;
pub mod timer;
#[cfg(feature = "tokio-executor")]
pub mod tokio_bridge;
pub mod work_queue;

pub use cancellation::{Cancellation, CancellationSource, Expiration, SubscriptionId};
pub use combinators::{run, wait, wait_result, when_all, when_any};
pub use core_task::Outcome;
pub use error::{Failure, FailureKind, Result, RuntimeError};
pub use executor::{Executor, InvokeGuard};
pub use pool_executor::PoolExecutor;
pub use runtime_guard::RuntimeGuard;
pub use task::{MultiTaskSource, Task, TaskSource, spawn, spawn_on, spawn_try, spawn_try_on};
pub use task_collection::TaskCollection;
pub use timer::{Timer, TimerHandle};
#[cfg(feature = "tokio-executor")]
pub use tokio_bridge::TokioExecutor;
pub use work_queue::WorkQueue;
