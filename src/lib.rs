//! Eventide: a single-threaded cooperative event loop library.
//!
//! # Overview
//!
//! Eventide provides the substrate network clients and servers are built
//! on: a composable asynchronous-result primitive (the promise), its
//! chaining and combinator algebra, and a hierarchical timer wheel, all
//! driven deterministically by a per-thread message loop. Producers
//! settle promises; consumers chain continuations onto them; the loop
//! decides when everything runs.
//!
//! # Core Guarantees
//!
//! - **Single settlement**: at most one of resolve/reject wins a promise;
//!   the loser is a no-op returning false
//! - **One thread**: every continuation, timer callback, and posted thunk
//!   runs on the loop's own thread; cross-thread submission goes through
//!   the reactor-backed remote door
//! - **Deterministic ordering**: FIFO per priority band, bands drained
//!   Urgent → Critical → Normal, timer events for tick X strictly before
//!   tick X+1
//! - **Safe in-flight cancellation**: a queued continuation re-checks its
//!   promise on entry and evaporates if the promise was cancelled
//! - **No escaping panics**: a panicking continuation rejects its
//!   downstream promise instead of unwinding the loop
//!
//! # Module Structure
//!
//! - [`error`]: tagged diagnostics with identity-compared categories
//! - [`types`]: the three-state [`Outcome`] result
//! - [`promise`]: promises, notifiers, combinators, the coroutine bridge
//! - [`time`]: the hierarchical timer wheel
//! - [`runtime`]: the message loop, executors, timers, loop threads
//! - [`util`]: weak-bound callables
//! - [`test_utils`]: logging setup and the hand-cranked test executor

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod error;
pub mod promise;
pub mod runtime;
pub mod test_utils;
pub mod time;
pub mod types;
pub mod util;

pub use error::{Error, ErrorCategory, EventError};
pub use promise::{
    all, any, make, notifier_from, promise_from, race, rejected, rejected_notifier, resolved,
    resolved_notifier, Completion, CompletionResolver, Done, Notifier, NotifierFuture,
    NotifierResolver, Promise, PromiseFuture, RejectFn, ResolveFn, Resolver, Status,
};
pub use runtime::config::{ConfigError, LoopConfig};
pub use runtime::executor::{Executor, ExecutorRef, InlineExecutor, Thunk};
pub use runtime::thread::LoopThread;
pub use runtime::timer::{SharedTimerToken, TimerToken};
pub use runtime::{LoopHandle, LoopState, MessageLoop, RemoteExecutor, Severity, TaskHandle};
pub use time::{EventKey, Tick, TimerWheel, WheelEvent};
pub use types::Outcome;
