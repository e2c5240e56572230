//! Test utilities.
//!
//! Shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - [`ManualExecutor`], a hand-cranked executor for driving promise
//!   continuations step by step

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Once;

use crate::runtime::executor::{Executor, ExecutorRef, Thunk};

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Log a test phase banner.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log successful test completion.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
}

/// Assert with logged expected/actual values.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// An executor that queues thunks until the test cranks it.
///
/// Mirrors how the loop's bands behave, but under test control: `post`
/// only enqueues, and [`ManualExecutor::run`] drains in FIFO order,
/// including thunks posted while draining.
#[derive(Default)]
pub struct ManualExecutor {
    queue: RefCell<VecDeque<Thunk>>,
    executed: Cell<usize>,
}

impl ManualExecutor {
    /// Creates a fresh executor behind an `Rc`, ready to be handed to
    /// promise attachments.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// This executor as an [`ExecutorRef`].
    #[must_use]
    pub fn executor(self: &Rc<Self>) -> ExecutorRef {
        Rc::clone(self) as ExecutorRef
    }

    /// Runs queued thunks until the queue is empty; returns how many ran.
    pub fn run(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Runs at most one queued thunk.
    pub fn run_one(&self) -> bool {
        let thunk = self.queue.borrow_mut().pop_front();
        match thunk {
            Some(thunk) => {
                thunk();
                self.executed.set(self.executed.get() + 1);
                true
            }
            None => false,
        }
    }

    /// Number of queued thunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Total thunks executed so far.
    #[must_use]
    pub fn executed(&self) -> usize {
        self.executed.get()
    }
}

impl Executor for ManualExecutor {
    fn post(&self, thunk: Thunk) {
        self.queue.borrow_mut().push_back(thunk);
    }
}
