//! The message loop: priority bands, timers, dispatch, and task driving.
//!
//! A [`MessageLoop`] is bound to the thread that creates it; exactly one
//! loop may exist per thread and it is observable through
//! [`MessageLoop::current`]. Everything the loop runs — posted thunks,
//! promise continuations, timer callbacks, spawned futures — executes on
//! that thread. The only cross-thread doors are [`LoopHandle::dispatch`]
//! and [`RemoteExecutor`], both of which enqueue through the system
//! reactor and wake the loop.
//!
//! [`MessageLoop::run`] drives three repeating duties: a heartbeat that
//! advances the timer wheel (default every 1 ms), a task pass that drains
//! the priority bands Urgent → Critical → Normal (default every 10 ms),
//! and exact one-shot deadlines. Between duties the loop parks on the
//! reactor.

pub mod config;
pub mod executor;
pub(crate) mod reactor;
pub mod thread;
pub mod timer;

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant, SystemTime};

use crate::error::{Error, EventError};
use crate::promise::panic_message;
use crate::time::deadline::DeadlineSet;
use crate::time::wheel::Tick;

use config::{ConfigError, LoopConfig};
use executor::{Executor, ExecutorRef, Thunk};
use reactor::Reactor;
use timer::{TimerToken, WheelTimer};

/// Priority band for posted thunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Drained first.
    Urgent,
    /// Drained after urgent.
    Critical,
    /// The default band; drained last.
    Normal,
}

impl Severity {
    fn index(self) -> usize {
        match self {
            Self::Urgent => 0,
            Self::Critical => 1,
            Self::Normal => 2,
        }
    }
}

/// Lifecycle of a message loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Constructed, not yet running.
    Init,
    /// Inside [`MessageLoop::run`].
    Running,
    /// Shut down; the run loop has exited or will exit promptly.
    Shutdown,
}

type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

thread_local! {
    static CURRENT_LOOP: RefCell<Option<Weak<LoopInner>>> = const { RefCell::new(None) };
}

pub(crate) struct LoopInner {
    state: Cell<LoopState>,
    config: LoopConfig,
    bands: [RefCell<VecDeque<Thunk>>; 3],
    timers: WheelTimer,
    deadlines: RefCell<DeadlineSet>,
    tasks: RefCell<HashMap<u64, LocalFuture>>,
    next_task_id: Cell<u64>,
    reactor: Arc<Reactor>,
}

impl Drop for LoopInner {
    fn drop(&mut self) {
        let _ = CURRENT_LOOP.try_with(|current| {
            let mut slot = current.borrow_mut();
            if slot
                .as_ref()
                .is_some_and(|registered| std::ptr::eq(registered.as_ptr(), self))
            {
                *slot = None;
            }
        });
    }
}

struct BandExecutor {
    inner: Weak<LoopInner>,
    severity: Severity,
}

impl Executor for BandExecutor {
    fn post(&self, thunk: Thunk) {
        if let Some(inner) = self.inner.upgrade() {
            inner.bands[self.severity.index()].borrow_mut().push_back(thunk);
        } else {
            tracing::trace!("thunk dropped after its loop was destroyed");
        }
    }
}

/// Thread-safe submission handle backed by the system reactor.
#[derive(Clone)]
pub struct RemoteExecutor {
    reactor: Arc<Reactor>,
}

impl RemoteExecutor {
    /// Enqueues a thunk to run on the loop thread and wakes the loop.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.reactor.post(Box::new(f));
    }
}

/// Cross-thread handle to a loop: dispatch, wakeup, shutdown.
#[derive(Clone)]
pub struct LoopHandle {
    reactor: Arc<Reactor>,
}

impl LoopHandle {
    /// Runs `f` inline when called on the loop's own thread; otherwise
    /// enqueues it remotely and wakes the loop.
    pub fn dispatch<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if std::thread::current().id() == self.reactor.thread() {
            f();
        } else {
            self.reactor.post(Box::new(f));
        }
    }

    /// Requests shutdown of the loop from any thread.
    pub fn shutdown(&self) {
        self.dispatch(|| {
            if let Some(message_loop) = MessageLoop::current() {
                message_loop.shutdown();
            }
        });
    }
}

/// Handle to a future spawned on a loop.
pub struct TaskHandle {
    id: u64,
    inner: Weak<LoopInner>,
}

impl TaskHandle {
    /// The task's loop-local identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Drops the task's frame; a completed or already aborted task is
    /// unaffected.
    pub fn abort(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.tasks.borrow_mut().remove(&self.id);
        }
    }
}

struct TaskWaker {
    id: u64,
    reactor: Arc<Reactor>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.reactor.wake_task(self.id);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.reactor.wake_task(self.id);
    }
}

/// A single-threaded cooperative message loop.
///
/// Cheaply clonable; all clones refer to the same loop. The loop is
/// destroyed when the last handle drops, which also clears the
/// thread-local registration.
#[derive(Clone)]
pub struct MessageLoop {
    inner: Rc<LoopInner>,
}

impl MessageLoop {
    /// Creates a loop with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics when a loop already exists on this thread.
    #[must_use]
    pub fn new() -> Self {
        match Self::with_config(LoopConfig::default()) {
            Ok(message_loop) => message_loop,
            Err(err) => unreachable!("default loop config rejected: {err}"),
        }
    }

    /// Creates a loop with the given configuration.
    ///
    /// # Panics
    ///
    /// Panics when a loop already exists on this thread.
    pub fn with_config(config: LoopConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let inner = Rc::new(LoopInner {
            state: Cell::new(LoopState::Init),
            timers: WheelTimer::new(config.wheel_tick),
            config,
            bands: [
                RefCell::new(VecDeque::new()),
                RefCell::new(VecDeque::new()),
                RefCell::new(VecDeque::new()),
            ],
            deadlines: RefCell::new(DeadlineSet::new()),
            tasks: RefCell::new(HashMap::new()),
            next_task_id: Cell::new(0),
            reactor: Reactor::new(),
        });
        CURRENT_LOOP.with(|current| {
            let mut slot = current.borrow_mut();
            assert!(
                slot.as_ref().and_then(Weak::upgrade).is_none(),
                "a message loop already exists on this thread"
            );
            *slot = Some(Rc::downgrade(&inner));
        });
        Ok(Self { inner })
    }

    /// Returns the loop registered on the current thread, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT_LOOP
            .with(|current| current.borrow().as_ref().and_then(Weak::upgrade))
            .map(|inner| Self { inner })
    }

    /// Returns the loop's lifecycle state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        self.inner.state.get()
    }

    /// True while inside [`MessageLoop::run`].
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    /// True when called on the loop's own thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.inner.reactor.thread()
    }

    /// The loop's configuration.
    #[must_use]
    pub fn config(&self) -> &LoopConfig {
        &self.inner.config
    }

    /// Monotonic now.
    #[must_use]
    pub fn mono_now(&self) -> Instant {
        Instant::now()
    }

    /// Wall-clock now.
    #[must_use]
    pub fn wall_now(&self) -> SystemTime {
        SystemTime::now()
    }

    /// Enqueues a thunk on the given priority band.
    pub fn post<F>(&self, f: F, severity: Severity)
    where
        F: FnOnce() + 'static,
    {
        self.inner.bands[severity.index()]
            .borrow_mut()
            .push_back(Box::new(f));
    }

    /// The Normal-band local executor.
    #[must_use]
    pub fn executor(&self) -> ExecutorRef {
        self.executor_for(Severity::Normal)
    }

    /// A local executor posting into the given band.
    #[must_use]
    pub fn executor_for(&self, severity: Severity) -> ExecutorRef {
        Rc::new(BandExecutor {
            inner: Rc::downgrade(&self.inner),
            severity,
        })
    }

    /// The thread-safe submission handle.
    #[must_use]
    pub fn remote_executor(&self) -> RemoteExecutor {
        RemoteExecutor {
            reactor: Arc::clone(&self.inner.reactor),
        }
    }

    /// A cross-thread handle for dispatch and shutdown.
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            reactor: Arc::clone(&self.inner.reactor),
        }
    }

    /// Runs `f` at the monotonic deadline `at`. The callback receives the
    /// none error on expiry, or the shutdown error.
    pub fn run_at<F>(&self, f: F, at: Instant)
    where
        F: FnOnce(Error) + 'static,
    {
        self.inner.deadlines.borrow_mut().add(Box::new(f), at);
    }

    /// Runs `f` after `delay`.
    pub fn run_after<F>(&self, f: F, delay: Duration)
    where
        F: FnOnce(Error) + 'static,
    {
        self.run_at(f, Instant::now() + delay);
    }

    /// Schedules a wheel-backed timer after `delay`; the returned token
    /// owns the event.
    pub fn add_timer_event<F>(&self, f: F, delay: Duration) -> TimerToken
    where
        F: FnOnce(Error) + 'static,
    {
        self.inner
            .timers
            .add_after(self.executor(), Box::new(f), delay)
    }

    /// Schedules a wheel-backed timer at a wall-clock time; past deadlines
    /// fire on the next tick.
    pub fn add_timer_event_at<F>(&self, f: F, at: SystemTime) -> TimerToken
    where
        F: FnOnce(Error) + 'static,
    {
        self.inner.timers.add_at(self.executor(), Box::new(f), at)
    }

    /// Spawns a future to be driven on this loop.
    pub fn spawn<Fut>(&self, future: Fut) -> TaskHandle
    where
        Fut: Future<Output = ()> + 'static,
    {
        let id = self.inner.next_task_id.get();
        self.inner.next_task_id.set(id + 1);
        self.inner.tasks.borrow_mut().insert(id, Box::pin(future));
        self.inner.reactor.wake_task(id);
        tracing::trace!(task = id, "task spawned");
        TaskHandle {
            id,
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Runs the loop until shutdown. Returns immediately if the loop is
    /// not freshly constructed.
    pub fn run(&self) {
        debug_assert!(self.is_current(), "run() must be called on the loop thread");
        if self.inner.state.get() != LoopState::Init {
            return;
        }
        self.inner.state.set(LoopState::Running);
        tracing::info!("message loop running");

        let heartbeat = self.inner.config.heartbeat_interval;
        let task_interval = self.inner.config.task_interval;
        let wheel_tick = self.inner.config.wheel_tick;

        let mut last_advance = Instant::now();
        let mut next_heartbeat = last_advance + heartbeat;
        let mut next_task_pass = last_advance + task_interval;

        loop {
            let (thunks, woken) = self.inner.reactor.drain();
            for thunk in thunks {
                thunk();
            }
            for id in woken {
                self.poll_task(id);
            }
            if self.inner.reactor.is_stopped() {
                break;
            }

            let now = Instant::now();
            if now >= next_heartbeat {
                let elapsed = now.duration_since(last_advance).max(heartbeat);
                let ticks = (elapsed.as_nanos() / wheel_tick.as_nanos()).max(1) as Tick;
                self.inner.timers.advance(ticks);
                last_advance = now;
                while next_heartbeat <= now {
                    next_heartbeat += heartbeat;
                }
            }
            if now >= next_task_pass {
                self.run_tasks();
                while next_task_pass <= now {
                    next_task_pass += task_interval;
                }
            }
            self.fire_due_deadlines(now);

            let mut wake_at = next_heartbeat.min(next_task_pass);
            if let Some(deadline) = self.inner.deadlines.borrow().next_deadline() {
                wake_at = wake_at.min(deadline);
            }
            self.inner.reactor.park_until(wake_at);
        }

        tracing::info!("message loop stopped");
    }

    /// Shuts the loop down: cancels every wheel timer and outstanding
    /// deadline with the shutdown error, drains the bands once, and stops
    /// the reactor. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.state.get() == LoopState::Shutdown {
            return;
        }
        tracing::info!("message loop shutting down");
        self.inner.state.set(LoopState::Shutdown);

        self.inner
            .timers
            .cancel_all(Error::event(EventError::LoopShutdown));
        let orphaned = self.inner.deadlines.borrow_mut().drain();
        for handler in orphaned {
            handler(Error::event(EventError::LoopShutdown));
        }
        self.inner.tasks.borrow_mut().clear();
        self.run_tasks();
        self.inner.reactor.stop();
    }

    /// Drains the bands once: a snapshot of Urgent, then Critical, then
    /// Normal. Thunks posted while draining wait for the next pass.
    fn run_tasks(&self) {
        let mut pass: Vec<Thunk> = Vec::new();
        for band in &self.inner.bands {
            pass.extend(band.borrow_mut().drain(..));
        }
        for thunk in pass {
            thunk();
        }
    }

    fn fire_due_deadlines(&self, now: Instant) {
        let due = self.inner.deadlines.borrow_mut().pop_due(now);
        for handler in due {
            handler(Error::none());
        }
    }

    fn poll_task(&self, id: u64) {
        let Some(mut future) = self.inner.tasks.borrow_mut().remove(&id) else {
            return;
        };
        let waker = Waker::from(Arc::new(TaskWaker {
            id,
            reactor: Arc::clone(&self.inner.reactor),
        }));
        let mut cx = Context::from_waker(&waker);
        match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => {
                self.inner.tasks.borrow_mut().insert(id, future);
            }
            Ok(Poll::Ready(())) => {
                tracing::trace!(task = id, "task completed");
            }
            Err(payload) => {
                tracing::error!(task = id, panic = %panic_message(&*payload), "spawned task panicked");
            }
        }
    }

    #[cfg(test)]
    fn pump(&self) {
        let (thunks, woken) = self.inner.reactor.drain();
        for thunk in thunks {
            thunk();
        }
        for id in woken {
            self.poll_task(id);
        }
        self.run_tasks();
    }
}

impl Default for MessageLoop {
    fn default() -> Self {
        Self::new()
    }
}
