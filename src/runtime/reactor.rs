//! The system reactor: the only place the loop blocks.
//!
//! The reactor owns the thread-safe edge of a message loop: a queue of
//! remotely submitted thunks, the set of woken task ids, and the condvar
//! the loop parks on. Everything submitted here is executed later on the
//! loop's own thread; the submitting thread only enqueues and wakes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

pub(crate) type RemoteThunk = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct ReactorQueue {
    thunks: VecDeque<RemoteThunk>,
    woken: Vec<u64>,
    stopped: bool,
}

pub(crate) struct Reactor {
    queue: Mutex<ReactorQueue>,
    wakeups: Condvar,
    thread: ThreadId,
}

impl Reactor {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(ReactorQueue::default()),
            wakeups: Condvar::new(),
            thread: std::thread::current().id(),
        })
    }

    /// The thread the owning loop lives on.
    pub(crate) fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Enqueues a thunk for execution on the loop thread and wakes it.
    pub(crate) fn post(&self, thunk: RemoteThunk) {
        let mut queue = self.queue.lock();
        if queue.stopped {
            tracing::trace!("remote thunk dropped after reactor stop");
            return;
        }
        queue.thunks.push_back(thunk);
        drop(queue);
        self.wakeups.notify_one();
    }

    /// Marks a spawned task runnable and wakes the loop.
    pub(crate) fn wake_task(&self, id: u64) {
        let mut queue = self.queue.lock();
        if queue.stopped {
            return;
        }
        queue.woken.push(id);
        drop(queue);
        self.wakeups.notify_one();
    }

    pub(crate) fn stop(&self) {
        self.queue.lock().stopped = true;
        self.wakeups.notify_one();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.queue.lock().stopped
    }

    /// Takes everything submitted since the last drain.
    pub(crate) fn drain(&self) -> (Vec<RemoteThunk>, Vec<u64>) {
        let mut queue = self.queue.lock();
        let thunks = queue.thunks.drain(..).collect();
        let woken = std::mem::take(&mut queue.woken);
        (thunks, woken)
    }

    /// Parks the loop thread until `deadline`, a submission, or a stop.
    pub(crate) fn park_until(&self, deadline: Instant) {
        let mut queue = self.queue.lock();
        if queue.stopped || !queue.thunks.is_empty() || !queue.woken.is_empty() {
            return;
        }
        let _ = self.wakeups.wait_until(&mut queue, deadline);
    }
}
