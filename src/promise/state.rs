//! Promise state machine, storage, and chain propagation.
//!
//! Every promise handle wraps one node of a continuation chain. A node
//! moves through six states:
//!
//! ```text
//! Init ──resolve──▶ PreFulfilled ──continuation ran──▶ Fulfilled
//!   │ └─reject───▶ PreRejected  ──continuation ran──▶ Rejected
//!   └──────────────cancel (also from either Pre state)──▶ Cancelled
//! ```
//!
//! The Pre states bridge the gap between the producer settling a value and
//! the consumer's executor getting a chance to run the continuation. The
//! queued thunk re-checks the state on entry, which is the window in which
//! `cancel` takes effect: a cancelled node silently swallows its thunk.
//!
//! Chain ownership is strong from tail toward head (each node keeps its
//! predecessor alive through `previous`) and weak from head toward tail
//! (`next` is only used to walk cancellation forward and evaporates when
//! the successor is dropped). Dropping the tail therefore collects the
//! chain tail-to-head.
//!
//! The unit fitting ([`UnitState`]) carries no continuation and no
//! executor, so it skips the Pre ceremony entirely: settling it jumps
//! straight to the terminal state and forwards the result to the next unit
//! node synchronously.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::error::{Error, EventError};
use crate::runtime::executor::{ExecutorRef, Thunk};
use crate::types::Outcome;
use crate::util::bind::bind_weak;

/// Observable lifecycle of a promise node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// Neither settled nor cancelled.
    #[default]
    Init,
    /// Resolved; the continuation has not run yet.
    PreFulfilled,
    /// Resolved and the continuation has run.
    Fulfilled,
    /// Rejected; the continuation has not run yet.
    PreRejected,
    /// Rejected and the continuation has run.
    Rejected,
    /// Cancelled before the continuation could run.
    Cancelled,
}

/// The transition table, with one method per legal edge.
#[derive(Debug, Default)]
pub(crate) struct StatusMachine {
    status: Status,
}

impl StatusMachine {
    pub(crate) fn status(&self) -> Status {
        self.status
    }

    pub(crate) fn to_pre_fulfilled(&mut self) -> bool {
        self.shift(Status::Init, Status::PreFulfilled)
    }

    pub(crate) fn to_fulfilled(&mut self) -> bool {
        self.shift(Status::PreFulfilled, Status::Fulfilled)
    }

    pub(crate) fn to_pre_rejected(&mut self) -> bool {
        self.shift(Status::Init, Status::PreRejected)
    }

    pub(crate) fn to_rejected(&mut self) -> bool {
        self.shift(Status::PreRejected, Status::Rejected)
    }

    pub(crate) fn to_cancelled(&mut self) -> bool {
        match self.status {
            Status::Init | Status::PreFulfilled | Status::PreRejected => {
                self.status = Status::Cancelled;
                true
            }
            _ => false,
        }
    }

    /// Forces a state, bypassing the table. Only the unit fitting uses
    /// this, to jump straight to a terminal state.
    pub(crate) fn force(&mut self, status: Status) {
        self.status = status;
    }

    fn shift(&mut self, from: Status, to: Status) -> bool {
        if self.status == from {
            self.status = to;
            return true;
        }
        false
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.status == Status::Init
    }

    /// Settled, continuation not yet run.
    pub(crate) fn is_pending(&self) -> bool {
        matches!(self.status, Status::PreFulfilled | Status::PreRejected)
    }

    /// Continuation has run.
    pub(crate) fn is_done(&self) -> bool {
        matches!(self.status, Status::Fulfilled | Status::Rejected)
    }

    /// Resolved, whether or not the continuation has run.
    pub(crate) fn is_satisfied(&self) -> bool {
        matches!(self.status, Status::PreFulfilled | Status::Fulfilled)
    }

    /// Rejected, whether or not the continuation has run.
    pub(crate) fn is_unsatisfied(&self) -> bool {
        matches!(self.status, Status::PreRejected | Status::Rejected)
    }

    /// A result has been stored: settled or done, but not cancelled.
    pub(crate) fn is_settled(&self) -> bool {
        !self.is_empty() && self.status != Status::Cancelled
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.status == Status::Cancelled
    }
}

/// One step of the forward cancellation walk: cancel this node if it is
/// still eligible and hand back the link to its successor.
pub(crate) trait ChainNode {
    fn cancel_step(&self) -> Option<Weak<dyn ChainNode>>;
}

/// Cancels a node and every successor reachable through live forward
/// links. Nodes already in a terminal state are stepped over, matching
/// cancel's no-op contract there.
pub(crate) fn cancel_chain(first: Rc<dyn ChainNode>) {
    let mut cursor = Some(first);
    while let Some(node) = cursor {
        cursor = node.cancel_step().and_then(|next| next.upgrade());
    }
}

pub(crate) type Callback<T> = Box<dyn FnOnce(Outcome<T>)>;
pub(crate) type StateRef<T> = Rc<RefCell<State<T>>>;

/// A value-carrying chain node.
pub(crate) struct State<T> {
    status: StatusMachine,
    storage: Option<Outcome<T>>,
    callback: Option<Callback<T>>,
    executor: Option<ExecutorRef>,
    previous: Option<Rc<dyn ChainNode>>,
    next: Option<Weak<dyn ChainNode>>,
    attachment: Option<Box<dyn Any>>,
    frame: Option<Box<dyn FnOnce()>>,
}

impl<T: 'static> ChainNode for RefCell<State<T>> {
    fn cancel_step(&self) -> Option<Weak<dyn ChainNode>> {
        let frame = {
            let mut state = self.borrow_mut();
            if !state.status.to_cancelled() {
                return state.next.clone();
            }
            state.storage = None;
            state.callback = None;
            state.frame.take()
        };
        if let Some(frame) = frame {
            frame();
        }
        self.borrow().next.clone()
    }
}

pub(crate) fn new_state<T: 'static>() -> StateRef<T> {
    Rc::new(RefCell::new(State {
        status: StatusMachine::default(),
        storage: None,
        callback: None,
        executor: None,
        previous: None,
        next: None,
        attachment: None,
        frame: None,
    }))
}

pub(crate) fn status<T>(state: &StateRef<T>) -> Status {
    state.borrow().status.status()
}

pub(crate) fn has_handler<T>(state: &StateRef<T>) -> bool {
    state.borrow().callback.is_some()
}

/// Settles the node with a value. True iff the node was in `Init`.
pub(crate) fn resolve<T: 'static>(state: &StateRef<T>, value: T) -> bool {
    {
        let mut s = state.borrow_mut();
        if !s.status.is_empty() {
            return false;
        }
        s.storage = Some(Outcome::Ok(value));
        let moved = s.status.to_pre_fulfilled();
        debug_assert!(moved);
    }
    try_invoke(state);
    true
}

/// Settles the node with an error. True iff the node was in `Init`.
pub(crate) fn reject<T: 'static>(state: &StateRef<T>, err: Error) -> bool {
    {
        let mut s = state.borrow_mut();
        if !s.status.is_empty() {
            return false;
        }
        s.storage = Some(Outcome::Err(err));
        let moved = s.status.to_pre_rejected();
        debug_assert!(moved);
    }
    try_invoke(state);
    true
}

/// Cancels the node and its downstream chain.
pub(crate) fn cancel<T: 'static>(state: &StateRef<T>) {
    cancel_chain(Rc::clone(state) as Rc<dyn ChainNode>);
}

/// Stores the continuation and its executor, firing immediately when the
/// node is already pending.
fn add_callback<T: 'static>(state: &StateRef<T>, callback: Callback<T>, executor: Option<ExecutorRef>) {
    {
        let mut s = state.borrow_mut();
        debug_assert!(s.callback.is_none(), "a promise accepts one continuation");
        s.callback = Some(callback);
        s.executor = executor;
    }
    try_invoke(state);
}

/// Queues the continuation thunk if the node is pending and has one.
///
/// The thunk is weak-bound: it holds no ownership of the node, and it
/// re-checks the state on entry so a cancellation that lands while it sits
/// in the executor queue turns it into a no-op.
fn try_invoke<T: 'static>(state: &StateRef<T>) {
    let executor = {
        let s = state.borrow();
        if s.callback.is_none() || !s.status.is_pending() {
            return;
        }
        s.executor.clone()
    };

    let thunk = bind_weak(state, |state: StateRef<T>| {
        let (callback, value) = {
            let mut s = state.borrow_mut();
            let advanced = match s.status.status() {
                Status::PreFulfilled => s.status.to_fulfilled(),
                Status::PreRejected => s.status.to_rejected(),
                _ => false,
            };
            if !advanced {
                return;
            }
            (s.callback.take(), s.storage.take())
        };
        if let (Some(callback), Some(value)) = (callback, value) {
            callback(value);
        }
    });
    run_in(executor, Box::new(thunk));
}

fn run_in(executor: Option<ExecutorRef>, thunk: Thunk) {
    match executor {
        Some(executor) => executor.post(thunk),
        None => thunk(),
    }
}

/// Links `next` behind `prev`: strong backward, weak forward.
fn watch<T: 'static, U: 'static>(next: &StateRef<U>, prev: &StateRef<T>) {
    next.borrow_mut().previous = Some(Rc::clone(prev) as Rc<dyn ChainNode>);
    let forward: Weak<dyn ChainNode> = Rc::downgrade(&(Rc::clone(next) as Rc<dyn ChainNode>));
    prev.borrow_mut().next = Some(forward);
}

/// Drives an outcome into a node: values resolve, errors reject.
pub(crate) fn propagate_result<U: 'static>(state: &StateRef<U>, outcome: Outcome<U>) {
    match outcome {
        Outcome::Ok(value) => {
            resolve(state, value);
        }
        Outcome::Err(err) => {
            reject(state, err);
        }
        Outcome::Empty => {
            debug_assert!(false, "an empty outcome cannot propagate");
            reject(
                state,
                Error::event_with(EventError::UnsupportedEvent, "empty result"),
            );
        }
    }
}

/// Adopts an inner promise as the source of `outer`'s settlement.
///
/// The outer node re-roots its chain onto the inner node and the inner
/// forwards its eventual result inline. The inner promise must not carry
/// a continuation of its own.
pub(crate) fn adopt_promise<U: 'static>(outer: &StateRef<U>, inner: &StateRef<U>) {
    debug_assert!(
        !has_handler(inner),
        "a promise being flattened must have no continuation"
    );
    watch(outer, inner);
    let target = Rc::downgrade(outer);
    let callback: Callback<U> = Box::new(move |outcome| {
        if let Some(outer) = target.upgrade() {
            propagate_result(&outer, outcome);
        }
    });
    add_callback(inner, callback, None);
}

/// Attaches a value→result continuation feeding the `next` node.
pub(crate) fn attach_result<T, U, F>(
    prev: &StateRef<T>,
    next: &StateRef<U>,
    f: F,
    executor: Option<ExecutorRef>,
) where
    T: 'static,
    U: 'static,
    F: FnOnce(Outcome<T>) -> Outcome<U> + 'static,
{
    watch(next, prev);
    let target = Rc::downgrade(next);
    let callback: Callback<T> = Box::new(move |outcome| {
        let produced = match catch_unwind(AssertUnwindSafe(|| f(outcome))) {
            Ok(produced) => produced,
            Err(payload) => Outcome::Err(panic_error(&payload)),
        };
        if let Some(next) = target.upgrade() {
            propagate_result(&next, produced);
        }
    });
    add_callback(prev, callback, executor);
}

/// Attaches a value→promise continuation; the produced inner promise is
/// flattened into the `next` node.
pub(crate) fn attach_promise<T, U, F>(
    prev: &StateRef<T>,
    next: &StateRef<U>,
    f: F,
    executor: Option<ExecutorRef>,
) where
    T: 'static,
    U: 'static,
    F: FnOnce(Outcome<T>) -> crate::promise::Promise<U> + 'static,
{
    watch(next, prev);
    let target = Rc::downgrade(next);
    let callback: Callback<T> = Box::new(move |outcome| {
        match catch_unwind(AssertUnwindSafe(|| f(outcome))) {
            Ok(inner) => {
                if let Some(next) = target.upgrade() {
                    adopt_promise(&next, inner.state_ref());
                }
            }
            Err(payload) => {
                if let Some(next) = target.upgrade() {
                    propagate_result(&next, Outcome::Err(panic_error(&payload)));
                }
            }
        }
    });
    add_callback(prev, callback, executor);
}

/// Attaches a terminal sink. The node must be the chain tail.
pub(crate) fn attach_sink<T, F>(prev: &StateRef<T>, f: F, executor: Option<ExecutorRef>)
where
    T: 'static,
    F: FnOnce(Outcome<T>) + 'static,
{
    debug_assert!(
        prev.borrow().next.is_none(),
        "a sink cannot hang off a node that feeds a chain"
    );
    let callback: Callback<T> = Box::new(move |outcome| {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(outcome))) {
            tracing::warn!(panic = %panic_message(&payload), "sink continuation panicked");
        }
    });
    add_callback(prev, callback, executor);
}

/// Attaches a value→unit continuation feeding a unit fitting.
pub(crate) fn attach_unit<T, F>(
    prev: &StateRef<T>,
    next: &UnitRef,
    f: F,
    executor: Option<ExecutorRef>,
) where
    T: 'static,
    F: FnOnce(Outcome<T>) -> Result<(), Error> + 'static,
{
    watch_unit(next, prev);
    let target = Rc::downgrade(next);
    let callback: Callback<T> = Box::new(move |outcome| {
        let produced = match catch_unwind(AssertUnwindSafe(|| f(outcome))) {
            Ok(produced) => produced,
            Err(payload) => Err(panic_error(&payload)),
        };
        if let Some(next) = target.upgrade() {
            unit_settle(&next, produced);
        }
    });
    add_callback(prev, callback, executor);
}

/// Attaches a continuation producing a unit fitting, flattened into `next`.
pub(crate) fn attach_completion<T, F>(
    prev: &StateRef<T>,
    next: &UnitRef,
    f: F,
    executor: Option<ExecutorRef>,
) where
    T: 'static,
    F: FnOnce(Outcome<T>) -> crate::promise::Completion + 'static,
{
    watch_unit(next, prev);
    let target = Rc::downgrade(next);
    let callback: Callback<T> = Box::new(move |outcome| {
        match catch_unwind(AssertUnwindSafe(|| f(outcome))) {
            Ok(inner) => {
                if let Some(next) = target.upgrade() {
                    adopt_completion(&next, inner.state_ref());
                }
            }
            Err(payload) => {
                if let Some(next) = target.upgrade() {
                    unit_settle(&next, Err(panic_error(&payload)));
                }
            }
        }
    });
    add_callback(prev, callback, executor);
}

/// Pins an arbitrary payload to the node for its lifetime. Combinators
/// use this to keep their input container alive until every sibling
/// continuation has run.
pub(crate) fn set_attachment<T>(state: &StateRef<T>, payload: Box<dyn Any>) {
    state.borrow_mut().attachment = Some(payload);
}

/// Installs the hook that tears down a suspended coroutine frame when the
/// node is cancelled.
pub(crate) fn set_frame<T>(state: &StateRef<T>, hook: Box<dyn FnOnce()>) {
    state.borrow_mut().frame = Some(hook);
}

pub(crate) fn panic_error(payload: &(dyn Any + Send)) -> Error {
    Error::event_with(EventError::ContinuationPanic, panic_message(payload))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_owned()
    }
}

// =============================================================================
// Unit fitting
// =============================================================================

pub(crate) type UnitRef = Rc<RefCell<UnitState>>;

/// The `Promise<void>` fitting: a chain node with no continuation of its
/// own. It exists to make completion observable and to forward unit
/// results through the chain without an executor hop.
pub(crate) struct UnitState {
    status: StatusMachine,
    storage: Option<Result<(), Error>>,
    previous: Option<Rc<dyn ChainNode>>,
    next: Option<Weak<dyn ChainNode>>,
    next_unit: Option<Weak<RefCell<UnitState>>>,
}

impl ChainNode for RefCell<UnitState> {
    fn cancel_step(&self) -> Option<Weak<dyn ChainNode>> {
        let mut state = self.borrow_mut();
        if state.status.to_cancelled() {
            state.storage = None;
        }
        state.next.clone()
    }
}

pub(crate) fn new_unit() -> UnitRef {
    Rc::new(RefCell::new(UnitState {
        status: StatusMachine::default(),
        storage: None,
        previous: None,
        next: None,
        next_unit: None,
    }))
}

pub(crate) fn unit_status(state: &UnitRef) -> Status {
    state.borrow().status.status()
}

/// Settles the fitting with success. True iff it was in `Init`.
pub(crate) fn unit_resolve(state: &UnitRef) -> bool {
    if !state.borrow().status.is_empty() {
        return false;
    }
    unit_settle(state, Ok(()));
    true
}

/// Settles the fitting with an error. True iff it was in `Init`.
pub(crate) fn unit_reject(state: &UnitRef, err: Error) -> bool {
    if !state.borrow().status.is_empty() {
        return false;
    }
    unit_settle(state, Err(err));
    true
}

pub(crate) fn unit_cancel(state: &UnitRef) {
    cancel_chain(Rc::clone(state) as Rc<dyn ChainNode>);
}

/// Removes and returns the stored result once the fitting has settled.
pub(crate) fn unit_pass_result(state: &UnitRef) -> Option<Result<(), Error>> {
    state.borrow_mut().storage.take()
}

/// Jumps the fitting straight to its terminal state and forwards the
/// result synchronously to the next unit node. A cancelled fitting
/// swallows the result instead of resurrecting.
pub(crate) fn unit_settle(state: &UnitRef, result: Result<(), Error>) {
    let next = {
        let mut s = state.borrow_mut();
        if s.status.is_cancelled() {
            return;
        }
        debug_assert!(!s.status.is_done(), "a unit fitting settles once");
        s.status.force(if result.is_ok() {
            Status::Fulfilled
        } else {
            Status::Rejected
        });
        s.storage = Some(result.clone());
        s.next_unit.clone()
    };
    if let Some(next) = next.and_then(|weak| weak.upgrade()) {
        unit_settle(&next, result);
    }
}

/// Links a unit fitting behind a value node.
fn watch_unit<T: 'static>(next: &UnitRef, prev: &StateRef<T>) {
    next.borrow_mut().previous = Some(Rc::clone(prev) as Rc<dyn ChainNode>);
    let forward: Weak<dyn ChainNode> = Rc::downgrade(&(Rc::clone(next) as Rc<dyn ChainNode>));
    prev.borrow_mut().next = Some(forward);
}

/// Adopts an inner unit fitting as the source of `outer`'s settlement.
/// An inner that already settled forwards its stored result immediately.
pub(crate) fn adopt_completion(outer: &UnitRef, inner: &UnitRef) {
    {
        let mut o = outer.borrow_mut();
        o.previous = Some(Rc::clone(inner) as Rc<dyn ChainNode>);
    }
    {
        let mut i = inner.borrow_mut();
        let forward: Weak<dyn ChainNode> = Rc::downgrade(&(Rc::clone(outer) as Rc<dyn ChainNode>));
        i.next = Some(forward);
        i.next_unit = Some(Rc::downgrade(outer));
    }
    let settled = inner.borrow().storage.clone();
    if let Some(result) = settled {
        unit_settle(outer, result);
    }
}
