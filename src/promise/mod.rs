//! Composable asynchronous results: promises, notifiers, and fittings.
//!
//! A [`Promise`] is the consumer's handle to a future outcome of type `T`.
//! The producer keeps a [`Resolver`] (a weak handle) and settles the
//! promise exactly once with [`Resolver::resolve`] or [`Resolver::reject`].
//! Consumers chain continuations with the `then` family, each of which
//! names what the continuation returns:
//!
//! - [`Promise::then`] — the continuation returns another [`Outcome`]
//! - [`Promise::then_promise`] — it returns a [`Promise`], which is
//!   flattened into the returned promise
//! - [`Promise::then_unit`] — it returns a unit result, producing a
//!   [`Completion`]
//! - [`Promise::done`] — a terminal sink, producing nothing
//!
//! Continuations run on the executor supplied at attachment; a `None`
//! executor means "inline, on the producer's stack, at settlement".
//!
//! [`Notifier`] is the promise whose value is the unit tag [`Done`]; it
//! carries only success or error and has an `Error`-flavored `then`.
//!
//! A promise that is never settled and never cancelled keeps its chain
//! alive until the last consumer handle drops; nothing surfaces such
//! leaks. [`Resolver::is_expired`] is the available diagnostic: it turns
//! true once the producer is the only party still interested.

mod combinator;
mod future;
mod state;

pub use combinator::{all, any, race};
pub use future::{notifier_from, promise_from, NotifierFuture, PromiseFuture};
pub use state::Status;

pub(crate) use state::panic_message;

use std::any::Any;
use std::rc::{Rc, Weak};

use crate::error::Error;
use crate::runtime::executor::ExecutorRef;
use crate::types::Outcome;

use state::{StateRef, UnitRef};

/// Handle to a future outcome of type `T`.
pub struct Promise<T: 'static> {
    state: StateRef<T>,
}

impl<T: 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Promise<T> {
    /// Creates an unsettled promise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: state::new_state(),
        }
    }

    pub(crate) fn state_ref(&self) -> &StateRef<T> {
        &self.state
    }

    /// Returns the producer-side weak handle.
    #[must_use]
    pub fn resolver(&self) -> Resolver<T> {
        Resolver {
            state: Rc::downgrade(&self.state),
        }
    }

    /// Settles with a value. True iff the promise was unsettled.
    pub fn resolve(&self, value: T) -> bool {
        state::resolve(&self.state, value)
    }

    /// Settles with an error. True iff the promise was unsettled.
    pub fn reject(&self, err: Error) -> bool {
        state::reject(&self.state, err)
    }

    /// Settles from an outcome: values resolve, errors reject, the empty
    /// outcome is refused.
    pub fn set(&self, outcome: Outcome<T>) -> bool {
        match outcome {
            Outcome::Ok(value) => self.resolve(value),
            Outcome::Err(err) => self.reject(err),
            Outcome::Empty => false,
        }
    }

    /// Cancels this promise and every promise chained after it. Storage,
    /// the continuation, and any suspended coroutine frame are dropped.
    /// Idempotent; a no-op on terminal states.
    pub fn cancel(&self) {
        state::cancel(&self.state);
    }

    /// Returns the current state.
    #[must_use]
    pub fn status(&self) -> Status {
        state::status(&self.state)
    }

    /// True while neither settled nor cancelled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status() == Status::Init
    }

    /// True once settled but before the continuation ran.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.status(), Status::PreFulfilled | Status::PreRejected)
    }

    /// True once the continuation ran.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self.status(), Status::Fulfilled | Status::Rejected)
    }

    /// True once resolved, whether or not the continuation ran.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        matches!(self.status(), Status::PreFulfilled | Status::Fulfilled)
    }

    /// True once rejected, whether or not the continuation ran.
    #[must_use]
    pub fn is_unsatisfied(&self) -> bool {
        matches!(self.status(), Status::PreRejected | Status::Rejected)
    }

    /// True once a result has been stored and not discarded by cancel.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.is_empty() && !self.is_cancelled()
    }

    /// True in the pre-continuation resolved state.
    #[must_use]
    pub fn is_pre_fulfilled(&self) -> bool {
        self.status() == Status::PreFulfilled
    }

    /// True once resolved and the continuation ran.
    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        self.status() == Status::Fulfilled
    }

    /// True in the pre-continuation rejected state.
    #[must_use]
    pub fn is_pre_rejected(&self) -> bool {
        self.status() == Status::PreRejected
    }

    /// True once rejected and the continuation ran.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.status() == Status::Rejected
    }

    /// True once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status() == Status::Cancelled
    }

    /// True while a continuation is attached and has not run.
    #[must_use]
    pub fn has_handler(&self) -> bool {
        state::has_handler(&self.state)
    }

    /// Chains a continuation returning an [`Outcome`].
    ///
    /// The returned promise settles with whatever the continuation
    /// returns. A panic inside the continuation rejects it instead.
    pub fn then<U, F>(&self, f: F, executor: Option<ExecutorRef>) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(Outcome<T>) -> Outcome<U> + 'static,
    {
        let next = Promise::new();
        state::attach_result(&self.state, &next.state, f, executor);
        next
    }

    /// Chains a continuation returning a [`Promise`], flattening it: the
    /// returned promise settles when the inner promise does.
    pub fn then_promise<U, F>(&self, f: F, executor: Option<ExecutorRef>) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(Outcome<T>) -> Promise<U> + 'static,
    {
        let next = Promise::new();
        state::attach_promise(&self.state, &next.state, f, executor);
        next
    }

    /// Chains a continuation returning a unit result, producing the void
    /// fitting: a [`Completion`] that jumps straight to its terminal state
    /// when the continuation has run.
    pub fn then_unit<F>(&self, f: F, executor: Option<ExecutorRef>) -> Completion
    where
        F: FnOnce(Outcome<T>) -> Result<(), Error> + 'static,
    {
        let next = Completion::new();
        state::attach_unit(&self.state, &next.state, f, executor);
        next
    }

    /// Chains a continuation returning a [`Completion`], flattened into
    /// the returned fitting.
    pub fn then_completion<F>(&self, f: F, executor: Option<ExecutorRef>) -> Completion
    where
        F: FnOnce(Outcome<T>) -> Completion + 'static,
    {
        let next = Completion::new();
        state::attach_completion(&self.state, &next.state, f, executor);
        next
    }

    /// Attaches a terminal sink; no further promise is produced. The
    /// promise must not already feed a chain.
    pub fn done<F>(&self, f: F, executor: Option<ExecutorRef>)
    where
        F: FnOnce(Outcome<T>) + 'static,
    {
        state::attach_sink(&self.state, f, executor);
    }

    pub(crate) fn pin_attachment(&self, payload: Box<dyn Any>) {
        state::set_attachment(&self.state, payload);
    }

    pub(crate) fn set_frame(&self, hook: Box<dyn FnOnce()>) {
        state::set_frame(&self.state, hook);
    }
}

/// Weak producer handle tied to exactly one promise.
pub struct Resolver<T: 'static> {
    state: Weak<std::cell::RefCell<state::State<T>>>,
}

impl<T: 'static> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            state: Weak::clone(&self.state),
        }
    }
}

impl<T: 'static> Default for Resolver<T> {
    fn default() -> Self {
        Self { state: Weak::new() }
    }
}

impl<T: 'static> Resolver<T> {
    /// Settles with a value. False when the promise died or was settled.
    pub fn resolve(&self, value: T) -> bool {
        self.state
            .upgrade()
            .is_some_and(|s| state::resolve(&s, value))
    }

    /// Settles with an error. False when the promise died or was settled.
    pub fn reject(&self, err: Error) -> bool {
        self.state.upgrade().is_some_and(|s| state::reject(&s, err))
    }

    /// Settles from an outcome: values resolve, errors reject.
    pub fn set(&self, outcome: Outcome<T>) -> bool {
        match outcome {
            Outcome::Ok(value) => self.resolve(value),
            Outcome::Err(err) => self.reject(err),
            Outcome::Empty => false,
        }
    }

    /// Cancels the promise and its downstream chain, if still alive.
    pub fn cancel(&self) {
        if let Some(s) = self.state.upgrade() {
            state::cancel(&s);
        }
    }

    /// Detaches this handle from the promise.
    pub fn reset(&mut self) {
        self.state = Weak::new();
    }

    /// True once every consumer handle has been dropped.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.state.strong_count() == 0
    }

    /// Whether the continuation has run; `None` when the promise died.
    #[must_use]
    pub fn is_done(&self) -> Option<bool> {
        self.query(|s| matches!(s, Status::Fulfilled | Status::Rejected))
    }

    /// Whether the promise is unsettled; `None` when the promise died.
    #[must_use]
    pub fn is_empty(&self) -> Option<bool> {
        self.query(|s| s == Status::Init)
    }

    /// Whether a result is stored; `None` when the promise died.
    #[must_use]
    pub fn is_settled(&self) -> Option<bool> {
        self.query(|s| !matches!(s, Status::Init | Status::Cancelled))
    }

    /// Whether the promise resolved; `None` when the promise died.
    #[must_use]
    pub fn is_satisfied(&self) -> Option<bool> {
        self.query(|s| matches!(s, Status::PreFulfilled | Status::Fulfilled))
    }

    /// Whether the promise rejected; `None` when the promise died.
    #[must_use]
    pub fn is_unsatisfied(&self) -> Option<bool> {
        self.query(|s| matches!(s, Status::PreRejected | Status::Rejected))
    }

    fn query(&self, f: impl FnOnce(Status) -> bool) -> Option<bool> {
        self.state.upgrade().map(|s| f(state::status(&s)))
    }
}

/// Creates a promise already resolved with `value`.
pub fn resolved<T: 'static>(value: T) -> Promise<T> {
    let promise = Promise::new();
    promise.resolve(value);
    promise
}

/// Creates a promise already rejected with `err`.
pub fn rejected<T: 'static>(err: Error) -> Promise<T> {
    let promise = Promise::new();
    promise.reject(err);
    promise
}

/// Strong resolve callable handed to [`make`] factories; clones share the
/// same underlying promise and at most one settlement wins.
pub struct ResolveFn<T: 'static> {
    state: StateRef<T>,
}

impl<T: 'static> Clone for ResolveFn<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: 'static> ResolveFn<T> {
    /// Resolves the promise. True iff this call settled it.
    pub fn call(&self, value: T) -> bool {
        state::resolve(&self.state, value)
    }
}

/// Strong reject callable handed to [`make`] factories.
pub struct RejectFn<T: 'static> {
    state: StateRef<T>,
}

impl<T: 'static> Clone for RejectFn<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: 'static> RejectFn<T> {
    /// Rejects the promise. True iff this call settled it.
    pub fn call(&self, err: Error) -> bool {
        state::reject(&self.state, err)
    }
}

/// Creates a promise and hands resolve/reject callables to `f`, which may
/// invoke at most one of them (the first settlement wins; later calls
/// return false).
pub fn make<T, F>(f: F) -> Promise<T>
where
    T: 'static,
    F: FnOnce(ResolveFn<T>, RejectFn<T>),
{
    let promise = Promise::new();
    f(
        ResolveFn {
            state: Rc::clone(&promise.state),
        },
        RejectFn {
            state: Rc::clone(&promise.state),
        },
    );
    promise
}

/// Unit tag carried by [`Notifier`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Done;

/// Promise specialization for unit outcomes: success or error, no value.
pub struct Notifier {
    inner: Promise<Done>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    /// Creates an unsettled notifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Promise::new(),
        }
    }

    pub(crate) fn from_promise(inner: Promise<Done>) -> Self {
        Self { inner }
    }

    pub(crate) fn into_promise(self) -> Promise<Done> {
        self.inner
    }

    /// Returns the producer-side weak handle.
    #[must_use]
    pub fn resolver(&self) -> NotifierResolver {
        NotifierResolver {
            inner: self.inner.resolver(),
        }
    }

    /// Signals success. True iff the notifier was unsettled.
    pub fn resolve(&self) -> bool {
        self.inner.resolve(Done)
    }

    /// Signals failure. True iff the notifier was unsettled.
    pub fn reject(&self, err: Error) -> bool {
        self.inner.reject(err)
    }

    /// Cancels the notifier and its downstream chain.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Attaches the terminal continuation: it receives the none error on
    /// success and the rejection error otherwise.
    pub fn then<F>(&self, f: F, executor: Option<ExecutorRef>)
    where
        F: FnOnce(Error) + 'static,
    {
        self.inner.done(
            move |outcome| match outcome {
                Outcome::Err(err) => f(err),
                _ => f(Error::none()),
            },
            executor,
        );
    }

    /// Returns the current state.
    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.status()
    }

    /// True while neither settled nor cancelled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// True once settled but before the continuation ran.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.is_pending()
    }

    /// True once the continuation ran.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    /// True once a result has been stored and not discarded by cancel.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.inner.is_settled()
    }

    /// True once the notifier signalled success.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.inner.is_satisfied()
    }

    /// True once the notifier signalled failure.
    #[must_use]
    pub fn is_unsatisfied(&self) -> bool {
        self.inner.is_unsatisfied()
    }

    /// True once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }
}

/// Weak producer handle for a [`Notifier`].
#[derive(Clone, Default)]
pub struct NotifierResolver {
    inner: Resolver<Done>,
}

impl NotifierResolver {
    /// Signals success. False when the notifier died or was settled.
    pub fn resolve(&self) -> bool {
        self.inner.resolve(Done)
    }

    /// Signals failure. False when the notifier died or was settled.
    pub fn reject(&self, err: Error) -> bool {
        self.inner.reject(err)
    }

    /// Cancels the notifier, if still alive.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// True once every consumer handle has been dropped.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.inner.is_expired()
    }

    /// Whether the continuation has run; `None` when the notifier died.
    #[must_use]
    pub fn is_done(&self) -> Option<bool> {
        self.inner.is_done()
    }

    /// Whether a result is stored; `None` when the notifier died.
    #[must_use]
    pub fn is_settled(&self) -> Option<bool> {
        self.inner.is_settled()
    }
}

/// Creates a notifier already signalling success.
#[must_use]
pub fn resolved_notifier() -> Notifier {
    let notifier = Notifier::new();
    notifier.resolve();
    notifier
}

/// Creates a notifier already signalling failure.
#[must_use]
pub fn rejected_notifier(err: Error) -> Notifier {
    let notifier = Notifier::new();
    notifier.reject(err);
    notifier
}

/// The void fitting: a chain tail that records completion.
///
/// Unlike a value promise it carries no continuation, so settling it skips
/// the pre-states and lands directly on [`Status::Fulfilled`] or
/// [`Status::Rejected`], forwarding the unit result synchronously to any
/// fitting chained behind it.
pub struct Completion {
    state: UnitRef,
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion {
    /// Creates an unsettled fitting.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: state::new_unit(),
        }
    }

    pub(crate) fn state_ref(&self) -> &UnitRef {
        &self.state
    }

    /// Returns the producer-side weak handle.
    #[must_use]
    pub fn resolver(&self) -> CompletionResolver {
        CompletionResolver {
            state: Rc::downgrade(&self.state),
        }
    }

    /// Records success. True iff the fitting was unsettled.
    pub fn resolve(&self) -> bool {
        state::unit_resolve(&self.state)
    }

    /// Records failure. True iff the fitting was unsettled.
    pub fn reject(&self, err: Error) -> bool {
        state::unit_reject(&self.state, err)
    }

    /// Cancels the fitting and its downstream chain.
    pub fn cancel(&self) {
        state::unit_cancel(&self.state);
    }

    /// Removes and returns the stored result once settled.
    #[must_use]
    pub fn pass_result(&self) -> Option<Result<(), Error>> {
        state::unit_pass_result(&self.state)
    }

    /// Returns the current state.
    #[must_use]
    pub fn status(&self) -> Status {
        state::unit_status(&self.state)
    }

    /// True while neither settled nor cancelled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status() == Status::Init
    }

    /// True once the fitting recorded success.
    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        self.status() == Status::Fulfilled
    }

    /// True once the fitting recorded failure.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.status() == Status::Rejected
    }

    /// True once the fitting settled either way.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self.status(), Status::Fulfilled | Status::Rejected)
    }

    /// True once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status() == Status::Cancelled
    }
}

/// Weak producer handle for a [`Completion`].
#[derive(Clone)]
pub struct CompletionResolver {
    state: Weak<std::cell::RefCell<state::UnitState>>,
}

impl CompletionResolver {
    /// Records success. False when the fitting died or was settled.
    pub fn resolve(&self) -> bool {
        self.state.upgrade().is_some_and(|s| state::unit_resolve(&s))
    }

    /// Records failure. False when the fitting died or was settled.
    pub fn reject(&self, err: Error) -> bool {
        self.state
            .upgrade()
            .is_some_and(|s| state::unit_reject(&s, err))
    }

    /// Cancels the fitting, if still alive.
    pub fn cancel(&self) {
        if let Some(s) = self.state.upgrade() {
            state::unit_cancel(&s);
        }
    }

    /// True once every consumer handle has been dropped.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.state.strong_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{general_category, EventError};
    use crate::test_utils::ManualExecutor;
    use std::cell::{Cell, RefCell};

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn attach_then_resolve_runs_on_the_executor() {
        init_test("attach_then_resolve_runs_on_the_executor");
        let exec = ManualExecutor::new();
        let observed = Rc::new(Cell::new(0));

        let p1: Promise<i32> = Promise::new();
        assert!(p1.is_empty());

        let seen = Rc::clone(&observed);
        let p2 = p1.then_unit(
            move |outcome| {
                seen.set(outcome.ok().expect("value"));
                Ok(())
            },
            Some(exec.executor()),
        );
        assert!(p1.is_empty());
        assert!(p2.is_empty());
        assert_eq!(exec.len(), 0);

        assert!(p1.resolver().resolve(2022));
        assert_eq!(exec.len(), 1);
        assert!(p1.is_pending());
        assert!(p2.is_empty());

        exec.run();
        crate::assert_with_log!(observed.get() == 2022, "value seen", 2022, observed.get());
        assert!(p1.is_fulfilled());
        assert!(p2.is_fulfilled());
        crate::test_complete!("attach_then_resolve_runs_on_the_executor");
    }

    #[test]
    fn resolve_then_attach_still_fires() {
        init_test("resolve_then_attach_still_fires");
        let exec = ManualExecutor::new();
        let p: Promise<i32> = Promise::new();
        p.resolve(2022);

        let outer = p.then(
            |outcome| Outcome::Ok(outcome.ok().expect("value") + 1),
            Some(exec.executor()),
        );
        let observed = Rc::new(Cell::new(0));
        let seen = Rc::clone(&observed);
        outer.done(move |outcome| seen.set(outcome.ok().expect("value")), Some(exec.executor()));

        exec.run();
        assert!(p.is_fulfilled());
        crate::assert_with_log!(observed.get() == 2023, "chained value", 2023, observed.get());
        crate::test_complete!("resolve_then_attach_still_fires");
    }

    #[test]
    fn rejection_propagates_the_same_error() {
        init_test("rejection_propagates_the_same_error");
        let exec = ManualExecutor::new();
        let p1: Promise<i32> = Promise::new();
        let p2 = p1.then(|outcome| outcome, Some(exec.executor()));

        let expected = Error::new(general_category("unit"), 7).with_message("fail");
        assert!(p1.reject(expected.clone()));
        exec.run();

        assert!(p1.is_rejected());
        assert!(p2.is_unsatisfied());

        let observed = Rc::new(RefCell::new(None));
        let seen = Rc::clone(&observed);
        p2.done(
            move |outcome| *seen.borrow_mut() = outcome.err(),
            Some(exec.executor()),
        );
        exec.run();
        let err = observed.borrow_mut().take().expect("error");
        crate::assert_with_log!(err == expected, "same error", expected, err);
        crate::test_complete!("rejection_propagates_the_same_error");
    }

    #[test]
    fn inner_promise_is_flattened() {
        init_test("inner_promise_is_flattened");
        let exec = ManualExecutor::new();
        let captured: Rc<RefCell<Option<Resolver<bool>>>> = Rc::new(RefCell::new(None));

        let p1: Promise<i32> = Promise::new();
        let slot = Rc::clone(&captured);
        let outer = p1.then_promise(
            move |outcome| {
                assert_eq!(outcome.ok(), Some(1024));
                let inner: Promise<bool> = Promise::new();
                *slot.borrow_mut() = Some(inner.resolver());
                inner
            },
            Some(exec.executor()),
        );

        p1.resolve(1024);
        exec.run();
        assert!(outer.is_empty(), "inner not settled yet");

        let resolver = captured.borrow_mut().take().expect("resolver captured");
        assert!(resolver.resolve(true));
        exec.run();
        assert!(outer.is_satisfied());

        let observed = Rc::new(Cell::new(false));
        let seen = Rc::clone(&observed);
        outer.done(move |outcome| seen.set(outcome.ok().expect("value")), Some(exec.executor()));
        exec.run();
        crate::assert_with_log!(observed.get(), "flattened value", true, observed.get());
        crate::test_complete!("inner_promise_is_flattened");
    }

    #[test]
    fn first_settlement_wins() {
        init_test("first_settlement_wins");
        let p: Promise<u32> = Promise::new();
        assert!(p.resolve(1));
        assert!(!p.resolve(2));
        assert!(!p.reject(Error::sys(1)));
        assert!(p.is_satisfied());

        let q: Promise<u32> = Promise::new();
        assert!(q.reject(Error::sys(1)));
        assert!(!q.resolve(3));
        assert!(q.is_unsatisfied());
        crate::test_complete!("first_settlement_wins");
    }

    #[test]
    fn null_executor_runs_inline() {
        init_test("null_executor_runs_inline");
        let observed = Rc::new(Cell::new(0));
        let p: Promise<i32> = Promise::new();
        let seen = Rc::clone(&observed);
        p.done(move |outcome| seen.set(outcome.ok().expect("value")), None);

        p.resolve(5);
        crate::assert_with_log!(observed.get() == 5, "inline at settlement", 5, observed.get());
        assert!(p.is_fulfilled());
        crate::test_complete!("null_executor_runs_inline");
    }

    #[test]
    fn cancel_races_the_queued_continuation() {
        init_test("cancel_races_the_queued_continuation");
        let exec = ManualExecutor::new();
        let ran = Rc::new(Cell::new(false));

        let p: Promise<i32> = Promise::new();
        let seen = Rc::clone(&ran);
        let outer = p.then(
            move |outcome| {
                seen.set(true);
                outcome
            },
            Some(exec.executor()),
        );

        p.resolve(1);
        assert_eq!(exec.len(), 1);
        p.cancel();
        exec.run();

        assert!(!ran.get(), "continuation silently dropped");
        assert!(p.is_cancelled());
        assert!(outer.is_cancelled());
        crate::test_complete!("cancel_races_the_queued_continuation");
    }

    #[test]
    fn cancel_is_idempotent() {
        init_test("cancel_is_idempotent");
        let p: Promise<i32> = Promise::new();
        p.cancel();
        p.cancel();
        assert!(p.is_cancelled());

        // Terminal states refuse the shortcut.
        let q: Promise<i32> = Promise::new();
        q.done(|_| {}, None);
        q.resolve(1);
        assert!(q.is_fulfilled());
        q.cancel();
        assert!(q.is_fulfilled());
        crate::test_complete!("cancel_is_idempotent");
    }

    #[test]
    fn dropping_the_tail_collects_the_chain() {
        init_test("dropping_the_tail_collects_the_chain");
        let exec = ManualExecutor::new();
        let head: Promise<i32> = Promise::new();
        let resolver = head.resolver();

        let tail = {
            let mid = head.then(|o| o, Some(exec.executor()));
            mid.then(|o| o, Some(exec.executor()))
        };
        drop(head);
        assert!(!resolver.is_expired(), "tail keeps the chain alive");

        drop(tail);
        assert!(resolver.is_expired(), "chain collected tail to head");
        assert!(!resolver.resolve(1));
        crate::test_complete!("dropping_the_tail_collects_the_chain");
    }

    #[test]
    fn continuation_panic_rejects_the_outer_promise() {
        init_test("continuation_panic_rejects_the_outer_promise");
        let exec = ManualExecutor::new();
        let p: Promise<i32> = Promise::new();
        let outer: Promise<i32> = p.then(|_| panic!("boom"), Some(exec.executor()));

        p.resolve(1);
        exec.run();

        let observed = Rc::new(RefCell::new(None));
        let seen = Rc::clone(&observed);
        outer.done(move |o| *seen.borrow_mut() = o.err(), Some(exec.executor()));
        exec.run();

        let err = observed.borrow_mut().take().expect("error");
        crate::assert_with_log!(
            err.code() == EventError::ContinuationPanic as i32,
            "panic converted to rejection",
            EventError::ContinuationPanic as i32,
            err.code()
        );
        assert_eq!(err.message(), Some("boom"));
        crate::test_complete!("continuation_panic_rejects_the_outer_promise");
    }

    #[test]
    fn completion_flattening_forwards_synchronously() {
        init_test("completion_flattening_forwards_synchronously");
        let exec = ManualExecutor::new();
        let captured: Rc<RefCell<Option<CompletionResolver>>> = Rc::new(RefCell::new(None));

        let p: Promise<i32> = Promise::new();
        let slot = Rc::clone(&captured);
        let outer = p.then_completion(
            move |_| {
                let inner = Completion::new();
                *slot.borrow_mut() = Some(inner.resolver());
                inner
            },
            Some(exec.executor()),
        );

        p.resolve(1);
        exec.run();
        assert!(outer.is_empty());

        let resolver = captured.borrow_mut().take().expect("resolver");
        assert!(resolver.resolve());
        assert!(outer.is_fulfilled(), "no executor hop for the fitting");
        assert_eq!(outer.pass_result(), Some(Ok(())));
        crate::test_complete!("completion_flattening_forwards_synchronously");
    }

    #[test]
    fn already_settled_completion_flattens_immediately() {
        init_test("already_settled_completion_flattens_immediately");
        let exec = ManualExecutor::new();
        let p: Promise<i32> = Promise::new();
        let outer = p.then_completion(
            |_| {
                let inner = Completion::new();
                inner.reject(Error::sys(13));
                inner
            },
            Some(exec.executor()),
        );

        p.resolve(1);
        exec.run();
        assert!(outer.is_rejected());
        crate::test_complete!("already_settled_completion_flattens_immediately");
    }

    #[test]
    fn notifier_delivers_none_error_on_success() {
        init_test("notifier_delivers_none_error_on_success");
        let observed = Rc::new(RefCell::new(None));

        let seen = Rc::clone(&observed);
        resolved_notifier().then(move |err| *seen.borrow_mut() = Some(err), None);
        assert!(observed.borrow().as_ref().expect("ran").is_none());

        let seen = Rc::clone(&observed);
        rejected_notifier(Error::sys(5)).then(move |err| *seen.borrow_mut() = Some(err), None);
        assert!(observed.borrow().as_ref().expect("ran").is_sys());
        crate::test_complete!("notifier_delivers_none_error_on_success");
    }

    #[test]
    fn resolver_queries_track_the_lifecycle() {
        init_test("resolver_queries_track_the_lifecycle");
        let exec = ManualExecutor::new();
        let p: Promise<i32> = Promise::new();
        let resolver = p.resolver();

        assert_eq!(resolver.is_empty(), Some(true));
        assert_eq!(resolver.is_settled(), Some(false));

        p.done(|_| {}, Some(exec.executor()));
        resolver.resolve(9);
        assert_eq!(resolver.is_settled(), Some(true));
        assert_eq!(resolver.is_done(), Some(false));
        assert_eq!(resolver.is_satisfied(), Some(true));

        exec.run();
        assert_eq!(resolver.is_done(), Some(true));

        drop(p);
        assert_eq!(resolver.is_done(), None);
        assert!(resolver.is_expired());
        crate::test_complete!("resolver_queries_track_the_lifecycle");
    }

    #[test]
    fn make_hands_out_clonable_settlers() {
        init_test("make_hands_out_clonable_settlers");
        let p = make::<i32, _>(|resolve, reject| {
            let resolve2 = resolve.clone();
            assert!(resolve.call(11));
            assert!(!resolve2.call(12));
            assert!(!reject.call(Error::sys(1)));
        });
        assert!(p.is_satisfied());
        crate::test_complete!("make_hands_out_clonable_settlers");
    }

    #[test]
    fn set_routes_outcomes() {
        init_test("set_routes_outcomes");
        let p: Promise<i32> = Promise::new();
        assert!(!p.set(Outcome::Empty));
        assert!(p.set(Outcome::Ok(3)));
        assert!(p.is_satisfied());

        let q: Promise<i32> = Promise::new();
        assert!(q.set(Outcome::Err(Error::sys(2))));
        assert!(q.is_unsatisfied());
        crate::test_complete!("set_routes_outcomes");
    }

    #[test]
    fn has_handler_reflects_attachment_and_consumption() {
        init_test("has_handler_reflects_attachment_and_consumption");
        let exec = ManualExecutor::new();
        let p: Promise<i32> = Promise::new();
        assert!(!p.has_handler());
        p.done(|_| {}, Some(exec.executor()));
        assert!(p.has_handler());
        p.resolve(1);
        exec.run();
        assert!(!p.has_handler(), "continuation consumed on invocation");
        crate::test_complete!("has_handler_reflects_attachment_and_consumption");
    }
}
