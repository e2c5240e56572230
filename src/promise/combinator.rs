//! Combinators over finite collections of promises.
//!
//! Each combinator attaches one sink per input, shares a counter context
//! among the siblings, and pins the input container on the returned
//! promise so the inputs stay alive until every sibling has run. The
//! first settlement that matters wins the outer promise; everything that
//! arrives afterwards is accepted and discarded.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, EventError};
use crate::runtime::executor::ExecutorRef;
use crate::types::Outcome;

use super::{make, rejected, resolved, Promise};

/// Resolves with every input's value, in input order, once all inputs
/// resolve; rejects with the first error observed. Empty input resolves
/// with an empty sequence.
pub fn all<T, I>(inputs: I, executor: Option<ExecutorRef>) -> Promise<Vec<T>>
where
    T: 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let inputs: Vec<Promise<T>> = inputs.into_iter().collect();
    if inputs.is_empty() {
        return resolved(Vec::new());
    }

    struct AllContext<T> {
        remaining: usize,
        values: Vec<Option<T>>,
    }

    let context = Rc::new(RefCell::new(AllContext {
        remaining: inputs.len(),
        values: (0..inputs.len()).map(|_| None).collect(),
    }));

    let promise = make(|resolve, reject| {
        for (index, input) in inputs.iter().enumerate() {
            let context = Rc::clone(&context);
            let resolve = resolve.clone();
            let reject = reject.clone();
            input.done(
                move |outcome| match outcome {
                    Outcome::Ok(value) => {
                        let finished = {
                            let mut ctx = context.borrow_mut();
                            ctx.values[index] = Some(value);
                            ctx.remaining -= 1;
                            ctx.remaining == 0
                        };
                        if finished {
                            let values = context
                                .borrow_mut()
                                .values
                                .iter_mut()
                                .map(|slot| slot.take().expect("resolved slot"))
                                .collect();
                            resolve.call(values);
                        }
                    }
                    Outcome::Err(err) => {
                        reject.call(err);
                    }
                    Outcome::Empty => {
                        reject.call(Error::event_with(
                            EventError::UnsupportedEvent,
                            "empty result",
                        ));
                    }
                },
                executor.clone(),
            );
        }
    });
    promise.pin_attachment(Box::new(inputs));
    promise
}

/// Resolves with the first value observed; rejects only when every input
/// rejected. Empty input rejects immediately.
pub fn any<T, I>(inputs: I, executor: Option<ExecutorRef>) -> Promise<T>
where
    T: 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let inputs: Vec<Promise<T>> = inputs.into_iter().collect();
    if inputs.is_empty() {
        return rejected(Error::event_with(
            EventError::PromiseAnyExhausted,
            "no promise",
        ));
    }

    let failures = Rc::new(RefCell::new(inputs.len()));

    let promise = make(|resolve, reject| {
        for input in &inputs {
            let failures = Rc::clone(&failures);
            let resolve = resolve.clone();
            let reject = reject.clone();
            input.done(
                move |outcome| match outcome {
                    Outcome::Ok(value) => {
                        resolve.call(value);
                    }
                    _ => {
                        let exhausted = {
                            let mut remaining = failures.borrow_mut();
                            *remaining -= 1;
                            *remaining == 0
                        };
                        if exhausted {
                            reject.call(Error::event_with(
                                EventError::PromiseAnyExhausted,
                                "no resolved promise",
                            ));
                        }
                    }
                },
                executor.clone(),
            );
        }
    });
    promise.pin_attachment(Box::new(inputs));
    promise
}

/// Settles with the first observed settlement, value or error. Empty
/// input rejects immediately.
pub fn race<T, I>(inputs: I, executor: Option<ExecutorRef>) -> Promise<T>
where
    T: 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let inputs: Vec<Promise<T>> = inputs.into_iter().collect();
    if inputs.is_empty() {
        return rejected(Error::event_with(EventError::PromiseRaceEmpty, "no promise"));
    }

    let promise = make(|resolve, reject| {
        for input in &inputs {
            let resolve = resolve.clone();
            let reject = reject.clone();
            input.done(
                move |outcome| match outcome {
                    Outcome::Ok(value) => {
                        resolve.call(value);
                    }
                    Outcome::Err(err) => {
                        reject.call(err);
                    }
                    Outcome::Empty => {
                        reject.call(Error::event_with(
                            EventError::UnsupportedEvent,
                            "empty result",
                        ));
                    }
                },
                executor.clone(),
            );
        }
    });
    promise.pin_attachment(Box::new(inputs));
    promise
}

impl<T: 'static> Promise<T> {
    /// Chains a continuation yielding a container of promises and resolves
    /// with all of their values in order.
    pub fn then_all<U, F>(&self, f: F, executor: Option<ExecutorRef>) -> Promise<Vec<U>>
    where
        U: 'static,
        F: FnOnce(Outcome<T>) -> Outcome<Vec<Promise<U>>> + 'static,
    {
        let exec = executor.clone();
        self.then_promise(
            move |outcome| match f(outcome) {
                Outcome::Ok(promises) => all(promises, exec),
                Outcome::Err(err) => rejected(err),
                Outcome::Empty => rejected(Error::event_with(
                    EventError::UnsupportedEvent,
                    "empty result",
                )),
            },
            executor,
        )
    }

    /// Chains a continuation yielding a container of promises and resolves
    /// with the first value among them.
    pub fn then_any<U, F>(&self, f: F, executor: Option<ExecutorRef>) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(Outcome<T>) -> Outcome<Vec<Promise<U>>> + 'static,
    {
        let exec = executor.clone();
        self.then_promise(
            move |outcome| match f(outcome) {
                Outcome::Ok(promises) => any(promises, exec),
                Outcome::Err(err) => rejected(err),
                Outcome::Empty => rejected(Error::event_with(
                    EventError::UnsupportedEvent,
                    "empty result",
                )),
            },
            executor,
        )
    }

    /// Chains a continuation yielding a container of promises and settles
    /// with the first settlement among them.
    pub fn then_race<U, F>(&self, f: F, executor: Option<ExecutorRef>) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(Outcome<T>) -> Outcome<Vec<Promise<U>>> + 'static,
    {
        let exec = executor.clone();
        self.then_promise(
            move |outcome| match f(outcome) {
                Outcome::Ok(promises) => race(promises, exec),
                Outcome::Err(err) => rejected(err),
                Outcome::Empty => rejected(Error::event_with(
                    EventError::UnsupportedEvent,
                    "empty result",
                )),
            },
            executor,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ManualExecutor;
    use std::cell::Cell;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn collect<T: Clone + 'static>(promise: &Promise<T>, exec: &Rc<ManualExecutor>) -> Rc<RefCell<Outcome<T>>> {
        let slot = Rc::new(RefCell::new(Outcome::Empty));
        let seen = Rc::clone(&slot);
        promise.done(move |outcome| *seen.borrow_mut() = outcome, Some(exec.executor()));
        slot
    }

    #[test]
    fn all_resolves_in_input_order() {
        init_test("all_resolves_in_input_order");
        let exec = ManualExecutor::new();
        let outer = all(
            vec![resolved(1), resolved(2), resolved(3)],
            Some(exec.executor()),
        );
        let slot = collect(&outer, &exec);
        exec.run();
        crate::assert_with_log!(
            *slot.borrow() == Outcome::Ok(vec![1, 2, 3]),
            "input order preserved",
            "[1, 2, 3]",
            format!("{:?}", slot.borrow())
        );
        crate::test_complete!("all_resolves_in_input_order");
    }

    #[test]
    fn all_preserves_order_with_out_of_order_settlement() {
        init_test("all_preserves_order_with_out_of_order_settlement");
        let exec = ManualExecutor::new();
        let first: Promise<i32> = Promise::new();
        let second: Promise<i32> = Promise::new();
        let r1 = first.resolver();
        let r2 = second.resolver();

        let outer = all(vec![first, second], Some(exec.executor()));
        let slot = collect(&outer, &exec);

        r2.resolve(20);
        r1.resolve(10);
        exec.run();
        assert_eq!(*slot.borrow(), Outcome::Ok(vec![10, 20]));
        crate::test_complete!("all_preserves_order_with_out_of_order_settlement");
    }

    #[test]
    fn all_rejects_with_the_first_error() {
        init_test("all_rejects_with_the_first_error");
        let exec = ManualExecutor::new();
        let pending: Promise<i32> = Promise::new();
        let resolver = pending.resolver();
        let outer = all(
            vec![resolved(1), rejected(Error::sys(9)), pending],
            Some(exec.executor()),
        );
        let slot = collect(&outer, &exec);
        exec.run();
        assert_eq!(slot.borrow().error().map(Error::code), Some(9));

        // A late resolution is accepted by the input but discarded.
        assert!(resolver.resolve(3));
        exec.run();
        assert_eq!(slot.borrow().error().map(Error::code), Some(9));
        crate::test_complete!("all_rejects_with_the_first_error");
    }

    #[test]
    fn all_of_nothing_resolves_empty() {
        init_test("all_of_nothing_resolves_empty");
        let outer: Promise<Vec<i32>> = all(Vec::new(), None);
        assert!(outer.is_satisfied());
        crate::test_complete!("all_of_nothing_resolves_empty");
    }

    #[test]
    fn any_takes_the_first_value_after_failures() {
        init_test("any_takes_the_first_value_after_failures");
        let exec = ManualExecutor::new();
        let outer = any(
            vec![
                rejected(Error::sys(1)),
                rejected(Error::sys(2)),
                resolved(123),
            ],
            Some(exec.executor()),
        );
        let slot = collect(&outer, &exec);
        exec.run();
        assert_eq!(*slot.borrow(), Outcome::Ok(123));
        crate::test_complete!("any_takes_the_first_value_after_failures");
    }

    #[test]
    fn any_rejects_only_when_exhausted() {
        init_test("any_rejects_only_when_exhausted");
        let exec = ManualExecutor::new();
        let outer: Promise<i32> = any(
            vec![rejected(Error::sys(1)), rejected(Error::sys(2))],
            Some(exec.executor()),
        );
        let slot = collect(&outer, &exec);
        exec.run();
        let err = slot.borrow().error().cloned().expect("rejected");
        assert_eq!(err.code(), EventError::PromiseAnyExhausted as i32);
        assert_eq!(err.message(), Some("no resolved promise"));
        crate::test_complete!("any_rejects_only_when_exhausted");
    }

    #[test]
    fn any_of_nothing_rejects() {
        init_test("any_of_nothing_rejects");
        let outer: Promise<i32> = any(Vec::new(), None);
        assert!(outer.is_unsatisfied());
        crate::test_complete!("any_of_nothing_rejects");
    }

    #[test]
    fn race_takes_the_first_settlement() {
        init_test("race_takes_the_first_settlement");
        let exec = ManualExecutor::new();
        let slow: Promise<i32> = Promise::new();
        let outer = race(vec![slow, resolved(7)], Some(exec.executor()));
        let slot = collect(&outer, &exec);
        exec.run();
        assert_eq!(*slot.borrow(), Outcome::Ok(7));

        let exec = ManualExecutor::new();
        let slow: Promise<i32> = Promise::new();
        let outer = race(
            vec![rejected(Error::sys(3)), slow],
            Some(exec.executor()),
        );
        let slot = collect(&outer, &exec);
        exec.run();
        assert_eq!(slot.borrow().error().map(Error::code), Some(3));
        crate::test_complete!("race_takes_the_first_settlement");
    }

    #[test]
    fn race_of_nothing_rejects() {
        init_test("race_of_nothing_rejects");
        let exec = ManualExecutor::new();
        let outer: Promise<i32> = race(Vec::new(), None);
        let slot = collect(&outer, &exec);
        exec.run();
        let err = slot.borrow().error().cloned().expect("rejected");
        assert_eq!(err.code(), EventError::PromiseRaceEmpty as i32);
        crate::test_complete!("race_of_nothing_rejects");
    }

    #[test]
    fn then_all_flattens_a_produced_container() {
        init_test("then_all_flattens_a_produced_container");
        let exec = ManualExecutor::new();
        let p: Promise<i32> = Promise::new();
        let outer = p.then_all(
            |outcome| {
                let base = outcome.ok().expect("value");
                Outcome::Ok(vec![resolved(base), resolved(base + 1)])
            },
            Some(exec.executor()),
        );
        let slot = collect(&outer, &exec);

        p.resolve(40);
        exec.run();
        assert_eq!(*slot.borrow(), Outcome::Ok(vec![40, 41]));
        crate::test_complete!("then_all_flattens_a_produced_container");
    }

    #[test]
    fn then_any_and_then_race_follow_the_same_pattern() {
        init_test("then_any_and_then_race_follow_the_same_pattern");
        let exec = ManualExecutor::new();
        let p: Promise<i32> = Promise::new();
        let outer = p.then_any(
            |_| Outcome::Ok(vec![rejected(Error::sys(1)), resolved(5)]),
            Some(exec.executor()),
        );
        let slot = collect(&outer, &exec);
        p.resolve(0);
        exec.run();
        assert_eq!(*slot.borrow(), Outcome::Ok(5));

        let exec = ManualExecutor::new();
        let p: Promise<i32> = Promise::new();
        let outer = p.then_race(
            |_| Outcome::Ok(vec![resolved(8), rejected(Error::sys(1))]),
            Some(exec.executor()),
        );
        let slot = collect(&outer, &exec);
        p.resolve(0);
        exec.run();
        assert_eq!(*slot.borrow(), Outcome::Ok(8));
        crate::test_complete!("then_any_and_then_race_follow_the_same_pattern");
    }

    #[test]
    fn then_all_propagates_the_continuation_error() {
        init_test("then_all_propagates_the_continuation_error");
        let exec = ManualExecutor::new();
        let p: Promise<i32> = Promise::new();
        let outer = p.then_all(
            |_| Outcome::<Vec<Promise<i32>>>::Err(Error::sys(22)),
            Some(exec.executor()),
        );
        let slot = collect(&outer, &exec);
        p.resolve(0);
        exec.run();
        assert_eq!(slot.borrow().error().map(Error::code), Some(22));
        crate::test_complete!("then_all_propagates_the_continuation_error");
    }

    #[test]
    fn inputs_stay_alive_through_the_attachment() {
        init_test("inputs_stay_alive_through_the_attachment");
        let exec = ManualExecutor::new();
        let input: Promise<i32> = Promise::new();
        let resolver = input.resolver();

        let outer = all(vec![input], Some(exec.executor()));
        let slot = collect(&outer, &exec);
        assert!(!resolver.is_expired(), "outer promise pins its inputs");

        resolver.resolve(1);
        exec.run();
        assert_eq!(*slot.borrow(), Outcome::Ok(vec![1]));

        drop(outer);
        assert!(resolver.is_expired());
        crate::test_complete!("inputs_stay_alive_through_the_attachment");
    }

    #[test]
    fn late_resolutions_after_any_win_are_discarded() {
        init_test("late_resolutions_after_any_win_are_discarded");
        let exec = ManualExecutor::new();
        let slow: Promise<i32> = Promise::new();
        let resolver = slow.resolver();
        let outer = any(vec![resolved(1), slow], Some(exec.executor()));
        let counted = Rc::new(Cell::new(0));
        let seen = Rc::clone(&counted);
        outer.done(
            move |outcome| {
                assert_eq!(outcome.ok(), Some(1));
                seen.set(seen.get() + 1);
            },
            Some(exec.executor()),
        );
        exec.run();
        assert_eq!(counted.get(), 1);

        assert!(resolver.resolve(2), "input still accepts its settlement");
        exec.run();
        assert_eq!(counted.get(), 1, "outer already settled");
        crate::test_complete!("late_resolutions_after_any_win_are_discarded");
    }
}
