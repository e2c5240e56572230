//! Property tests for the hierarchical timer wheel.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;

use eventide::{Tick, TimerWheel};

type RecorderWheel = TimerWheel<Box<dyn FnOnce()>>;

fn recording_wheel(deltas: &[Tick]) -> (RecorderWheel, Rc<RefCell<Vec<Tick>>>) {
    let mut wheel: RecorderWheel = TimerWheel::new();
    let fired = Rc::new(RefCell::new(Vec::new()));
    for &delta in deltas {
        let fired = Rc::clone(&fired);
        wheel.schedule(Box::new(move || fired.borrow_mut().push(delta)), delta);
    }
    (wheel, fired)
}

proptest! {
    /// Advancing past every deadline fires each event exactly once, in
    /// non-decreasing scheduled-tick order.
    #[test]
    fn advance_fires_everything_in_tick_order(
        deltas in prop::collection::vec(1..5_000u64, 1..50),
    ) {
        let (mut wheel, fired) = recording_wheel(&deltas);
        let horizon = deltas.iter().copied().max().unwrap_or(1);
        wheel.advance(horizon);

        let fired = fired.borrow();
        prop_assert_eq!(fired.len(), deltas.len());
        let mut sorted = deltas.clone();
        sorted.sort_unstable();
        let mut observed = fired.clone();
        observed.sort_unstable();
        prop_assert_eq!(&observed, &sorted);
        prop_assert!(fired.windows(2).all(|pair| pair[0] <= pair[1]));
        prop_assert!(wheel.is_empty());
    }

    /// A budgeted advance plus resumptions executes exactly the events an
    /// unbudgeted advance would, never exceeding the budget per call.
    #[test]
    fn budgeted_advance_matches_unbudgeted_totals(
        deltas in prop::collection::vec(1..2_000u64, 1..40),
        budget in 1..8usize,
    ) {
        let horizon = deltas.iter().copied().max().unwrap_or(1);

        let (mut unbudgeted, baseline) = recording_wheel(&deltas);
        unbudgeted.advance(horizon);

        let (mut budgeted, fired) = recording_wheel(&deltas);
        let mut completed = budgeted.advance_with_budget(horizon, budget);
        let mut before = 0;
        let mut rounds = 0;
        while !completed {
            let executed = fired.borrow().len();
            prop_assert!(executed - before <= budget);
            before = executed;
            completed = budgeted.advance_with_budget(0, budget);
            rounds += 1;
            prop_assert!(rounds < 10_000, "suspension failed to make progress");
        }

        prop_assert_eq!(fired.borrow().len(), baseline.borrow().len());
        prop_assert!(budgeted.is_empty());
    }

    /// The sleep bound never overshoots a level-0 event and is exact for
    /// the nearest one.
    #[test]
    fn ticks_to_next_event_is_exact_within_level_zero(
        deltas in prop::collection::vec(1..255u64, 1..20),
    ) {
        let (wheel, _fired) = recording_wheel(&deltas);
        let nearest = deltas.iter().copied().min().unwrap_or(0);
        prop_assert_eq!(wheel.ticks_to_next_event(Tick::MAX), nearest);
    }

    /// Cancelled events never fire, whatever else is scheduled.
    #[test]
    fn cancelled_events_stay_silent(
        deltas in prop::collection::vec(1..1_000u64, 2..20),
        cancel_index in 0..20usize,
    ) {
        let mut wheel: RecorderWheel = TimerWheel::new();
        let fired = Rc::new(RefCell::new(Vec::new()));
        let mut keys = Vec::new();
        for (index, &delta) in deltas.iter().enumerate() {
            let fired = Rc::clone(&fired);
            keys.push(wheel.schedule(
                Box::new(move || fired.borrow_mut().push(index)),
                delta,
            ));
        }

        let victim = cancel_index % keys.len();
        prop_assert!(wheel.cancel(keys[victim]));
        wheel.advance(2_000);

        prop_assert_eq!(fired.borrow().len(), deltas.len() - 1);
        prop_assert!(!fired.borrow().contains(&victim));
    }
}
