//! Wheel-backed loop timers and their cancelation tokens.
//!
//! `add_timer_event` hands back a [`TimerToken`] that owns the scheduled
//! event: dropping the token cancels it. Expiry does not run the user
//! callback inline; the wheel event posts it through the loop's normal
//! executor path, so timer callbacks interleave with ordinary posted work
//! and may themselves schedule timers without re-entering the wheel.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::{Duration, SystemTime};

use crate::error::Error;
use crate::runtime::executor::ExecutorRef;
use crate::time::wheel::{EventKey, Tick, TimerWheel, WheelEvent};

pub(crate) type TimerHandler = Box<dyn FnOnce(Error)>;

/// A wheel event that defers its callback to the loop executor.
pub(crate) struct LoopTimerEvent {
    callback: Option<TimerHandler>,
    executor: ExecutorRef,
    fired: Rc<Cell<bool>>,
}

impl WheelEvent for LoopTimerEvent {
    fn execute(mut self) {
        if let Some(callback) = self.callback.take() {
            self.fired.set(true);
            self.executor.post(Box::new(move || callback(Error::none())));
        }
    }

    fn on_cancel(mut self, err: Error) {
        if let Some(callback) = self.callback.take() {
            self.fired.set(true);
            self.executor.post(Box::new(move || callback(err)));
        }
    }
}

type WheelRef = Rc<RefCell<TimerWheel<LoopTimerEvent>>>;

/// The loop-side face of the timer wheel.
pub(crate) struct WheelTimer {
    core: WheelRef,
    tick: Duration,
}

impl WheelTimer {
    pub(crate) fn new(tick: Duration) -> Self {
        Self {
            core: Rc::new(RefCell::new(TimerWheel::new())),
            tick,
        }
    }

    pub(crate) fn add_after(
        &self,
        executor: ExecutorRef,
        callback: TimerHandler,
        delay: Duration,
    ) -> TimerToken {
        let ticks = (delay.as_nanos() / self.tick.as_nanos()).max(1) as Tick;
        self.schedule(executor, callback, ticks)
    }

    pub(crate) fn add_at(
        &self,
        executor: ExecutorRef,
        callback: TimerHandler,
        at: SystemTime,
    ) -> TimerToken {
        let delay = at
            .duration_since(SystemTime::now())
            .unwrap_or(self.tick);
        self.add_after(executor, callback, delay)
    }

    fn schedule(&self, executor: ExecutorRef, callback: TimerHandler, ticks: Tick) -> TimerToken {
        let fired = Rc::new(Cell::new(false));
        let event = LoopTimerEvent {
            callback: Some(callback),
            executor,
            fired: Rc::clone(&fired),
        };
        let key = self.core.borrow_mut().schedule(event, ticks);
        TimerToken {
            key: Some(key),
            wheel: Rc::downgrade(&self.core),
            fired,
        }
    }

    pub(crate) fn advance(&self, ticks: Tick) {
        self.core.borrow_mut().advance(ticks);
    }

    pub(crate) fn cancel_all(&self, err: Error) {
        self.core.borrow_mut().cancel_all(err);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.core.borrow().is_empty()
    }
}

/// Owning handle for one scheduled timer event.
///
/// Dropping the token cancels the event; a token whose event already
/// fired is inert. Use [`TimerToken::into_shared`] when several owners
/// need cancel rights over the same timer.
pub struct TimerToken {
    key: Option<EventKey>,
    wheel: Weak<RefCell<TimerWheel<LoopTimerEvent>>>,
    fired: Rc<Cell<bool>>,
}

impl TimerToken {
    /// Cancels the event if it has not fired, and empties the token.
    pub fn cancel(&mut self) {
        if let (Some(key), Some(wheel)) = (self.key.take(), self.wheel.upgrade()) {
            wheel.borrow_mut().cancel(key);
        }
    }

    /// True once the token no longer refers to an event.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.key.is_none()
    }

    /// True once the event's callback has been handed to the executor.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.key.is_some() && self.fired.get()
    }

    /// Converts to a clonable shared handle carrying the same cancel
    /// rights.
    #[must_use]
    pub fn into_shared(self) -> SharedTimerToken {
        SharedTimerToken {
            token: Rc::new(RefCell::new(self)),
        }
    }
}

impl Drop for TimerToken {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Clonable cancel handle over a [`TimerToken`].
#[derive(Clone)]
pub struct SharedTimerToken {
    token: Rc<RefCell<TimerToken>>,
}

impl SharedTimerToken {
    /// Cancels the underlying event if it has not fired.
    pub fn cancel(&self) {
        self.token.borrow_mut().cancel();
    }

    /// True once the event's callback has been handed to the executor.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.token.borrow().is_fired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ManualExecutor;

    fn timer_fixture() -> (WheelTimer, Rc<ManualExecutor>) {
        (WheelTimer::new(Duration::from_millis(1)), ManualExecutor::new())
    }

    #[test]
    fn expiry_posts_the_callback_with_the_none_error() {
        let (timer, exec) = timer_fixture();
        let observed = Rc::new(RefCell::new(None));
        let seen = Rc::clone(&observed);
        let token = timer.add_after(
            exec.executor(),
            Box::new(move |err| *seen.borrow_mut() = Some(err)),
            Duration::from_millis(5),
        );

        timer.advance(5);
        assert!(token.is_fired(), "callback handed off at expiry");
        assert!(observed.borrow().is_none(), "not run inline");
        exec.run();
        assert!(observed.borrow().as_ref().expect("ran").is_none());
    }

    #[test]
    fn cancelling_the_token_silences_the_timer() {
        let (timer, exec) = timer_fixture();
        let observed = Rc::new(Cell::new(false));
        let seen = Rc::clone(&observed);
        let mut token = timer.add_after(
            exec.executor(),
            Box::new(move |_| seen.set(true)),
            Duration::from_millis(5),
        );

        token.cancel();
        assert!(token.is_empty());
        timer.advance(10);
        exec.run();
        assert!(!observed.get());
        assert!(timer.is_empty());
    }

    #[test]
    fn dropping_the_token_cancels() {
        let (timer, exec) = timer_fixture();
        let observed = Rc::new(Cell::new(false));
        let seen = Rc::clone(&observed);
        let token = timer.add_after(
            exec.executor(),
            Box::new(move |_| seen.set(true)),
            Duration::from_millis(5),
        );
        drop(token);

        timer.advance(10);
        exec.run();
        assert!(!observed.get());
    }

    #[test]
    fn cancel_all_delivers_the_error_through_the_executor() {
        let (timer, exec) = timer_fixture();
        let observed = Rc::new(RefCell::new(None));
        let seen = Rc::clone(&observed);
        let _token = timer.add_after(
            exec.executor(),
            Box::new(move |err| *seen.borrow_mut() = Some(err)),
            Duration::from_millis(50),
        );

        timer.cancel_all(Error::sys(7));
        exec.run();
        assert!(observed.borrow().as_ref().expect("ran").is_sys());
    }

    #[test]
    fn shared_token_cancels_from_any_clone() {
        let (timer, exec) = timer_fixture();
        let observed = Rc::new(Cell::new(false));
        let seen = Rc::clone(&observed);
        let shared = timer
            .add_after(
                exec.executor(),
                Box::new(move |_| seen.set(true)),
                Duration::from_millis(5),
            )
            .into_shared();

        shared.clone().cancel();
        timer.advance(10);
        exec.run();
        assert!(!observed.get());
    }

    #[test]
    fn wall_clock_deadline_in_the_past_fires_promptly() {
        let (timer, exec) = timer_fixture();
        let observed = Rc::new(Cell::new(false));
        let seen = Rc::clone(&observed);
        let _token = timer.add_at(
            exec.executor(),
            Box::new(move |_| seen.set(true)),
            SystemTime::now() - Duration::from_secs(1),
        );

        timer.advance(1);
        exec.run();
        assert!(observed.get());
    }
}
