//! Weak- and strong-bound callables.
//!
//! A weak-bound callable captures a `Weak` handle to an object and invokes
//! the inner closure only while the object is still alive. This is the
//! primitive behind in-flight cancellation: a queued thunk bound to a
//! collected target silently evaporates instead of touching freed state.
//!
//! Three flavors:
//! - [`bind_weak`]: void return, no-op when the target is gone
//! - [`bind_weak_or`]: non-void return, yields the default value when the
//!   target is gone
//! - [`bind_strong`]: pins the target alive for the callable's lifetime

use std::rc::{Rc, Weak};

/// Binds `f` to a weak handle of `target`; the returned thunk invokes `f`
/// with the revived handle, or does nothing if the target was collected.
pub fn bind_weak<O, F>(target: &Rc<O>, f: F) -> impl FnOnce()
where
    F: FnOnce(Rc<O>),
{
    let weak: Weak<O> = Rc::downgrade(target);
    move || {
        if let Some(strong) = weak.upgrade() {
            f(strong);
        }
    }
}

/// Like [`bind_weak`], but for callables with a return value: when the
/// target was collected, the default value is returned instead.
pub fn bind_weak_or<O, R, F>(target: &Rc<O>, f: F) -> impl FnOnce() -> R
where
    R: Default,
    F: FnOnce(Rc<O>) -> R,
{
    let weak: Weak<O> = Rc::downgrade(target);
    move || weak.upgrade().map_or_else(R::default, f)
}

/// Binds `f` to a strong handle of `target`, keeping it alive until the
/// callable runs or is dropped.
pub fn bind_strong<O, F>(target: &Rc<O>, f: F) -> impl FnOnce()
where
    F: FnOnce(Rc<O>),
{
    let strong = Rc::clone(target);
    move || f(strong)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn weak_bound_runs_while_target_lives() {
        let target = Rc::new(Cell::new(0));
        let thunk = bind_weak(&target, |t| t.set(7));
        thunk();
        assert_eq!(target.get(), 7);
    }

    #[test]
    fn weak_bound_is_silent_after_collection() {
        let observed = Rc::new(Cell::new(false));
        let target = Rc::new(());
        let seen = Rc::clone(&observed);
        let thunk = bind_weak(&target, move |_| seen.set(true));
        drop(target);
        thunk();
        assert!(!observed.get());
    }

    #[test]
    fn weak_bound_with_return_yields_default_after_collection() {
        let target = Rc::new(5_u32);
        let live = bind_weak_or(&target, |t| *t);
        assert_eq!(live(), 5);

        let target = Rc::new(5_u32);
        let dead = bind_weak_or(&target, |t| *t);
        drop(target);
        assert_eq!(dead(), 0);
    }

    #[test]
    fn strong_bound_keeps_target_alive() {
        let target = Rc::new(Cell::new(0));
        let weak = Rc::downgrade(&target);
        let thunk = bind_strong(&target, |t| t.set(3));
        drop(target);
        assert!(weak.upgrade().is_some());
        thunk();
        assert!(weak.upgrade().is_none());
    }
}
