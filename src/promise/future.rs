//! Coroutine bridge: awaiting promises from async functions.
//!
//! A function can suspend on any [`Promise`] or [`Notifier`] by awaiting
//! it; the suspended frame is resumed through the current loop's normal
//! executor, never on the producer's stack. In the other direction,
//! [`promise_from`] and [`notifier_from`] adapt an async block into a
//! promise: the frame is driven by the current loop, a panic inside it
//! rejects the promise, and cancelling the promise drops the suspended
//! frame.

use std::cell::RefCell;
use std::future::{Future, IntoFuture};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::Error;
use crate::runtime::MessageLoop;
use crate::types::Outcome;

use super::state::panic_error;
use super::{Done, Notifier, Promise};

struct AwaitSlot<T> {
    result: Option<Outcome<T>>,
    waker: Option<Waker>,
}

/// Future adapter produced by awaiting a [`Promise`].
pub struct PromiseFuture<T: 'static> {
    promise: Promise<T>,
    attached: bool,
    slot: Rc<RefCell<AwaitSlot<T>>>,
}

impl<T: 'static> Future for PromiseFuture<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        {
            let mut slot = this.slot.borrow_mut();
            if let Some(result) = slot.result.take() {
                return Poll::Ready(result);
            }
            slot.waker = Some(cx.waker().clone());
        }
        if !this.attached {
            this.attached = true;
            let slot = Rc::clone(&this.slot);
            let executor = MessageLoop::current().map(|lp| lp.executor());
            this.promise.done(
                move |outcome| {
                    let waker = {
                        let mut slot = slot.borrow_mut();
                        slot.result = Some(outcome);
                        slot.waker.take()
                    };
                    if let Some(waker) = waker {
                        waker.wake();
                    }
                },
                executor,
            );
        }
        Poll::Pending
    }
}

impl<T: 'static> IntoFuture for Promise<T> {
    type Output = Outcome<T>;
    type IntoFuture = PromiseFuture<T>;

    fn into_future(self) -> PromiseFuture<T> {
        PromiseFuture {
            promise: self,
            attached: false,
            slot: Rc::new(RefCell::new(AwaitSlot {
                result: None,
                waker: None,
            })),
        }
    }
}

/// Future adapter produced by awaiting a [`Notifier`]; resolves to the
/// none error on success.
pub struct NotifierFuture {
    inner: PromiseFuture<Done>,
}

impl Future for NotifierFuture {
    type Output = Error;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().inner).poll(cx) {
            Poll::Ready(Outcome::Err(err)) => Poll::Ready(err),
            Poll::Ready(_) => Poll::Ready(Error::none()),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl IntoFuture for Notifier {
    type Output = Error;
    type IntoFuture = NotifierFuture;

    fn into_future(self) -> NotifierFuture {
        NotifierFuture {
            inner: self.into_promise().into_future(),
        }
    }
}

struct CatchFramePanic<T> {
    inner: Pin<Box<dyn Future<Output = Outcome<T>>>>,
}

impl<T> Future for CatchFramePanic<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.get_mut().inner.as_mut();
        match catch_unwind(AssertUnwindSafe(|| inner.poll(cx))) {
            Ok(poll) => poll,
            Err(payload) => Poll::Ready(Outcome::Err(panic_error(&payload))),
        }
    }
}

/// Adapts an async block into a [`Promise`].
///
/// The frame is spawned on the current loop and drives the promise to its
/// settlement. A panic inside the frame rejects the promise; cancelling
/// the promise aborts the frame, dropping it at its current suspension
/// point.
///
/// # Panics
///
/// Panics when no message loop exists on this thread.
pub fn promise_from<T, Fut>(future: Fut) -> Promise<T>
where
    T: 'static,
    Fut: Future<Output = Outcome<T>> + 'static,
{
    let message_loop =
        MessageLoop::current().expect("promise_from requires a message loop on this thread");
    let promise = Promise::new();
    let resolver = promise.resolver();
    let guarded = CatchFramePanic {
        inner: Box::pin(future),
    };
    let handle = message_loop.spawn(async move {
        let outcome = guarded.await;
        match outcome {
            Outcome::Ok(value) => {
                resolver.resolve(value);
            }
            Outcome::Err(err) => {
                resolver.reject(err);
            }
            Outcome::Empty => {
                resolver.cancel();
            }
        }
    });
    promise.set_frame(Box::new(move || handle.abort()));
    promise
}

/// Adapts an async block yielding an [`Error`] into a [`Notifier`]; the
/// none error signals success.
///
/// # Panics
///
/// Panics when no message loop exists on this thread.
pub fn notifier_from<Fut>(future: Fut) -> Notifier
where
    Fut: Future<Output = Error> + 'static,
{
    let mapped = async move {
        let err = future.await;
        if err.has_error() {
            Outcome::Err(err)
        } else {
            Outcome::Ok(Done)
        }
    };
    Notifier::from_promise(promise_from(mapped))
}
