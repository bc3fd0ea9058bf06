//! Reactive stream runtime with demand-driven backpressure.
//!
//! The contract is the Reactive Streams one: a [`Subscriber`] receives a
//! [`Subscription`] and pulls items with `request(n)`; upstream never emits
//! more `on_next` calls than the cumulative demand, and `on_error` /
//! `on_complete` are terminal. Operators are lazy values that wire an
//! internal subscriber onto their upstream only when subscribed themselves.
//!
//! A [`Publisher`] is single-shot: subscribing or chaining consumes it.
//! Within one pipeline segment all callbacks run on the caller's thread;
//! the [`threaded_worker`] boundary is the only place execution hops
//! threads, and its handoff queue is the only shared mutable state.
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use vidflow::streams::publishers;
//!
//! let squares = publishers::range(2, 5).map(|i| i * i);
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! let deferred = squares.process(move |i| sink.lock().unwrap().push(i));
//! assert!(matches!(deferred.try_result(), Some(Ok(()))));
//! assert_eq!(*seen.lock().unwrap(), vec![4, 9, 16]);
//! ```

use std::sync::Arc;

use crate::error::{PipelineError, Result};

mod compat;
mod deferred;
pub mod generators;
mod interval;
mod operators;
pub mod publishers;
mod signal_breaker;
mod sinks;
mod worker;

pub use compat::PublisherStream;
pub use deferred::{Deferred, Resolver};
pub use generators::AsyncObserver;
pub use interval::interval;
pub use signal_breaker::signal_breaker;
pub use sinks::WriteSink;
pub use worker::threaded_worker;

/// Demand and cancellation handle delivered to a subscriber.
///
/// Handles are shared (`Arc`) so operators can retain a cancel capability
/// while forwarding the same handle downstream.
pub trait Subscription: Send + Sync {
    /// Ask upstream for up to `n` more items. `request(0)` is a no-op.
    fn request(&self, n: u64);

    /// Terminally unsubscribe. Propagates synchronously up the chain; no
    /// `on_next` may be forwarded afterwards.
    fn cancel(&self);
}

/// Shared subscription handle.
pub type SubscriptionRef = Arc<dyn Subscription>;

/// Receiver half of a stream.
///
/// After `on_error` or `on_complete` no further call is legal, and
/// `on_next` is only invoked while there is outstanding demand.
pub trait Observer<T> {
    fn on_next(&mut self, item: T);
    fn on_error(&mut self, error: PipelineError);
    fn on_complete(&mut self);
}

/// An [`Observer`] that can be wired to an upstream.
///
/// The upstream keeps the subscriber alive until a terminal signal or a
/// cancel, then releases it deterministically.
pub trait Subscriber<T>: Observer<T> + Send {
    fn on_subscribe(&mut self, subscription: SubscriptionRef);
}

/// Internal capability backing a [`Publisher`].
pub(crate) trait Subscribe<T>: Send {
    fn subscribe(self: Box<Self>, subscriber: Box<dyn Subscriber<T>>);
}

/// A publisher-to-publisher transformer, composed with [`Publisher::lift`].
pub type StreamOp<S, T> = Box<dyn FnOnce(Publisher<S>) -> Publisher<T> + Send>;

/// An owned, single-shot stream of `T`.
///
/// Every combinator consumes `self` and returns a new publisher; no work
/// happens before [`subscribe`](Publisher::subscribe) (directly or through
/// [`process`](Publisher::process)).
pub struct Publisher<T> {
    inner: Box<dyn Subscribe<T>>,
}

impl<T: Send + 'static> Publisher<T> {
    pub(crate) fn from_subscribe(inner: impl Subscribe<T> + 'static) -> Self {
        Self { inner: Box::new(inner) }
    }

    /// Start the flow by wiring `subscriber` onto this publisher.
    pub fn subscribe<S>(self, subscriber: S)
    where
        S: Subscriber<T> + 'static,
    {
        self.inner.subscribe(Box::new(subscriber));
    }

    pub(crate) fn subscribe_boxed(self, subscriber: Box<dyn Subscriber<T>>) {
        self.inner.subscribe(subscriber);
    }

    /// Transform each item. Demand propagates 1:1.
    pub fn map<U, F>(self, f: F) -> Publisher<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        operators::map(self, f)
    }

    /// Transform each item fallibly. A transform error terminates the
    /// stream with `on_error` and cancels upstream.
    pub fn try_map<U, F>(self, f: F) -> Publisher<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Result<U> + Send + 'static,
    {
        operators::try_map(self, f)
    }

    /// Substitute a derived stream for each item, strictly sequentially:
    /// the next upstream item is pulled only once the current derived
    /// publisher completes.
    pub fn flat_map<U, F>(self, f: F) -> Publisher<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Publisher<U> + Send + 'static,
    {
        operators::flat_map(self, f)
    }

    /// Forward the first `count` items, then complete and cancel upstream.
    /// Upstream is never asked for more than the remaining window.
    pub fn take(self, count: u64) -> Publisher<T> {
        operators::take(self, count)
    }

    /// Forward only the first item.
    pub fn head(self) -> Publisher<T> {
        self.take(1)
    }

    /// Forward items while `predicate` holds; the rejecting item is not
    /// emitted.
    pub fn take_while<P>(self, predicate: P) -> Publisher<T>
    where
        P: FnMut(&T) -> bool + Send + 'static,
    {
        operators::take_while(self, predicate)
    }

    /// Run `f` exactly once when the stream terminates for any reason:
    /// upstream completion, upstream error, or downstream cancel.
    pub fn do_finally<F>(self, f: F) -> Publisher<T>
    where
        F: FnOnce() + Send + 'static,
    {
        operators::do_finally(self, f)
    }

    /// Apply a publisher-to-publisher transformer, enabling user-defined
    /// operator packages to compose like built-ins.
    pub fn lift<U>(self, op: impl FnOnce(Publisher<T>) -> Publisher<U>) -> Publisher<U> {
        op(self)
    }

    /// Drain the stream with unbounded demand, invoking `on_next` per item.
    ///
    /// The returned [`Deferred`] resolves on the terminal event: `Ok(())`
    /// for completion, `Err` for a stream error.
    pub fn process<F>(self, on_next: F) -> Deferred<()>
    where
        F: FnMut(T) + Send + 'static,
    {
        let (deferred, resolver) = Deferred::new();
        self.subscribe(ProcessSubscriber::new(on_next, resolver));
        deferred
    }

    /// Bridge into a [`futures::Stream`] of `Result<T>`.
    ///
    /// Demand is pulled in small batches as the stream is polled; dropping
    /// the stream cancels the subscription.
    pub fn into_stream(self) -> PublisherStream<T> {
        compat::into_stream(self)
    }
}

struct ProcessSubscriber<T, F> {
    on_next: F,
    resolver: Option<Resolver<()>>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T, F> ProcessSubscriber<T, F> {
    fn new(on_next: F, resolver: Resolver<()>) -> Self {
        Self { on_next, resolver: Some(resolver), _marker: std::marker::PhantomData }
    }
}

impl<T, F: FnMut(T) + Send> Observer<T> for ProcessSubscriber<T, F> {
    fn on_next(&mut self, item: T) {
        (self.on_next)(item);
    }

    fn on_error(&mut self, error: PipelineError) {
        if let Some(resolver) = self.resolver.take() {
            resolver.fail(error);
        }
    }

    fn on_complete(&mut self) {
        if let Some(resolver) = self.resolver.take() {
            resolver.complete(());
        }
    }
}

impl<T, F: FnMut(T) + Send> Subscriber<T> for ProcessSubscriber<T, F> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        subscription.request(u64::MAX);
    }
}
