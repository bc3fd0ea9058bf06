//! Transforming operators.
//!
//! One-to-one operators (`map`, `try_map`, `take_while`) forward the
//! upstream subscription downstream unchanged, so demand propagates 1:1
//! without extra bookkeeping. `take` bounds what it will ever request;
//! `flat_map` linearizes derived streams under a pull-one-at-a-time state
//! machine.

use std::sync::{Arc, Mutex};

use crate::error::{PipelineError, Result};

use super::{Observer, Publisher, Subscribe, Subscriber, Subscription, SubscriptionRef};

// ---------------------------------------------------------------------------
// map / try_map
// ---------------------------------------------------------------------------

pub(super) fn map<T, U, F>(upstream: Publisher<T>, f: F) -> Publisher<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> U + Send + 'static,
{
    struct MapSubscribe<T, U, F> {
        upstream: Publisher<T>,
        f: F,
        _marker: std::marker::PhantomData<fn() -> U>,
    }

    struct MapSubscriber<U, F> {
        downstream: Box<dyn Subscriber<U>>,
        f: F,
        done: bool,
    }

    impl<T, U, F> Subscribe<U> for MapSubscribe<T, U, F>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        fn subscribe(self: Box<Self>, downstream: Box<dyn Subscriber<U>>) {
            self.upstream.subscribe_boxed(Box::new(MapSubscriber {
                downstream,
                f: self.f,
                done: false,
            }));
        }
    }

    impl<T, U, F> Observer<T> for MapSubscriber<U, F>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send,
    {
        fn on_next(&mut self, item: T) {
            if self.done {
                return;
            }
            self.downstream.on_next((self.f)(item));
        }

        fn on_error(&mut self, error: PipelineError) {
            if self.done {
                return;
            }
            self.done = true;
            self.downstream.on_error(error);
        }

        fn on_complete(&mut self) {
            if self.done {
                return;
            }
            self.done = true;
            self.downstream.on_complete();
        }
    }

    impl<T, U, F> Subscriber<T> for MapSubscriber<U, F>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send,
    {
        fn on_subscribe(&mut self, subscription: SubscriptionRef) {
            self.downstream.on_subscribe(subscription);
        }
    }

    Publisher::from_subscribe(MapSubscribe { upstream, f, _marker: std::marker::PhantomData })
}

pub(super) fn try_map<T, U, F>(upstream: Publisher<T>, f: F) -> Publisher<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> Result<U> + Send + 'static,
{
    struct TryMapSubscribe<T, U, F> {
        upstream: Publisher<T>,
        f: F,
        _marker: std::marker::PhantomData<fn() -> U>,
    }

    struct TryMapSubscriber<U, F> {
        downstream: Box<dyn Subscriber<U>>,
        f: F,
        upstream: Option<SubscriptionRef>,
        done: bool,
    }

    impl<T, U, F> Subscribe<U> for TryMapSubscribe<T, U, F>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnMut(T) -> Result<U> + Send + 'static,
    {
        fn subscribe(self: Box<Self>, downstream: Box<dyn Subscriber<U>>) {
            self.upstream.subscribe_boxed(Box::new(TryMapSubscriber {
                downstream,
                f: self.f,
                upstream: None,
                done: false,
            }));
        }
    }

    impl<T, U, F> Observer<T> for TryMapSubscriber<U, F>
    where
        U: Send + 'static,
        F: FnMut(T) -> Result<U> + Send,
    {
        fn on_next(&mut self, item: T) {
            if self.done {
                return;
            }
            match (self.f)(item) {
                Ok(mapped) => self.downstream.on_next(mapped),
                Err(error) => {
                    self.done = true;
                    if let Some(upstream) = self.upstream.take() {
                        upstream.cancel();
                    }
                    self.downstream.on_error(error);
                }
            }
        }

        fn on_error(&mut self, error: PipelineError) {
            if self.done {
                return;
            }
            self.done = true;
            self.downstream.on_error(error);
        }

        fn on_complete(&mut self) {
            if self.done {
                return;
            }
            self.done = true;
            self.downstream.on_complete();
        }
    }

    impl<T, U, F> Subscriber<T> for TryMapSubscriber<U, F>
    where
        U: Send + 'static,
        F: FnMut(T) -> Result<U> + Send,
    {
        fn on_subscribe(&mut self, subscription: SubscriptionRef) {
            self.upstream = Some(subscription.clone());
            self.downstream.on_subscribe(subscription);
        }
    }

    Publisher::from_subscribe(TryMapSubscribe { upstream, f, _marker: std::marker::PhantomData })
}

// ---------------------------------------------------------------------------
// take
// ---------------------------------------------------------------------------

pub(super) fn take<T: Send + 'static>(upstream: Publisher<T>, count: u64) -> Publisher<T> {
    struct TakeSubscribe<T> {
        upstream: Publisher<T>,
        count: u64,
    }

    struct TakeShared {
        /// Demand we may still forward upstream over the whole life of the
        /// window.
        grantable: u64,
        /// Items still to emit before completing.
        remaining: u64,
        upstream: Option<SubscriptionRef>,
        done: bool,
    }

    struct TakeSubscriber<T> {
        downstream: Box<dyn Subscriber<T>>,
        shared: Arc<Mutex<TakeShared>>,
    }

    struct TakeSubscription {
        shared: Arc<Mutex<TakeShared>>,
    }

    impl<T: Send + 'static> Subscribe<T> for TakeSubscribe<T> {
        fn subscribe(self: Box<Self>, downstream: Box<dyn Subscriber<T>>) {
            let shared = Arc::new(Mutex::new(TakeShared {
                grantable: self.count,
                remaining: self.count,
                upstream: None,
                done: false,
            }));
            self.upstream.subscribe_boxed(Box::new(TakeSubscriber { downstream, shared }));
        }
    }

    impl<T: Send + 'static> Observer<T> for TakeSubscriber<T> {
        fn on_next(&mut self, item: T) {
            let finished = {
                let mut s = self.shared.lock().unwrap();
                if s.done || s.remaining == 0 {
                    return;
                }
                s.remaining -= 1;
                let finished = s.remaining == 0;
                if finished {
                    s.done = true;
                }
                finished
            };
            self.downstream.on_next(item);
            if finished {
                let upstream = self.shared.lock().unwrap().upstream.take();
                if let Some(upstream) = upstream {
                    upstream.cancel();
                }
                self.downstream.on_complete();
            }
        }

        fn on_error(&mut self, error: PipelineError) {
            let was_done = {
                let mut s = self.shared.lock().unwrap();
                std::mem::replace(&mut s.done, true)
            };
            if !was_done {
                self.downstream.on_error(error);
            }
        }

        fn on_complete(&mut self) {
            let was_done = {
                let mut s = self.shared.lock().unwrap();
                std::mem::replace(&mut s.done, true)
            };
            if !was_done {
                self.downstream.on_complete();
            }
        }
    }

    impl<T: Send + 'static> Subscriber<T> for TakeSubscriber<T> {
        fn on_subscribe(&mut self, subscription: SubscriptionRef) {
            let empty_window = {
                let mut s = self.shared.lock().unwrap();
                s.upstream = Some(subscription);
                s.remaining == 0
            };
            self.downstream.on_subscribe(Arc::new(TakeSubscription { shared: self.shared.clone() }));
            if empty_window {
                // take(0): complete without ever requesting upstream
                let upstream = {
                    let mut s = self.shared.lock().unwrap();
                    if s.done {
                        return;
                    }
                    s.done = true;
                    s.upstream.take()
                };
                if let Some(upstream) = upstream {
                    upstream.cancel();
                }
                self.downstream.on_complete();
            }
        }
    }

    impl Subscription for TakeSubscription {
        fn request(&self, n: u64) {
            let (grant, upstream) = {
                let mut s = self.shared.lock().unwrap();
                if s.done {
                    return;
                }
                let grant = n.min(s.grantable);
                s.grantable -= grant;
                (grant, s.upstream.clone())
            };
            if grant > 0 {
                if let Some(upstream) = upstream {
                    upstream.request(grant);
                }
            }
        }

        fn cancel(&self) {
            let upstream = {
                let mut s = self.shared.lock().unwrap();
                if s.done {
                    return;
                }
                s.done = true;
                s.upstream.take()
            };
            if let Some(upstream) = upstream {
                upstream.cancel();
            }
        }
    }

    Publisher::from_subscribe(TakeSubscribe { upstream, count })
}

// ---------------------------------------------------------------------------
// take_while
// ---------------------------------------------------------------------------

pub(super) fn take_while<T, P>(upstream: Publisher<T>, predicate: P) -> Publisher<T>
where
    T: Send + 'static,
    P: FnMut(&T) -> bool + Send + 'static,
{
    struct TakeWhileSubscribe<T, P> {
        upstream: Publisher<T>,
        predicate: P,
    }

    struct TakeWhileSubscriber<T, P> {
        downstream: Box<dyn Subscriber<T>>,
        predicate: P,
        upstream: Option<SubscriptionRef>,
        done: bool,
    }

    impl<T, P> Subscribe<T> for TakeWhileSubscribe<T, P>
    where
        T: Send + 'static,
        P: FnMut(&T) -> bool + Send + 'static,
    {
        fn subscribe(self: Box<Self>, downstream: Box<dyn Subscriber<T>>) {
            self.upstream.subscribe_boxed(Box::new(TakeWhileSubscriber {
                downstream,
                predicate: self.predicate,
                upstream: None,
                done: false,
            }));
        }
    }

    impl<T, P> Observer<T> for TakeWhileSubscriber<T, P>
    where
        T: Send + 'static,
        P: FnMut(&T) -> bool + Send,
    {
        fn on_next(&mut self, item: T) {
            if self.done {
                return;
            }
            if (self.predicate)(&item) {
                self.downstream.on_next(item);
            } else {
                // the rejecting item is dropped, not emitted
                self.done = true;
                if let Some(upstream) = self.upstream.take() {
                    upstream.cancel();
                }
                self.downstream.on_complete();
            }
        }

        fn on_error(&mut self, error: PipelineError) {
            if self.done {
                return;
            }
            self.done = true;
            self.downstream.on_error(error);
        }

        fn on_complete(&mut self) {
            if self.done {
                return;
            }
            self.done = true;
            self.downstream.on_complete();
        }
    }

    impl<T, P> Subscriber<T> for TakeWhileSubscriber<T, P>
    where
        T: Send + 'static,
        P: FnMut(&T) -> bool + Send,
    {
        fn on_subscribe(&mut self, subscription: SubscriptionRef) {
            self.upstream = Some(subscription.clone());
            self.downstream.on_subscribe(subscription);
        }
    }

    Publisher::from_subscribe(TakeWhileSubscribe { upstream, predicate })
}

// ---------------------------------------------------------------------------
// do_finally
// ---------------------------------------------------------------------------

pub(super) fn do_finally<T, F>(upstream: Publisher<T>, f: F) -> Publisher<T>
where
    T: Send + 'static,
    F: FnOnce() + Send + 'static,
{
    struct FinallyGuard {
        f: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl FinallyGuard {
        fn fire(&self) {
            let f = self.f.lock().unwrap().take();
            if let Some(f) = f {
                f();
            }
        }
    }

    struct FinallySubscribe<T> {
        upstream: Publisher<T>,
        guard: Arc<FinallyGuard>,
    }

    struct FinallySubscriber<T> {
        downstream: Box<dyn Subscriber<T>>,
        guard: Arc<FinallyGuard>,
        done: bool,
    }

    struct FinallySubscription {
        upstream: SubscriptionRef,
        guard: Arc<FinallyGuard>,
    }

    impl<T: Send + 'static> Subscribe<T> for FinallySubscribe<T> {
        fn subscribe(self: Box<Self>, downstream: Box<dyn Subscriber<T>>) {
            self.upstream.subscribe_boxed(Box::new(FinallySubscriber {
                downstream,
                guard: self.guard,
                done: false,
            }));
        }
    }

    impl<T: Send + 'static> Observer<T> for FinallySubscriber<T> {
        fn on_next(&mut self, item: T) {
            if self.done {
                return;
            }
            self.downstream.on_next(item);
        }

        fn on_error(&mut self, error: PipelineError) {
            if self.done {
                return;
            }
            self.done = true;
            self.downstream.on_error(error);
            self.guard.fire();
        }

        fn on_complete(&mut self) {
            if self.done {
                return;
            }
            self.done = true;
            self.downstream.on_complete();
            self.guard.fire();
        }
    }

    impl<T: Send + 'static> Subscriber<T> for FinallySubscriber<T> {
        fn on_subscribe(&mut self, subscription: SubscriptionRef) {
            self.downstream.on_subscribe(Arc::new(FinallySubscription {
                upstream: subscription,
                guard: self.guard.clone(),
            }));
        }
    }

    impl Subscription for FinallySubscription {
        fn request(&self, n: u64) {
            self.upstream.request(n);
        }

        fn cancel(&self) {
            self.upstream.cancel();
            self.guard.fire();
        }
    }

    Publisher::from_subscribe(FinallySubscribe {
        upstream,
        guard: Arc::new(FinallyGuard { f: Mutex::new(Some(Box::new(f))) }),
    })
}

// ---------------------------------------------------------------------------
// flat_map
// ---------------------------------------------------------------------------

struct FlatMapShared<U> {
    downstream: Option<Box<dyn Subscriber<U>>>,
    upstream: Option<SubscriptionRef>,
    inner: Option<SubscriptionRef>,
    /// Downstream demand not yet satisfied.
    demand: u64,
    /// One upstream item was requested and has not arrived yet.
    upstream_pending: bool,
    upstream_done: bool,
    inner_active: bool,
    done: bool,
    pumping: bool,
}

type FlatMapRef<U> = Arc<Mutex<FlatMapShared<U>>>;

pub(super) fn flat_map<T, U, F>(upstream: Publisher<T>, f: F) -> Publisher<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> Publisher<U> + Send + 'static,
{
    struct FlatMapSubscribe<T, U, F> {
        upstream: Publisher<T>,
        f: F,
        _marker: std::marker::PhantomData<fn() -> U>,
    }

    impl<T, U, F> Subscribe<U> for FlatMapSubscribe<T, U, F>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnMut(T) -> Publisher<U> + Send + 'static,
    {
        fn subscribe(self: Box<Self>, mut downstream: Box<dyn Subscriber<U>>) {
            let shared: FlatMapRef<U> = Arc::new(Mutex::new(FlatMapShared {
                downstream: None,
                upstream: None,
                inner: None,
                demand: 0,
                upstream_pending: false,
                upstream_done: false,
                inner_active: false,
                done: false,
                pumping: false,
            }));
            downstream.on_subscribe(Arc::new(FlatMapSubscription { shared: shared.clone() }));
            {
                let mut s = shared.lock().unwrap();
                if s.done {
                    return;
                }
                s.downstream = Some(downstream);
            }
            self.upstream.subscribe_boxed(Box::new(FlatMapOuter { shared, f: self.f }));
        }
    }

    Publisher::from_subscribe(FlatMapSubscribe { upstream, f, _marker: std::marker::PhantomData })
}

/// Pull loop: one upstream item at a time, each drained through its derived
/// publisher before the next is requested. Reentrant invocations fold into
/// the running loop via the `pumping` claim.
fn pump<U: Send + 'static>(shared: &FlatMapRef<U>) {
    {
        let mut s = shared.lock().unwrap();
        if s.pumping {
            return;
        }
        s.pumping = true;
    }
    loop {
        enum Step<U> {
            RequestUpstream(SubscriptionRef),
            Complete(Box<dyn Subscriber<U>>),
        }

        let step = {
            let mut s = shared.lock().unwrap();
            if s.done {
                s.pumping = false;
                return;
            }
            if s.upstream_done && !s.inner_active && !s.upstream_pending {
                s.done = true;
                s.pumping = false;
                match s.downstream.take() {
                    Some(downstream) => Step::Complete(downstream),
                    None => return,
                }
            } else if s.demand > 0
                && !s.inner_active
                && !s.upstream_pending
                && !s.upstream_done
            {
                match s.upstream.clone() {
                    Some(upstream) => {
                        s.upstream_pending = true;
                        Step::RequestUpstream(upstream)
                    }
                    None => {
                        // not wired yet; retried once the upstream arrives
                        s.pumping = false;
                        return;
                    }
                }
            } else {
                s.pumping = false;
                return;
            }
        };

        match step {
            Step::RequestUpstream(upstream) => {
                upstream.request(1);
                // the item (and its whole derived stream, if synchronous)
                // may have been processed inside that call; loop to
                // re-evaluate
            }
            Step::Complete(mut downstream) => {
                downstream.on_complete();
                return;
            }
        }
    }
}

fn flat_map_terminal_error<U: Send + 'static>(shared: &FlatMapRef<U>, error: PipelineError) {
    let (upstream, inner, downstream) = {
        let mut s = shared.lock().unwrap();
        if s.done {
            return;
        }
        s.done = true;
        (s.upstream.take(), s.inner.take(), s.downstream.take())
    };
    if let Some(upstream) = upstream {
        upstream.cancel();
    }
    if let Some(inner) = inner {
        inner.cancel();
    }
    if let Some(mut downstream) = downstream {
        downstream.on_error(error);
    }
}

struct FlatMapOuter<U, F> {
    shared: FlatMapRef<U>,
    f: F,
}

impl<T, U, F> Observer<T> for FlatMapOuter<U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> Publisher<U> + Send,
{
    fn on_next(&mut self, item: T) {
        {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                return;
            }
            s.upstream_pending = false;
            s.inner_active = true;
        }
        let derived = (self.f)(item);
        derived.subscribe_boxed(Box::new(FlatMapInner { shared: self.shared.clone() }));
    }

    fn on_error(&mut self, error: PipelineError) {
        flat_map_terminal_error(&self.shared, error);
    }

    fn on_complete(&mut self) {
        {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                return;
            }
            s.upstream_done = true;
            s.upstream_pending = false;
            s.upstream = None;
        }
        pump(&self.shared);
    }
}

impl<T, U, F> Subscriber<T> for FlatMapOuter<U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> Publisher<U> + Send,
{
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                subscription.cancel();
                return;
            }
            s.upstream = Some(subscription);
        }
        pump(&self.shared);
    }
}

struct FlatMapInner<U> {
    shared: FlatMapRef<U>,
}

impl<U: Send + 'static> Observer<U> for FlatMapInner<U> {
    fn on_next(&mut self, item: U) {
        let downstream = {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                return;
            }
            s.demand = s.demand.saturating_sub(1);
            s.downstream.take()
        };
        let Some(mut downstream) = downstream else { return };
        downstream.on_next(item);
        let mut s = self.shared.lock().unwrap();
        if !s.done {
            s.downstream = Some(downstream);
        }
    }

    fn on_error(&mut self, error: PipelineError) {
        flat_map_terminal_error(&self.shared, error);
    }

    fn on_complete(&mut self) {
        {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                return;
            }
            s.inner_active = false;
            s.inner = None;
        }
        pump(&self.shared);
    }
}

impl<U: Send + 'static> Subscriber<U> for FlatMapInner<U> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        let pending = {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                subscription.cancel();
                return;
            }
            s.inner = Some(subscription.clone());
            s.demand
        };
        if pending > 0 {
            subscription.request(pending);
        }
    }
}

struct FlatMapSubscription<U> {
    shared: FlatMapRef<U>,
}

impl<U: Send + 'static> Subscription for FlatMapSubscription<U> {
    fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let inner = {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                return;
            }
            s.demand = s.demand.saturating_add(n);
            s.inner.clone()
        };
        if let Some(inner) = inner {
            inner.request(n);
        }
        pump(&self.shared);
    }

    fn cancel(&self) {
        let (upstream, inner, dropped) = {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                return;
            }
            s.done = true;
            (s.upstream.take(), s.inner.take(), s.downstream.take())
        };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
        if let Some(inner) = inner {
            inner.cancel();
        }
        drop(dropped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::publishers;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn collect<T: std::fmt::Display + Send + 'static>(p: Publisher<T>) -> Vec<String> {
        let out = Arc::new(Mutex::new(Vec::new()));
        let sink = out.clone();
        let deferred = p.process(move |item| sink.lock().unwrap().push(item.to_string()));
        match deferred.try_result() {
            Some(Ok(())) => out.lock().unwrap().push(".".into()),
            Some(Err(e)) => out.lock().unwrap().push(format!("error:{e}")),
            None => {}
        }
        let result = out.lock().unwrap().clone();
        result
    }

    #[test]
    fn map_transforms_in_order() {
        let p = publishers::range(2, 5).map(|i| i * i);
        assert_eq!(collect(p), vec!["4", "9", "16", "."]);
    }

    #[test]
    fn map_composition_fuses() {
        let composed = publishers::range(0, 4).map(|i| i + 1).map(|i| i * 2);
        let fused = publishers::range(0, 4).map(|i| (i + 1) * 2);
        assert_eq!(collect(composed), collect(fused));
    }

    #[test]
    fn try_map_error_is_terminal_and_cancels_upstream() {
        let cancelled = Arc::new(AtomicU32::new(0));
        let witness = cancelled.clone();
        let p = publishers::range(0, 1_000_000)
            .do_finally(move || {
                witness.fetch_add(1, Ordering::SeqCst);
            })
            .try_map(|i| {
                if i < 2 {
                    Ok(i)
                } else {
                    Err(PipelineError::frame_generation("bad item"))
                }
            });
        let events = collect(p);
        assert_eq!(events[..2], ["0".to_string(), "1".to_string()]);
        assert!(events[2].starts_with("error:"));
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn take_truncates_and_completes() {
        let p = publishers::range(2, 300_000_000).take(4);
        assert_eq!(collect(p), vec!["2", "3", "4", "5", "."]);
    }

    #[test]
    fn head_takes_one() {
        let p = publishers::range(3, 300_000_000).head();
        assert_eq!(collect(p), vec!["3", "."]);
    }

    #[test]
    fn take_zero_completes_immediately() {
        let p = publishers::range(0, 10).take(0);
        assert_eq!(collect(p), vec!["."]);
    }

    #[test]
    fn stacked_takes_use_the_smaller_window() {
        let a = publishers::range(0, 100).take(5).take(3);
        let b = publishers::range(0, 100).take(3).take(5);
        let expected = vec!["0", "1", "2", "."];
        assert_eq!(collect(a), expected);
        assert_eq!(collect(b), expected);
    }

    #[test]
    fn take_while_drops_the_rejecting_item() {
        let p = publishers::range(0, 100).take_while(|i| *i != 3);
        assert_eq!(collect(p), vec!["0", "1", "2", "."]);
    }

    #[test]
    fn flat_map_linearizes_derived_streams() {
        let p = publishers::range(1, 4).flat_map(|i| publishers::range(0, i));
        assert_eq!(collect(p), vec!["0", "0", "1", "0", "1", "2", "."]);
    }

    #[test]
    fn flat_map_with_empty_derivations_completes() {
        let p = publishers::range(0, 3).flat_map(|_| publishers::empty::<i64>());
        assert_eq!(collect(p), vec!["."]);
    }

    #[test]
    fn flat_map_inner_error_is_terminal() {
        let p = publishers::range(0, 3).flat_map(|i| {
            if i == 1 {
                publishers::error(PipelineError::NotSupported)
            } else {
                publishers::range(i * 10, i * 10 + 1)
            }
        });
        assert_eq!(collect(p), vec!["0", "error:operation not supported"]);
    }

    #[test]
    fn do_finally_fires_once_on_completion() {
        let fired = Arc::new(AtomicU32::new(0));
        let witness = fired.clone();
        let p = publishers::empty::<i64>().do_finally(move || {
            witness.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 0, "operators are lazy");
        collect(p);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn do_finally_fires_once_on_error() {
        let fired = Arc::new(AtomicU32::new(0));
        let witness = fired.clone();
        let p = publishers::error::<i64>(PipelineError::NotSupported).do_finally(move || {
            witness.fetch_add(1, Ordering::SeqCst);
        });
        let events = collect(p);
        assert_eq!(events, vec!["error:operation not supported"]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn do_finally_fires_once_on_downstream_cancel() {
        let fired = Arc::new(AtomicU32::new(0));
        let witness = fired.clone();
        let p = publishers::range(3, 300_000_000)
            .do_finally(move || {
                witness.fetch_add(1, Ordering::SeqCst);
            })
            .head();
        assert_eq!(collect(p), vec!["3", "."]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lift_composes_user_operators() {
        fn square() -> crate::streams::StreamOp<i64, i64> {
            Box::new(|src: Publisher<i64>| src.map(|i| i * i))
        }
        let p = publishers::range(2, 5).lift(square());
        assert_eq!(collect(p), vec!["4", "9", "16", "."]);
    }
}
