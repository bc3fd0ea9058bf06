//! Time-sliced emission pacing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{TimerHandle, TimerService};
use crate::error::PipelineError;

use super::{Observer, Publisher, StreamOp, Subscribe, Subscriber, Subscription, SubscriptionRef};

/// Pace a stream to at most one item per `period` tick.
///
/// The operator pulls rather than buffers: on each tick with outstanding
/// downstream demand it requests exactly one upstream item and forwards it
/// on arrival. Nothing is dropped and at most one item is in flight, so a
/// fast upstream is backpressured instead of queued.
pub fn interval<T: Send + 'static>(
    timer: Arc<dyn TimerService>,
    period: Duration,
) -> StreamOp<T, T> {
    Box::new(move |upstream| {
        Publisher::from_subscribe(IntervalSubscribe { upstream, timer, period })
    })
}

struct IntervalSubscribe<T> {
    upstream: Publisher<T>,
    timer: Arc<dyn TimerService>,
    period: Duration,
}

struct IntervalShared<T> {
    downstream: Option<Box<dyn Subscriber<T>>>,
    upstream: Option<SubscriptionRef>,
    demand: u64,
    in_flight: bool,
    done: bool,
    timer_handle: Option<TimerHandle>,
}

type IntervalRef<T> = Arc<Mutex<IntervalShared<T>>>;

impl<T: Send + 'static> Subscribe<T> for IntervalSubscribe<T> {
    fn subscribe(self: Box<Self>, mut downstream: Box<dyn Subscriber<T>>) {
        let shared: IntervalRef<T> = Arc::new(Mutex::new(IntervalShared {
            downstream: None,
            upstream: None,
            demand: 0,
            in_flight: false,
            done: false,
            timer_handle: None,
        }));
        downstream.on_subscribe(Arc::new(IntervalSubscription { shared: shared.clone() }));
        {
            let mut s = shared.lock().unwrap();
            if s.done {
                return;
            }
            s.downstream = Some(downstream);
        }
        self.upstream.subscribe_boxed(Box::new(IntervalUpstream { shared: shared.clone() }));
        arm(&shared, &self.timer, self.period);
    }
}

/// Schedule the next tick. Each tick re-arms itself until the stream
/// terminates.
fn arm<T: Send + 'static>(shared: &IntervalRef<T>, timer: &Arc<dyn TimerService>, period: Duration) {
    if shared.lock().unwrap().done {
        return;
    }
    let tick_shared = shared.clone();
    let tick_timer = timer.clone();
    let handle = timer.schedule(
        period,
        Box::new(move || {
            tick(&tick_shared, &tick_timer, period);
        }),
    );
    let mut s = shared.lock().unwrap();
    if s.done {
        handle.cancel();
    } else {
        s.timer_handle = Some(handle);
    }
}

fn tick<T: Send + 'static>(shared: &IntervalRef<T>, timer: &Arc<dyn TimerService>, period: Duration) {
    let pull = {
        let mut s = shared.lock().unwrap();
        if s.done {
            return;
        }
        if s.demand > 0 && !s.in_flight {
            s.in_flight = true;
            s.upstream.clone()
        } else {
            None
        }
    };
    if let Some(upstream) = pull {
        upstream.request(1);
    }
    arm(shared, timer, period);
}

struct IntervalUpstream<T> {
    shared: IntervalRef<T>,
}

impl<T: Send + 'static> Observer<T> for IntervalUpstream<T> {
    fn on_next(&mut self, item: T) {
        let downstream = {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                return;
            }
            s.in_flight = false;
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
        let downstream = finish(&self.shared);
        if let Some(mut downstream) = downstream {
            downstream.on_error(error);
        }
    }

    fn on_complete(&mut self) {
        let downstream = finish(&self.shared);
        if let Some(mut downstream) = downstream {
            downstream.on_complete();
        }
    }
}

fn finish<T>(shared: &IntervalRef<T>) -> Option<Box<dyn Subscriber<T>>> {
    let mut s = shared.lock().unwrap();
    if s.done {
        return None;
    }
    s.done = true;
    if let Some(handle) = s.timer_handle.take() {
        handle.cancel();
    }
    s.upstream = None;
    s.downstream.take()
}

impl<T: Send + 'static> Subscriber<T> for IntervalUpstream<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        let mut s = self.shared.lock().unwrap();
        if s.done {
            drop(s);
            subscription.cancel();
            return;
        }
        s.upstream = Some(subscription);
    }
}

struct IntervalSubscription<T> {
    shared: IntervalRef<T>,
}

impl<T: Send + 'static> Subscription for IntervalSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let mut s = self.shared.lock().unwrap();
        if s.done {
            return;
        }
        // demand accumulates; the next tick converts one unit into an
        // upstream pull
        s.demand = s.demand.saturating_add(n);
    }

    fn cancel(&self) {
        let upstream = {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                return;
            }
            s.done = true;
            if let Some(handle) = s.timer_handle.take() {
                handle.cancel();
            }
            s.downstream = None;
            s.upstream.take()
        };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}
