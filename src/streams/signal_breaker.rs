//! Signal-driven stream termination.

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::error::PipelineError;
use crate::signals::{Signal, SignalRegistration, SignalService};

use super::{Observer, Publisher, StreamOp, Subscribe, Subscriber, Subscription, SubscriptionRef};

/// Terminate a stream when one of `signals` is delivered.
///
/// Signal delivery cancels the upstream subscription and surfaces as
/// completion downstream, not as an error; orderly shutdown and natural
/// end-of-stream look the same to the rest of the pipeline.
pub fn signal_breaker<T: Send + 'static>(
    service: Arc<dyn SignalService>,
    signals: Vec<Signal>,
) -> StreamOp<T, T> {
    Box::new(move |upstream| {
        Publisher::from_subscribe(BreakerSubscribe { upstream, service, signals })
    })
}

struct BreakerSubscribe<T> {
    upstream: Publisher<T>,
    service: Arc<dyn SignalService>,
    signals: Vec<Signal>,
}

struct BreakerShared<T> {
    downstream: Option<Box<dyn Subscriber<T>>>,
    upstream: Option<SubscriptionRef>,
    /// Demand seen before the upstream was wired.
    pending_demand: u64,
    done: bool,
    /// A signal fired while the downstream was checked out for delivery;
    /// the delivering thread owes the completion.
    pending_complete: bool,
    registration: Option<SignalRegistration>,
}

type BreakerRef<T> = Arc<Mutex<BreakerShared<T>>>;

impl<T: Send + 'static> Subscribe<T> for BreakerSubscribe<T> {
    fn subscribe(self: Box<Self>, mut downstream: Box<dyn Subscriber<T>>) {
        let shared: BreakerRef<T> = Arc::new(Mutex::new(BreakerShared {
            downstream: None,
            upstream: None,
            pending_demand: 0,
            done: false,
            pending_complete: false,
            registration: None,
        }));
        downstream.on_subscribe(Arc::new(BreakerSubscription { shared: shared.clone() }));
        {
            let mut s = shared.lock().unwrap();
            if s.done {
                return;
            }
            s.downstream = Some(downstream);
        }

        let break_shared = shared.clone();
        let registration = self.service.register(
            &self.signals,
            Arc::new(move |signal| {
                let (upstream, downstream) = {
                    let mut s = break_shared.lock().unwrap();
                    if s.done {
                        return;
                    }
                    s.done = true;
                    s.registration = None;
                    let downstream = s.downstream.take();
                    if downstream.is_none() {
                        // an in-flight delivery holds the subscriber; it
                        // completes the stream on its way out
                        s.pending_complete = true;
                    }
                    (s.upstream.take(), downstream)
                };
                info!(%signal, "breaking stream on signal");
                if let Some(upstream) = upstream {
                    upstream.cancel();
                }
                if let Some(mut downstream) = downstream {
                    downstream.on_complete();
                }
            }),
        );
        {
            let mut s = shared.lock().unwrap();
            if s.done {
                // signal or cancel won the race; drop the registration
                drop(registration);
            } else {
                s.registration = Some(registration);
            }
        }

        self.upstream.subscribe_boxed(Box::new(BreakerUpstream { shared }));
    }
}

struct BreakerUpstream<T> {
    shared: BreakerRef<T>,
}

impl<T: Send + 'static> Observer<T> for BreakerUpstream<T> {
    fn on_next(&mut self, item: T) {
        let downstream = {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                return;
            }
            s.downstream.take()
        };
        let Some(mut downstream) = downstream else { return };
        downstream.on_next(item);
        let owe_completion = {
            let mut s = self.shared.lock().unwrap();
            if !s.done {
                s.downstream = Some(downstream);
                return;
            }
            std::mem::take(&mut s.pending_complete)
        };
        if owe_completion {
            downstream.on_complete();
        }
    }

    fn on_error(&mut self, error: PipelineError) {
        let downstream = breaker_finish(&self.shared);
        if let Some(mut downstream) = downstream {
            downstream.on_error(error);
        }
    }

    fn on_complete(&mut self) {
        let downstream = breaker_finish(&self.shared);
        if let Some(mut downstream) = downstream {
            downstream.on_complete();
        }
    }
}

fn breaker_finish<T>(shared: &BreakerRef<T>) -> Option<Box<dyn Subscriber<T>>> {
    let mut s = shared.lock().unwrap();
    if s.done {
        return None;
    }
    s.done = true;
    s.registration = None;
    s.upstream = None;
    s.downstream.take()
}

impl<T: Send + 'static> Subscriber<T> for BreakerUpstream<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        let pending = {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                drop(s);
                subscription.cancel();
                return;
            }
            s.upstream = Some(subscription.clone());
            std::mem::take(&mut s.pending_demand)
        };
        if pending > 0 {
            subscription.request(pending);
        }
    }
}

struct BreakerSubscription<T> {
    shared: BreakerRef<T>,
}

impl<T: Send + 'static> Subscription for BreakerSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let upstream = {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                return;
            }
            match s.upstream.clone() {
                Some(upstream) => Some(upstream),
                None => {
                    s.pending_demand = s.pending_demand.saturating_add(n);
                    None
                }
            }
        };
        if let Some(upstream) = upstream {
            upstream.request(n);
        }
    }

    fn cancel(&self) {
        let upstream = {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                return;
            }
            s.done = true;
            s.registration = None;
            s.downstream = None;
            s.upstream.take()
        };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::ManualSignals;
    use crate::streams::{generators, publishers};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn signal_surfaces_as_completion_not_error() {
        let signals = Arc::new(ManualSignals::new());
        let service: Arc<dyn SignalService> = signals.clone();
        let fired = Arc::new(AtomicU32::new(0));
        let witness = fired.clone();

        // an async source that never produces: only the signal can end it
        let p = generators::async_source(|_obs: generators::AsyncObserver<i64>| (), |_state| {})
            .do_finally(move || {
                witness.fetch_add(1, Ordering::SeqCst);
            })
            .lift(signal_breaker(service, vec![Signal::Interrupt, Signal::Terminate]));

        let deferred = p.process(|_| {});
        assert!(!deferred.is_resolved());

        signals.raise(Signal::Terminate);
        assert!(matches!(deferred.try_result(), Some(Ok(()))));
        assert_eq!(fired.load(Ordering::SeqCst), 1, "do_finally fires once on the cancel path");
    }

    #[test]
    fn items_pass_through_until_the_signal() {
        let signals = Arc::new(ManualSignals::new());
        let service: Arc<dyn SignalService> = signals.clone();

        let p = publishers::range(0, 3).lift(signal_breaker(service, vec![Signal::Interrupt]));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let deferred = p.process(move |i| sink.lock().unwrap().push(i));

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert!(matches!(deferred.try_result(), Some(Ok(()))));
    }

    #[test]
    fn registration_is_released_on_natural_completion() {
        let signals = Arc::new(ManualSignals::new());
        let service: Arc<dyn SignalService> = signals.clone();

        let p = publishers::range(0, 2).lift(signal_breaker(service, vec![Signal::Quit]));
        p.process(|_| {});
        assert_eq!(signals.registered(), 0);

        // a late signal is a no-op
        signals.raise(Signal::Quit);
    }

    #[test]
    fn double_signal_is_idempotent() {
        let signals = Arc::new(ManualSignals::new());
        let service: Arc<dyn SignalService> = signals.clone();

        let p = generators::async_source(|_obs: generators::AsyncObserver<i64>| (), |_state| {})
            .lift(signal_breaker(service, vec![Signal::Interrupt]));
        let deferred = p.process(|_| {});

        signals.raise(Signal::Interrupt);
        signals.raise(Signal::Interrupt);
        assert!(matches!(deferred.try_result(), Some(Ok(()))));
    }
}
