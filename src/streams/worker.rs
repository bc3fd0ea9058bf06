//! Thread-handoff boundary operator.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::error::PipelineError;

use super::{Observer, Publisher, StreamOp, Subscribe, Subscriber, Subscription, SubscriptionRef};

/// Handoff queue capacity. A full queue parks the upstream producer.
const HANDOFF_CAPACITY: usize = 64;

/// Detach a stream onto a named worker thread.
///
/// Items cross a bounded FIFO queue; downstream signals run on the worker
/// thread. Demand is granted to the upstream in queue-capacity-bounded
/// slices from the worker loop, so a synchronous upstream drains on the
/// worker thread without overrunning the queue. On downstream cancel the
/// worker discards whatever is still queued and exits.
pub fn threaded_worker<T: Send + 'static>(name: &str) -> StreamOp<T, T> {
    let name = name.to_string();
    Box::new(move |upstream| Publisher::from_subscribe(WorkerSubscribe { upstream, name }))
}

struct WorkerSubscribe<T> {
    upstream: Publisher<T>,
    name: String,
}

enum Handoff<T> {
    Wired(SubscriptionRef),
    Item(T),
    Error(PipelineError),
    Complete,
}

impl<T: Send + 'static> Subscribe<T> for WorkerSubscribe<T> {
    fn subscribe(self: Box<Self>, downstream: Box<dyn Subscriber<T>>) {
        let (data_tx, data_rx) = bounded::<Handoff<T>>(HANDOFF_CAPACITY);
        let (wake_tx, wake_rx) = unbounded::<()>();

        let worker = WorkerLoop {
            name: self.name.clone(),
            data_rx,
            wake_rx,
            pending: Arc::new(AtomicU64::new(0)),
            cancelled: Arc::new(AtomicBool::new(false)),
            wake_tx,
        };
        let spawned = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || worker.run(downstream));
        if let Err(e) = spawned {
            warn!(worker = %self.name, error = %e, "can't spawn worker thread");
            // without a worker there is no downstream to signal; drop the
            // chain unsubscribed
            return;
        }

        self.upstream.subscribe_boxed(Box::new(WorkerFeeder { data_tx, done: false }));
    }
}

/// Upstream-side subscriber: forwards everything into the handoff queue.
/// A full queue blocks here, which is the parking backpressure.
struct WorkerFeeder<T> {
    data_tx: Sender<Handoff<T>>,
    done: bool,
}

impl<T: Send + 'static> Observer<T> for WorkerFeeder<T> {
    fn on_next(&mut self, item: T) {
        if self.done {
            return;
        }
        let _ = self.data_tx.send(Handoff::Item(item));
    }

    fn on_error(&mut self, error: PipelineError) {
        if self.done {
            return;
        }
        self.done = true;
        let _ = self.data_tx.send(Handoff::Error(error));
    }

    fn on_complete(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        let _ = self.data_tx.send(Handoff::Complete);
    }
}

impl<T: Send + 'static> Subscriber<T> for WorkerFeeder<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        let _ = self.data_tx.send(Handoff::Wired(subscription));
    }
}

/// Downstream-facing subscription. Requests only record demand and wake the
/// worker; the worker loop converts demand into upstream requests in slices
/// the queue can absorb.
struct WorkerSubscription {
    upstream: SubscriptionRef,
    pending: Arc<AtomicU64>,
    cancelled: Arc<AtomicBool>,
    wake_tx: Sender<()>,
}

impl Subscription for WorkerSubscription {
    fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.pending.fetch_add(n, Ordering::AcqRel);
        let _ = self.wake_tx.send(());
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.upstream.cancel();
        let _ = self.wake_tx.send(());
    }
}

struct WorkerLoop<T> {
    name: String,
    data_rx: Receiver<Handoff<T>>,
    wake_rx: Receiver<()>,
    pending: Arc<AtomicU64>,
    cancelled: Arc<AtomicBool>,
    wake_tx: Sender<()>,
}

impl<T: Send + 'static> WorkerLoop<T> {
    fn run(self, mut downstream: Box<dyn Subscriber<T>>) {
        debug!(worker = %self.name, "worker thread started");

        // the feeder guarantees the wiring message comes first; downstream
        // gets a wrapper whose requests only record demand, while the loop
        // below grants that demand to the real upstream in queue-sized
        // slices
        let upstream = match self.data_rx.recv() {
            Ok(Handoff::Wired(subscription)) => subscription,
            _ => {
                debug!(worker = %self.name, "upstream went away before wiring");
                return;
            }
        };
        downstream.on_subscribe(Arc::new(WorkerSubscription {
            upstream: upstream.clone(),
            pending: self.pending.clone(),
            cancelled: self.cancelled.clone(),
            wake_tx: self.wake_tx.clone(),
        }));

        loop {
            if self.cancelled.load(Ordering::Acquire) {
                debug!(worker = %self.name, "cancelled; discarding queued items");
                return;
            }

            self.grant_demand(&upstream);

            crossbeam_channel::select! {
                recv(self.data_rx) -> msg => match msg {
                    Ok(Handoff::Item(item)) => {
                        if !self.cancelled.load(Ordering::Acquire) {
                            downstream.on_next(item);
                        }
                    }
                    Ok(Handoff::Error(error)) => {
                        if !self.cancelled.load(Ordering::Acquire) {
                            downstream.on_error(error);
                        }
                        break;
                    }
                    Ok(Handoff::Complete) => {
                        if !self.cancelled.load(Ordering::Acquire) {
                            downstream.on_complete();
                        }
                        break;
                    }
                    Ok(Handoff::Wired(_)) | Err(_) => break,
                },
                recv(self.wake_rx) -> _ => {}
            }
        }
        debug!(worker = %self.name, "worker thread exiting");
    }

    /// Forward pending downstream demand upstream, bounded by the free
    /// queue capacity so a synchronous upstream emitting on this thread
    /// can never block against its own consumer.
    fn grant_demand(&self, upstream: &SubscriptionRef) {
        let free = HANDOFF_CAPACITY.saturating_sub(self.data_rx.len()) as u64;
        if free == 0 {
            return;
        }
        let want = self.pending.load(Ordering::Acquire);
        let grant = want.min(free);
        if grant == 0 {
            return;
        }
        // the remainder is granted on later iterations: consuming an item
        // frees a queue slot and re-runs this grant
        self.pending.fetch_sub(grant, Ordering::AcqRel);
        upstream.request(grant);
    }
}
