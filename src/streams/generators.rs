//! Stream generators: demand-driven state machines and async producers.
//!
//! [`stateful`] is the workhorse behind `range`, `of`, the file/url/camera
//! sources, and `read_lines`: a `generate(state, n, observer)` callback is
//! invoked per outstanding demand and emits up to `n` items. [`async_source`]
//! adapts an external producer (device callback, transport subscription)
//! that pushes items on its own schedule.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::PipelineError;

use super::{Observer, Publisher, Subscribe, Subscriber, Subscription, SubscriptionRef};

/// Build a publisher from a state factory and a batch generator.
///
/// On each `request(n)` the runtime invokes `generate(&mut state, n, obs)`,
/// which may emit **up to** `n` items; fewer is legal, and zero means "no
/// items this batch, come back later". `generate` is never re-entered
/// recursively from within one of its own `on_next` calls; reentrant demand
/// is folded into the running drain loop. The state is owned by the
/// generator and destroyed on any terminal event or cancel.
pub fn stateful<T, S, C, G>(create: C, generate: G) -> Publisher<T>
where
    T: Send + 'static,
    S: Send + 'static,
    C: FnOnce() -> S + Send + 'static,
    G: FnMut(&mut S, u64, &mut dyn Observer<T>) + Send + 'static,
{
    Publisher::from_subscribe(StatefulSubscribe { create, generate, _marker: std::marker::PhantomData })
}

struct StatefulSubscribe<T, S, C, G> {
    create: C,
    generate: G,
    _marker: std::marker::PhantomData<fn() -> (T, S)>,
}

struct GeneratorCore<T, S, G> {
    /// Mirrors the terminal state without taking the slot lock, so an
    /// in-flight emitter can observe a reentrant cancel.
    cancelled: AtomicBool,
    slots: Mutex<GeneratorSlots<T, S, G>>,
}

struct GeneratorSlots<T, S, G> {
    state: Option<S>,
    generate: Option<G>,
    subscriber: Option<Box<dyn Subscriber<T>>>,
    requested: u64,
    draining: bool,
    terminated: bool,
}

impl<T, S, G> GeneratorSlots<T, S, G> {
    fn take_all(&mut self) -> (Option<S>, Option<G>, Option<Box<dyn Subscriber<T>>>) {
        (self.state.take(), self.generate.take(), self.subscriber.take())
    }
}

impl<T, S, C, G> Subscribe<T> for StatefulSubscribe<T, S, C, G>
where
    T: Send + 'static,
    S: Send + 'static,
    C: FnOnce() -> S + Send + 'static,
    G: FnMut(&mut S, u64, &mut dyn Observer<T>) + Send + 'static,
{
    fn subscribe(self: Box<Self>, mut subscriber: Box<dyn Subscriber<T>>) {
        let state = (self.create)();
        let core = Arc::new(GeneratorCore {
            cancelled: AtomicBool::new(false),
            slots: Mutex::new(GeneratorSlots {
                state: Some(state),
                generate: Some(self.generate),
                subscriber: None,
                requested: 0,
                // pre-claim the drain so demand signalled from within
                // on_subscribe only accumulates until wiring is done
                draining: true,
                terminated: false,
            }),
        });

        let handle: SubscriptionRef = Arc::new(GeneratorSubscription { core: core.clone() });
        subscriber.on_subscribe(handle);

        {
            let mut slots = core.slots.lock().unwrap();
            if slots.terminated {
                // cancelled during on_subscribe
                let dropped = slots.take_all();
                slots.draining = false;
                drop(slots);
                drop(dropped);
                return;
            }
            slots.subscriber = Some(subscriber);
        }
        GeneratorCore::drain(&core);
    }
}

struct GeneratorSubscription<T, S, G> {
    core: Arc<GeneratorCore<T, S, G>>,
}

impl<T, S, G> Subscription for GeneratorSubscription<T, S, G>
where
    T: Send + 'static,
    S: Send + 'static,
    G: FnMut(&mut S, u64, &mut dyn Observer<T>) + Send + 'static,
{
    fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        {
            let mut slots = self.core.slots.lock().unwrap();
            if slots.terminated {
                return;
            }
            slots.requested = slots.requested.saturating_add(n);
            if slots.draining {
                // the running drain loop picks the new demand up
                return;
            }
            slots.draining = true;
        }
        GeneratorCore::drain(&self.core);
    }

    fn cancel(&self) {
        self.core.cancelled.store(true, Ordering::Release);
        let mut slots = self.core.slots.lock().unwrap();
        if slots.terminated {
            return;
        }
        slots.terminated = true;
        if !slots.draining {
            let dropped = slots.take_all();
            drop(slots);
            drop(dropped);
        }
        // an active drain observes `terminated` and tears down itself
    }
}

impl<T, S, G> GeneratorCore<T, S, G>
where
    T: Send + 'static,
    S: Send + 'static,
    G: FnMut(&mut S, u64, &mut dyn Observer<T>) + Send + 'static,
{
    /// The single drain loop. Holds the `draining` claim; callbacks run
    /// with the slot lock released so subscribers may re-enter `request`
    /// or `cancel` freely.
    fn drain(core: &Arc<Self>) {
        loop {
            let (mut state, mut generate, mut subscriber, budget) = {
                let mut slots = core.slots.lock().unwrap();
                if slots.terminated {
                    let dropped = slots.take_all();
                    slots.draining = false;
                    drop(slots);
                    drop(dropped);
                    return;
                }
                if slots.requested == 0 {
                    slots.draining = false;
                    return;
                }
                let budget = slots.requested;
                match slots.take_all() {
                    (Some(s), Some(g), Some(sub)) => (s, g, sub, budget),
                    taken => {
                        // not yet wired; put back whatever was there
                        slots.state = taken.0;
                        slots.generate = taken.1;
                        slots.subscriber = taken.2;
                        slots.draining = false;
                        return;
                    }
                }
            };

            let (emitted, terminal) = {
                let mut emitter = Emitter {
                    budget,
                    emitted: 0,
                    terminal: false,
                    cancelled: &core.cancelled,
                    subscriber: subscriber.as_mut(),
                };
                generate(&mut state, budget, &mut emitter);
                (emitter.emitted, emitter.terminal)
            };

            let mut slots = core.slots.lock().unwrap();
            slots.requested = slots.requested.saturating_sub(emitted);
            if terminal || slots.terminated {
                slots.terminated = true;
                core.cancelled.store(true, Ordering::Release);
                slots.draining = false;
                drop(slots);
                // state, generator, and subscriber released here
                return;
            }
            slots.state = Some(state);
            slots.generate = Some(generate);
            slots.subscriber = Some(subscriber);
            if emitted == 0 || slots.requested == 0 {
                slots.draining = false;
                return;
            }
        }
    }
}

/// Observer handed to `generate`; clips emissions to the demand budget and
/// records the terminal signal.
struct Emitter<'a, T> {
    budget: u64,
    emitted: u64,
    terminal: bool,
    cancelled: &'a AtomicBool,
    subscriber: &'a mut dyn Subscriber<T>,
}

impl<T> Observer<T> for Emitter<'_, T> {
    fn on_next(&mut self, item: T) {
        if self.terminal || self.emitted >= self.budget || self.cancelled.load(Ordering::Acquire) {
            return;
        }
        self.emitted += 1;
        self.subscriber.on_next(item);
    }

    fn on_error(&mut self, error: PipelineError) {
        if self.terminal {
            return;
        }
        self.terminal = true;
        if !self.cancelled.load(Ordering::Acquire) {
            self.subscriber.on_error(error);
        }
    }

    fn on_complete(&mut self) {
        if self.terminal {
            return;
        }
        self.terminal = true;
        if !self.cancelled.load(Ordering::Acquire) {
            self.subscriber.on_complete();
        }
    }
}

// ---------------------------------------------------------------------------
// Async producer adapter
// ---------------------------------------------------------------------------

/// Build a publisher from an external asynchronous producer.
///
/// `init` receives the [`AsyncObserver`] handle and returns the producer
/// state (a device session, a transport subscription). Items pushed through
/// the handle buffer until downstream demand covers them. On downstream
/// cancel, `cancel` is invoked with the state; once it returns, no further
/// `on_next` reaches the subscriber.
pub fn async_source<T, S, I, C>(init: I, cancel: C) -> Publisher<T>
where
    T: Send + 'static,
    S: Send + 'static,
    I: FnOnce(AsyncObserver<T>) -> S + Send + 'static,
    C: FnOnce(S) + Send + 'static,
{
    Publisher::from_subscribe(AsyncSubscribe { init, cancel, _marker: std::marker::PhantomData })
}

struct AsyncSubscribe<T, S, I, C> {
    init: I,
    cancel: C,
    _marker: std::marker::PhantomData<fn() -> (T, S)>,
}

enum Event<T> {
    Item(T),
    Error(PipelineError),
    Complete,
}

struct AsyncShared<T> {
    queue: Mutex<AsyncQueue<T>>,
    /// Consumes the producer state; the flag says whether this is a
    /// downstream cancel (run the user's cancel hook) or a natural
    /// terminal (just drop the state).
    teardown: Mutex<Option<Box<dyn FnOnce(bool) + Send>>>,
}

struct AsyncQueue<T> {
    events: VecDeque<Event<T>>,
    requested: u64,
    draining: bool,
    terminated: bool,
    terminal_queued: bool,
    subscriber: Option<Box<dyn Subscriber<T>>>,
}

/// Producer-side handle for [`async_source`]. Clonable and thread-safe.
pub struct AsyncObserver<T> {
    shared: Arc<AsyncShared<T>>,
}

impl<T> Clone for AsyncObserver<T> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<T: Send + 'static> AsyncObserver<T> {
    pub fn on_next(&self, item: T) {
        {
            let mut q = self.shared.queue.lock().unwrap();
            if q.terminated || q.terminal_queued {
                return;
            }
            q.events.push_back(Event::Item(item));
        }
        drain_async(&self.shared);
    }

    pub fn on_error(&self, error: PipelineError) {
        {
            let mut q = self.shared.queue.lock().unwrap();
            if q.terminated || q.terminal_queued {
                return;
            }
            q.terminal_queued = true;
            q.events.push_back(Event::Error(error));
        }
        drain_async(&self.shared);
    }

    pub fn on_complete(&self) {
        {
            let mut q = self.shared.queue.lock().unwrap();
            if q.terminated || q.terminal_queued {
                return;
            }
            q.terminal_queued = true;
            q.events.push_back(Event::Complete);
        }
        drain_async(&self.shared);
    }
}

impl<T, S, I, C> Subscribe<T> for AsyncSubscribe<T, S, I, C>
where
    T: Send + 'static,
    S: Send + 'static,
    I: FnOnce(AsyncObserver<T>) -> S + Send + 'static,
    C: FnOnce(S) + Send + 'static,
{
    fn subscribe(self: Box<Self>, mut subscriber: Box<dyn Subscriber<T>>) {
        let shared = Arc::new(AsyncShared {
            queue: Mutex::new(AsyncQueue {
                events: VecDeque::new(),
                requested: 0,
                draining: true,
                terminated: false,
                terminal_queued: false,
                subscriber: None,
            }),
            teardown: Mutex::new(None),
        });

        let state = (self.init)(AsyncObserver { shared: shared.clone() });
        let cancel = self.cancel;
        let mut state_slot = Some(state);
        *shared.teardown.lock().unwrap() = Some(Box::new(move |cancelled| {
            let state = state_slot.take().expect("teardown runs once");
            if cancelled {
                cancel(state);
            }
        }));

        let handle: SubscriptionRef = Arc::new(AsyncSubscription { shared: shared.clone() });
        subscriber.on_subscribe(handle);

        {
            let mut q = shared.queue.lock().unwrap();
            if q.terminated {
                q.draining = false;
                return;
            }
            q.subscriber = Some(subscriber);
            q.draining = false;
        }
        drain_async(&shared);
    }
}

struct AsyncSubscription<T> {
    shared: Arc<AsyncShared<T>>,
}

impl<T: Send + 'static> Subscription for AsyncSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        {
            let mut q = self.shared.queue.lock().unwrap();
            if q.terminated {
                return;
            }
            q.requested = q.requested.saturating_add(n);
        }
        drain_async(&self.shared);
    }

    fn cancel(&self) {
        {
            let mut q = self.shared.queue.lock().unwrap();
            if q.terminated {
                return;
            }
            q.terminated = true;
            q.events.clear();
            q.subscriber = None;
        }
        if let Some(teardown) = self.shared.teardown.lock().unwrap().take() {
            teardown(true);
        }
    }
}

fn drain_async<T: Send + 'static>(shared: &Arc<AsyncShared<T>>) {
    loop {
        let (mut subscriber, event) = {
            let mut q = shared.queue.lock().unwrap();
            if q.draining || q.terminated {
                return;
            }
            let deliverable = match q.events.front() {
                None => false,
                Some(Event::Item(_)) => q.requested > 0,
                Some(Event::Error(_)) | Some(Event::Complete) => true,
            };
            if !deliverable {
                return;
            }
            let Some(subscriber) = q.subscriber.take() else { return };
            let event = q.events.pop_front().expect("front checked above");
            if matches!(event, Event::Item(_)) {
                q.requested -= 1;
            }
            q.draining = true;
            (subscriber, event)
        };

        let terminal = !matches!(event, Event::Item(_));
        match event {
            Event::Item(item) => subscriber.on_next(item),
            Event::Error(error) => subscriber.on_error(error),
            Event::Complete => subscriber.on_complete(),
        }

        {
            let mut q = shared.queue.lock().unwrap();
            q.draining = false;
            if terminal {
                q.terminated = true;
                q.events.clear();
            } else if !q.terminated {
                q.subscriber = Some(subscriber);
            }
        }
        if terminal {
            // natural terminal: release the producer state without the
            // cancel hook
            if let Some(teardown) = shared.teardown.lock().unwrap().take() {
                teardown(false);
            }
            return;
        }
    }
}
