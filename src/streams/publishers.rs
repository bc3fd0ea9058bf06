//! Stream constructors.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::PipelineError;

use super::generators::stateful;
use super::{Observer, Publisher, Subscribe, Subscriber, Subscription, SubscriptionRef};

/// Stream that completes immediately.
pub fn empty<T: Send + 'static>() -> Publisher<T> {
    stateful(|| (), |_state, _n, obs: &mut dyn Observer<T>| obs.on_complete())
}

/// Stream already in the error state.
pub fn error<T: Send + 'static>(error: PipelineError) -> Publisher<T> {
    let mut slot = Some(error);
    stateful(
        || (),
        move |_state, _n, obs: &mut dyn Observer<T>| {
            if let Some(error) = slot.take() {
                obs.on_error(error);
            }
        },
    )
}

/// Stream of the given values, in order.
pub fn of<T: Send + 'static>(values: Vec<T>) -> Publisher<T> {
    stateful(
        move || VecDeque::from(values),
        |queue, n, obs: &mut dyn Observer<T>| {
            for _ in 0..n {
                match queue.pop_front() {
                    Some(value) => obs.on_next(value),
                    None => break,
                }
            }
            if queue.is_empty() {
                obs.on_complete();
            }
        },
    )
}

/// Stream of integers `[from, to)`.
pub fn range(from: i64, to: i64) -> Publisher<i64> {
    stateful(
        move || from,
        move |next, n, obs: &mut dyn Observer<i64>| {
            for _ in 0..n {
                if *next >= to {
                    break;
                }
                let value = *next;
                *next += 1;
                obs.on_next(value);
            }
            if *next >= to {
                obs.on_complete();
            }
        },
    )
}

/// Read a file line by line.
///
/// The file opens lazily on first demand; open failures surface as a
/// stream-initialization error.
pub fn read_lines(path: impl Into<PathBuf>) -> Publisher<String> {
    struct LinesState {
        path: PathBuf,
        lines: Option<std::io::Lines<BufReader<File>>>,
    }

    let path = path.into();
    stateful(
        move || LinesState { path, lines: None },
        |state, n, obs: &mut dyn Observer<String>| {
            if state.lines.is_none() {
                match File::open(&state.path) {
                    Ok(file) => state.lines = Some(BufReader::new(file).lines()),
                    Err(e) => {
                        obs.on_error(PipelineError::stream_init_with_source(
                            format!("can't open {}", state.path.display()),
                            Box::new(e),
                        ));
                        return;
                    }
                }
            }
            let lines = state.lines.as_mut().expect("opened above");
            for _ in 0..n {
                match lines.next() {
                    Some(Ok(line)) => obs.on_next(line),
                    Some(Err(e)) => {
                        obs.on_error(PipelineError::file_error(state.path.clone(), e));
                        return;
                    }
                    None => {
                        obs.on_complete();
                        return;
                    }
                }
            }
        },
    )
}

/// Stream each publisher to completion, in order (sequential
/// concatenation, not interleaving). An error from any child terminates
/// the merged stream.
pub fn merge<T: Send + 'static>(sources: Vec<Publisher<T>>) -> Publisher<T> {
    Publisher::from_subscribe(MergeSubscribe { sources })
}

/// Two-source convenience form of [`merge`].
pub fn merge2<T: Send + 'static>(first: Publisher<T>, second: Publisher<T>) -> Publisher<T> {
    merge(vec![first, second])
}

struct MergeSubscribe<T> {
    sources: Vec<Publisher<T>>,
}

struct MergeShared<T> {
    rest: VecDeque<Publisher<T>>,
    downstream: Option<Box<dyn Subscriber<T>>>,
    current: Option<SubscriptionRef>,
    demand: u64,
    done: bool,
    advancing: bool,
    child_terminated: bool,
}

type MergeRef<T> = Arc<Mutex<MergeShared<T>>>;

impl<T: Send + 'static> Subscribe<T> for MergeSubscribe<T> {
    fn subscribe(self: Box<Self>, mut downstream: Box<dyn Subscriber<T>>) {
        let shared: MergeRef<T> = Arc::new(Mutex::new(MergeShared {
            rest: VecDeque::from(self.sources),
            downstream: None,
            current: None,
            demand: 0,
            done: false,
            advancing: false,
            child_terminated: false,
        }));
        downstream.on_subscribe(Arc::new(MergeSubscription { shared: shared.clone() }));
        {
            let mut s = shared.lock().unwrap();
            if s.done {
                return;
            }
            s.downstream = Some(downstream);
        }
        advance(&shared);
    }
}

/// Subscribe children one at a time until the list is exhausted. Children
/// that complete synchronously are folded into the loop instead of
/// recursing.
fn advance<T: Send + 'static>(shared: &MergeRef<T>) {
    {
        let mut s = shared.lock().unwrap();
        if s.done || s.advancing {
            return;
        }
        s.advancing = true;
    }
    loop {
        let next = {
            let mut s = shared.lock().unwrap();
            if s.done {
                s.advancing = false;
                return;
            }
            match s.rest.pop_front() {
                Some(publisher) => {
                    s.child_terminated = false;
                    Some(publisher)
                }
                None => {
                    s.done = true;
                    s.advancing = false;
                    None
                }
            }
        };
        match next {
            Some(publisher) => {
                publisher.subscribe_boxed(Box::new(MergeChild { shared: shared.clone() }));
                let mut s = shared.lock().unwrap();
                if s.done {
                    s.advancing = false;
                    return;
                }
                if !s.child_terminated {
                    s.advancing = false;
                    return;
                }
                // child finished synchronously; move on
            }
            None => {
                let downstream = shared.lock().unwrap().downstream.take();
                if let Some(mut downstream) = downstream {
                    downstream.on_complete();
                }
                return;
            }
        }
    }
}

struct MergeChild<T> {
    shared: MergeRef<T>,
}

impl<T: Send + 'static> Observer<T> for MergeChild<T> {
    fn on_next(&mut self, item: T) {
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
        let downstream = {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                return;
            }
            s.done = true;
            s.current = None;
            s.rest.clear();
            s.downstream.take()
        };
        if let Some(mut downstream) = downstream {
            downstream.on_error(error);
        }
    }

    fn on_complete(&mut self) {
        {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                return;
            }
            s.current = None;
            s.child_terminated = true;
        }
        advance(&self.shared);
    }
}

impl<T: Send + 'static> Subscriber<T> for MergeChild<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        let pending = {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                subscription.cancel();
                return;
            }
            s.current = Some(subscription.clone());
            s.demand
        };
        if pending > 0 {
            subscription.request(pending);
        }
    }
}

struct MergeSubscription<T> {
    shared: MergeRef<T>,
}

impl<T: Send + 'static> Subscription for MergeSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let current = {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                return;
            }
            s.demand = s.demand.saturating_add(n);
            s.current.clone()
        };
        if let Some(current) = current {
            current.request(n);
        }
    }

    fn cancel(&self) {
        let (current, dropped) = {
            let mut s = self.shared.lock().unwrap();
            if s.done {
                return;
            }
            s.done = true;
            s.rest.clear();
            (s.current.take(), s.downstream.take())
        };
        if let Some(current) = current {
            current.cancel();
        }
        drop(dropped);
    }
}
