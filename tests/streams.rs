//! Event-sequence tests for the stream runtime.
//!
//! Each scenario drains a publisher with unbounded demand and records the
//! observed signals as strings: items by value, completion as ".", errors
//! as "error:<message>".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use vidflow::streams::{generators, publishers, Observer, Publisher, StreamOp};
use vidflow::PipelineError;

fn events<T: std::fmt::Display + Send + 'static>(p: Publisher<T>) -> Vec<String> {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = collected.clone();
    let deferred = p.process(move |item| sink.lock().unwrap().push(item.to_string()));
    match deferred.try_result() {
        Some(Ok(())) => collected.lock().unwrap().push(".".into()),
        Some(Err(e)) => collected.lock().unwrap().push(format!("error:{e}")),
        None => {}
    }
    let result = collected.lock().unwrap().clone();
    result
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn empty() {
    assert_eq!(events(publishers::empty::<i64>()), strings(&["."]));
}

#[test]
fn of() {
    assert_eq!(events(publishers::of(vec![3, 1, 2])), strings(&["3", "1", "2", "."]));
}

#[test]
fn range() {
    assert_eq!(events(publishers::range(0, 3)), strings(&["0", "1", "2", "."]));
}

#[test]
fn map() {
    let p = publishers::range(2, 5).map(|i| i * i);
    assert_eq!(events(p), strings(&["4", "9", "16", "."]));
}

#[test]
fn flat_map() {
    let p = publishers::range(1, 4).flat_map(|i| publishers::range(0, i));
    assert_eq!(events(p), strings(&["0", "0", "1", "0", "1", "2", "."]));
}

#[test]
fn head() {
    let p = publishers::range(3, 300_000_000).head();
    assert_eq!(events(p), strings(&["3", "."]));
}

#[test]
fn take() {
    let p = publishers::range(3, 300_000_000).take(4);
    assert_eq!(events(p), strings(&["3", "4", "5", "6", "."]));
}

#[test]
fn take_does_not_read_past_its_window() {
    // observable via a generator side-effect counter: the generator must
    // not be pulled measurably beyond the window
    let pulls = Arc::new(AtomicU64::new(0));
    let counter = pulls.clone();
    let huge = generators::stateful(
        || 3i64,
        move |next, n, obs: &mut dyn Observer<i64>| {
            for _ in 0..n {
                counter.fetch_add(1, Ordering::SeqCst);
                obs.on_next(*next);
                *next += 1;
            }
        },
    );
    assert_eq!(events(huge.take(4)), strings(&["3", "4", "5", "6", "."]));
    assert!(pulls.load(Ordering::SeqCst) <= 4);
}

#[test]
fn take_while() {
    let p = publishers::range(0, 300_000_000).take_while(|i| *i < 3);
    assert_eq!(events(p), strings(&["0", "1", "2", "."]));
}

#[test]
fn merge() {
    let p = publishers::merge2(publishers::range(1, 3), publishers::range(3, 6));
    assert_eq!(events(p), strings(&["1", "2", "3", "4", "5", "."]));
}

#[test]
fn error_stream() {
    let p = publishers::error::<i64>(PipelineError::NotSupported);
    assert_eq!(events(p), strings(&["error:operation not supported"]));
}

#[test]
fn on_finally_empty() {
    let terminated = Arc::new(AtomicU64::new(0));
    let witness = terminated.clone();
    let p = publishers::empty::<i64>().do_finally(move || {
        witness.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(terminated.load(Ordering::SeqCst), 0);
    events(p);
    assert_eq!(terminated.load(Ordering::SeqCst), 1);
}

#[test]
fn on_finally_error() {
    let terminated = Arc::new(AtomicU64::new(0));
    let witness = terminated.clone();
    let p = publishers::error::<i64>(PipelineError::NotSupported).do_finally(move || {
        witness.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(events(p), strings(&["error:operation not supported"]));
    assert_eq!(terminated.load(Ordering::SeqCst), 1);
}

#[test]
fn on_finally_unsubscribe() {
    let terminated = Arc::new(AtomicU64::new(0));
    let witness = terminated.clone();
    let p = publishers::range(3, 300_000_000)
        .do_finally(move || {
            witness.fetch_add(1, Ordering::SeqCst);
        })
        .head();
    assert_eq!(terminated.load(Ordering::SeqCst), 0);
    assert_eq!(events(p), strings(&["3", "."]));
    assert_eq!(terminated.load(Ordering::SeqCst), 1);
}

fn square() -> StreamOp<i64, i64> {
    Box::new(|src: Publisher<i64>| src.map(|i| i * i))
}

#[test]
fn lift_square() {
    let p = publishers::range(2, 5).lift(square());
    assert_eq!(events(p), strings(&["4", "9", "16", "."]));
}

#[test]
fn map_fusion_law() {
    // map(f) then map(g) is observationally map(g . f)
    let chained = publishers::range(0, 5).map(|i| i + 3).map(|i| i * 2);
    let fused = publishers::range(0, 5).map(|i| (i + 3) * 2);
    assert_eq!(events(chained), events(fused));
}

#[test]
fn take_composition_law() {
    // take(n) then take(m) is take(min(n, m))
    for (n, m) in [(2u64, 5u64), (5, 2), (3, 3)] {
        let stacked = publishers::range(0, 100).take(n).take(m);
        let single = publishers::range(0, 100).take(n.min(m));
        assert_eq!(events(stacked), events(single), "take({n}) >> take({m})");
    }
}

#[test]
fn terminal_signal_is_exclusive_and_final() {
    // at most one terminal signal per subscription, nothing after it
    struct Recording {
        log: Arc<Mutex<Vec<String>>>,
    }
    impl Observer<i64> for Recording {
        fn on_next(&mut self, item: i64) {
            self.log.lock().unwrap().push(format!("next:{item}"));
        }
        fn on_error(&mut self, error: PipelineError) {
            self.log.lock().unwrap().push(format!("error:{error}"));
        }
        fn on_complete(&mut self) {
            self.log.lock().unwrap().push("complete".into());
        }
    }
    impl vidflow::streams::Subscriber<i64> for Recording {
        fn on_subscribe(&mut self, subscription: vidflow::streams::SubscriptionRef) {
            subscription.request(u64::MAX);
        }
    }

    let log = Arc::new(Mutex::new(Vec::new()));
    publishers::range(0, 2).subscribe(Recording { log: log.clone() });
    assert_eq!(*log.lock().unwrap(), strings(&["next:0", "next:1", "complete"]));

    let log = Arc::new(Mutex::new(Vec::new()));
    publishers::error::<i64>(PipelineError::NotSupported)
        .subscribe(Recording { log: log.clone() });
    let recorded = log.lock().unwrap().clone();
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].starts_with("error:"));
}
