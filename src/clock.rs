//! Timer service collaborator.
//!
//! The interval operator and paced sources never own a clock; they schedule
//! callbacks through a [`TimerService`] so production pipelines run on the
//! tokio timer while tests drive time by hand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Deadline scheduling facade.
pub trait TimerService: Send + Sync {
    /// Run `callback` once after `delay`. The returned handle cancels the
    /// pending callback; cancelling after the callback ran is a no-op.
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerHandle;
}

/// Cancellation handle for a scheduled callback.
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Tokio-backed timer service.
pub struct TokioTimer {
    handle: tokio::runtime::Handle,
}

impl TokioTimer {
    /// Capture the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime context.
    pub fn new() -> Self {
        Self { handle: tokio::runtime::Handle::current() }
    }

    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl Default for TokioTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService for TokioTimer {
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::Acquire) {
                callback();
            }
        });
        TimerHandle { cancelled }
    }
}

/// Deterministic timer for tests: time only moves through
/// [`advance`](ManualTimer::advance).
pub struct ManualTimer {
    inner: Mutex<ManualTimerInner>,
}

struct ManualTimerInner {
    now: Duration,
    entries: Vec<ManualEntry>,
}

struct ManualEntry {
    due: Duration,
    cancelled: Arc<AtomicBool>,
    callback: Box<dyn FnOnce() + Send>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self { inner: Mutex::new(ManualTimerInner { now: Duration::ZERO, entries: Vec::new() }) }
    }

    /// Move time forward, firing due callbacks in deadline order. Callbacks
    /// run outside the internal lock and may schedule further deadlines,
    /// which fire within the same advance if they fall inside the window.
    pub fn advance(&self, by: Duration) {
        let target = {
            let inner = self.inner.lock().unwrap();
            inner.now + by
        };
        loop {
            let next = {
                let mut inner = self.inner.lock().unwrap();
                inner.entries.retain(|e| !e.cancelled.load(Ordering::Acquire));
                let due_idx = inner
                    .entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.due <= target)
                    .min_by_key(|(_, e)| e.due)
                    .map(|(idx, _)| idx);
                match due_idx {
                    Some(idx) => {
                        let entry = inner.entries.swap_remove(idx);
                        inner.now = entry.due;
                        Some(entry.callback)
                    }
                    None => {
                        inner.now = target;
                        None
                    }
                }
            };
            match next {
                Some(callback) => callback(),
                None => return,
            }
        }
    }

    /// Number of callbacks still pending.
    pub fn pending(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.entries.iter().filter(|e| !e.cancelled.load(Ordering::Acquire)).count()
    }
}

impl Default for ManualTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService for ManualTimer {
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut inner = self.inner.lock().unwrap();
        let due = inner.now + delay;
        inner.entries.push(ManualEntry { due, cancelled: cancelled.clone(), callback });
        TimerHandle { cancelled }
    }
}
