//! One-shot result cell resolved by a stream's terminal event.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};

use crate::error::{PipelineError, Result};

struct Shared<T> {
    state: Mutex<State<T>>,
    resolved: Condvar,
}

struct State<T> {
    result: Option<Result<T>>,
    taken: bool,
    waker: Option<Waker>,
}

/// A one-shot container for the outcome of a [`process`] invocation.
///
/// Carries either a final value, an error, or completion. The result can be
/// consumed exactly once, through [`try_result`](Deferred::try_result),
/// blocking [`wait`](Deferred::wait), or by `.await`ing the deferred.
/// Consuming it twice observes the moved-value lifecycle fault.
///
/// [`process`]: super::Publisher::process
pub struct Deferred<T> {
    shared: Arc<Shared<T>>,
}

/// Write half of a [`Deferred`]; consumed by resolution.
///
/// Dropping an unresolved resolver marks the deferred as never wired, which
/// surfaces as [`PipelineError::NotInitialized`].
pub struct Resolver<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Deferred<T> {
    pub(crate) fn new() -> (Deferred<T>, Resolver<T>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State { result: None, taken: false, waker: None }),
            resolved: Condvar::new(),
        });
        (Deferred { shared: shared.clone() }, Resolver { shared: Some(shared) })
    }

    /// Take the result if the terminal event already happened.
    pub fn try_result(&self) -> Option<Result<T>> {
        let mut state = self.shared.state.lock().unwrap();
        match state.result.take() {
            Some(result) => {
                state.taken = true;
                Some(result)
            }
            None if state.taken => Some(Err(PipelineError::ValueMoved)),
            None => None,
        }
    }

    /// Whether the terminal event has happened.
    pub fn is_resolved(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.taken || state.result.is_some()
    }

    /// Block the calling thread until the terminal event, then take the
    /// result. Intended for synchronous pipelines and tests; async callers
    /// should `.await` instead.
    pub fn wait(self) -> Result<T> {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if let Some(result) = state.result.take() {
                state.taken = true;
                return result;
            }
            if state.taken {
                return Err(PipelineError::ValueMoved);
            }
            state = self.shared.resolved.wait(state).unwrap();
        }
    }
}

impl<T> Future for Deferred<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(result) = state.result.take() {
            state.taken = true;
            return Poll::Ready(result);
        }
        if state.taken {
            return Poll::Ready(Err(PipelineError::ValueMoved));
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> Resolver<T> {
    /// Resolve with the final value (or completion, for `T = ()`).
    pub fn complete(mut self, value: T) {
        self.resolve(Ok(value));
    }

    /// Resolve with the stream's terminal error.
    pub fn fail(mut self, error: PipelineError) {
        self.resolve(Err(error));
    }

    fn resolve(&mut self, result: Result<T>) {
        let Some(shared) = self.shared.take() else { return };
        let waker = {
            let mut state = shared.state.lock().unwrap();
            state.result = Some(result);
            state.waker.take()
        };
        shared.resolved.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> Drop for Resolver<T> {
    fn drop(&mut self) {
        if self.shared.is_some() {
            self.resolve(Err(PipelineError::NotInitialized));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_once_then_reports_moved_value() {
        let (deferred, resolver) = Deferred::new();
        assert!(!deferred.is_resolved());
        resolver.complete(7);
        assert!(deferred.is_resolved());
        assert!(matches!(deferred.try_result(), Some(Ok(7))));
        assert!(matches!(deferred.try_result(), Some(Err(PipelineError::ValueMoved))));
    }

    #[test]
    fn wait_returns_from_another_thread() {
        let (deferred, resolver) = Deferred::new();
        let handle = std::thread::spawn(move || deferred.wait());
        std::thread::sleep(std::time::Duration::from_millis(10));
        resolver.complete("done");
        assert_eq!(handle.join().unwrap().unwrap(), "done");
    }

    #[test]
    fn dropped_resolver_surfaces_lifecycle_fault() {
        let (deferred, resolver) = Deferred::<()>::new();
        drop(resolver);
        assert!(matches!(deferred.try_result(), Some(Err(PipelineError::NotInitialized))));
    }

    #[tokio::test]
    async fn deferred_is_awaitable() {
        let (deferred, resolver) = Deferred::new();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            resolver.complete(42);
        });
        assert_eq!(deferred.await.unwrap(), 42);
    }
}
