//! Bridge from the demand-driven runtime to `futures::Stream`.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use futures::Stream;

use crate::error::{PipelineError, Result};

use super::{Observer, Publisher, Subscriber, SubscriptionRef};

/// How much demand one poll cycle extends upstream.
const POLL_BATCH: u64 = 16;

struct BridgeShared<T> {
    items: VecDeque<T>,
    terminal: Option<Option<PipelineError>>,
    error_emitted: bool,
    outstanding: u64,
    subscription: Option<SubscriptionRef>,
    waker: Option<Waker>,
}

/// `futures::Stream` adapter over a [`Publisher`].
///
/// Items arrive as `Ok`, a stream error as one final `Err`. Dropping the
/// adapter cancels the underlying subscription.
pub struct PublisherStream<T> {
    shared: Arc<Mutex<BridgeShared<T>>>,
}

pub(super) fn into_stream<T: Send + 'static>(publisher: Publisher<T>) -> PublisherStream<T> {
    let shared = Arc::new(Mutex::new(BridgeShared {
        items: VecDeque::new(),
        terminal: None,
        error_emitted: false,
        outstanding: 0,
        subscription: None,
        waker: None,
    }));
    publisher.subscribe(BridgeSubscriber { shared: shared.clone() });
    PublisherStream { shared }
}

struct BridgeSubscriber<T> {
    shared: Arc<Mutex<BridgeShared<T>>>,
}

impl<T> BridgeSubscriber<T> {
    fn wake(&self) {
        let waker = self.shared.lock().unwrap().waker.take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T: Send> Observer<T> for BridgeSubscriber<T> {
    fn on_next(&mut self, item: T) {
        {
            let mut s = self.shared.lock().unwrap();
            s.outstanding = s.outstanding.saturating_sub(1);
            s.items.push_back(item);
        }
        self.wake();
    }

    fn on_error(&mut self, error: PipelineError) {
        {
            let mut s = self.shared.lock().unwrap();
            s.terminal = Some(Some(error));
            s.subscription = None;
        }
        self.wake();
    }

    fn on_complete(&mut self) {
        {
            let mut s = self.shared.lock().unwrap();
            s.terminal = Some(None);
            s.subscription = None;
        }
        self.wake();
    }
}

impl<T: Send> Subscriber<T> for BridgeSubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        self.shared.lock().unwrap().subscription = Some(subscription);
    }
}

impl<T> Stream for PublisherStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let request = {
            let mut s = self.shared.lock().unwrap();
            if let Some(item) = s.items.pop_front() {
                return Poll::Ready(Some(Ok(item)));
            }
            if s.terminal.is_some() {
                let pending = s.terminal.as_mut().and_then(Option::take);
                return match pending {
                    Some(error) if !s.error_emitted => {
                        s.error_emitted = true;
                        Poll::Ready(Some(Err(error)))
                    }
                    _ => Poll::Ready(None),
                };
            }
            s.waker = Some(cx.waker().clone());
            if s.outstanding == 0 {
                s.outstanding = POLL_BATCH;
                s.subscription.clone()
            } else {
                None
            }
        };
        if let Some(subscription) = request {
            subscription.request(POLL_BATCH);
            // a synchronous upstream may have delivered already
            let mut s = self.shared.lock().unwrap();
            if let Some(item) = s.items.pop_front() {
                return Poll::Ready(Some(Ok(item)));
            }
            if s.terminal.is_some() {
                let pending = s.terminal.as_mut().and_then(Option::take);
                return match pending {
                    Some(error) if !s.error_emitted => {
                        s.error_emitted = true;
                        Poll::Ready(Some(Err(error)))
                    }
                    _ => Poll::Ready(None),
                };
            }
        }
        Poll::Pending
    }
}

impl<T> Drop for PublisherStream<T> {
    fn drop(&mut self) {
        let subscription = self.shared.lock().unwrap().subscription.take();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::publishers;
    use futures::StreamExt;

    #[tokio::test]
    async fn collects_a_synchronous_publisher() {
        let stream = publishers::range(0, 5).into_stream();
        let items: Vec<i64> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn surfaces_the_terminal_error_once() {
        let mut stream = publishers::error::<i64>(PipelineError::NotSupported).into_stream();
        assert!(matches!(stream.next().await, Some(Err(PipelineError::NotSupported))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_upstream() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let fired = Arc::new(AtomicU32::new(0));
        let witness = fired.clone();
        let mut stream = publishers::range(0, 1_000_000)
            .do_finally(move || {
                witness.fetch_add(1, Ordering::SeqCst);
            })
            .into_stream();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, 0);
        drop(stream);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
