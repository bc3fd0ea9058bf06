//! Serializing sink subscribers.

use std::fs::File;
use std::io;
use std::marker::PhantomData;
use std::path::Path;

use serde::Serialize;
use tracing::{error, warn};

use crate::error::{PipelineError, Result};

use super::{Observer, Subscriber, SubscriptionRef};

/// Terminal subscriber that writes each item to an output as one JSON line.
///
/// The sink owns its destination handle, pulls one item at a time, and
/// flushes on any terminal signal. On a write failure it cancels upstream;
/// the destination being gone makes further delivery pointless.
pub struct WriteSink<T, W: io::Write + Send> {
    out: W,
    label: String,
    subscription: Option<SubscriptionRef>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Serialize> WriteSink<T, io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout(), "stdout")
    }
}

impl<T: Serialize> WriteSink<T, io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr(), "stderr")
    }
}

impl<T: Serialize> WriteSink<T, File> {
    /// Create (truncating) a file destination.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| PipelineError::file_error(path.to_path_buf(), e))?;
        Ok(Self::new(file, path.display().to_string()))
    }
}

impl<T: Serialize, W: io::Write + Send> WriteSink<T, W> {
    pub fn new(out: W, label: impl Into<String>) -> Self {
        Self { out, label: label.into(), subscription: None, _marker: PhantomData }
    }

    fn write_item(&mut self, item: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.out.write_all(b"\n")
    }

    fn flush_quietly(&mut self) {
        if let Err(e) = self.out.flush() {
            warn!(sink = %self.label, error = %e, "flush failed");
        }
    }
}

impl<T: Serialize + Send, W: io::Write + Send> Observer<T> for WriteSink<T, W> {
    fn on_next(&mut self, item: T) {
        if let Err(e) = self.write_item(&item) {
            warn!(sink = %self.label, error = %e, "write failed; closing sink");
            if let Some(subscription) = self.subscription.take() {
                subscription.cancel();
            }
            return;
        }
        if let Some(subscription) = &self.subscription {
            subscription.request(1);
        }
    }

    fn on_error(&mut self, err: PipelineError) {
        error!(sink = %self.label, error = %err, "stream failed");
        self.subscription = None;
        self.flush_quietly();
    }

    fn on_complete(&mut self) {
        self.subscription = None;
        self.flush_quietly();
    }
}

impl<T: Serialize + Send, W: io::Write + Send> Subscriber<T> for WriteSink<T, W> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        subscription.request(1);
        self.subscription = Some(subscription);
    }
}
