//! Pub/sub transport collaborator.
//!
//! The pipeline publishes and subscribes through [`PubSubClient`]; the
//! concrete transport stays outside the crate. Publishes are
//! fire-and-forget: realtime sinks prefer losing a confirmation to
//! stalling a frame stream. [`MemoryPubSub`] is the in-process loopback
//! used for local runs and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Result;

/// Structured document exchanged on the transport.
pub type Document = serde_json::Value;

/// Callback invoked per received document.
pub type MessageHandler = Box<dyn FnMut(Document) + Send>;

/// Channel suffix carrying codec metadata.
pub const METADATA_SUFFIX: &str = "/metadata";
/// Channel suffix carrying bot analysis output.
pub const ANALYSIS_SUFFIX: &str = "/analysis";
/// Channel suffix carrying bot debug output.
pub const DEBUG_SUFFIX: &str = "/debug";
/// Global control channel name.
pub const CONTROL_CHANNEL: &str = "control";

/// Channel name layout derived from one base channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    base: String,
}

impl ChannelNames {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    /// Frames travel on the base channel itself.
    pub fn frames(&self) -> &str {
        &self.base
    }

    pub fn metadata(&self) -> String {
        format!("{}{METADATA_SUFFIX}", self.base)
    }

    pub fn analysis(&self) -> String {
        format!("{}{ANALYSIS_SUFFIX}", self.base)
    }

    pub fn debug(&self) -> String {
        format!("{}{DEBUG_SUFFIX}", self.base)
    }
}

/// Guard for an active channel subscription; unsubscribes on drop.
pub struct SubscriptionToken {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionToken {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self { unsubscribe: Some(Box::new(unsubscribe)) }
    }
}

impl Drop for SubscriptionToken {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

/// Transport client facade.
///
/// Implementations deliver subscription callbacks on the executor the
/// pipeline runs on.
#[async_trait]
pub trait PubSubClient: Send + Sync {
    /// Connect the client. Must be called before publish/subscribe.
    async fn start(&self) -> Result<()>;

    /// Disconnect, dropping in-flight publishes.
    async fn stop(&self) -> Result<()>;

    /// Fire-and-forget publish. Failures are the transport's to log.
    fn publish(&self, channel: &str, payload: Document);

    /// Deliver every document published to `channel` until the token
    /// drops.
    fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<SubscriptionToken>;
}

/// In-process loopback transport.
///
/// Delivery is synchronous on the publisher's thread, which makes tests
/// deterministic. Published documents are additionally recorded per
/// channel for inspection.
pub struct MemoryPubSub {
    inner: Arc<Mutex<MemoryPubSubInner>>,
}

struct MemoryPubSubInner {
    next_id: u64,
    handlers: HashMap<String, Vec<(u64, MessageHandler)>>,
    published: HashMap<String, Vec<Document>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryPubSubInner {
                next_id: 0,
                handlers: HashMap::new(),
                published: HashMap::new(),
            })),
        }
    }

    /// Every document published to `channel`, in order.
    pub fn published(&self, channel: &str) -> Vec<Document> {
        self.inner.lock().unwrap().published.get(channel).cloned().unwrap_or_default()
    }

    /// Number of live subscriptions across all channels.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().handlers.values().map(Vec::len).sum()
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubClient for MemoryPubSub {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn publish(&self, channel: &str, payload: Document) {
        let mut handlers = {
            let mut inner = self.inner.lock().unwrap();
            inner.published.entry(channel.to_string()).or_default().push(payload.clone());
            // take handlers out so delivery runs unlocked; a handler may
            // publish in turn
            inner.handlers.remove(channel).unwrap_or_default()
        };
        for (_, handler) in &mut handlers {
            handler(payload.clone());
        }
        let mut inner = self.inner.lock().unwrap();
        inner.handlers.entry(channel.to_string()).or_default().extend(handlers);
    }

    fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<SubscriptionToken> {
        let id = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.handlers.entry(channel.to_string()).or_default().push((id, handler));
            id
        };
        let registry = self.inner.clone();
        let channel = channel.to_string();
        Ok(SubscriptionToken::new(move || {
            let mut inner = registry.lock().unwrap();
            if let Some(handlers) = inner.handlers.get_mut(&channel) {
                handlers.retain(|(hid, _)| *hid != id);
            }
        }))
    }
}
