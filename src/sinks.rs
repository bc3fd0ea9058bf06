//! Transport-facing sinks.
//!
//! Publishes are fire-and-forget: a realtime sink never stalls the frame
//! stream waiting for delivery confirmation, and transport failures are
//! the client's to log.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{error, info};

use crate::error::PipelineError;
use crate::packets::{EncodedPacket, NetworkPacket};
use crate::pubsub::{ChannelNames, Document, PubSubClient};
use crate::streams::{Observer, Subscriber, SubscriptionRef};

/// How often the frame sink reports its publish count.
const FRAME_LOG_PERIOD: u64 = 100;

/// Publish an encoded packet stream onto a pub/sub channel pair.
///
/// Metadata goes to the metadata sibling channel; frames are chunked into
/// wire documents on the base channel.
pub struct PubSubFrameSink {
    client: Arc<dyn PubSubClient>,
    names: ChannelNames,
    frames_published: u64,
    subscription: Option<SubscriptionRef>,
}

impl PubSubFrameSink {
    pub fn new(client: Arc<dyn PubSubClient>, channel: impl Into<String>) -> Self {
        Self { client, names: ChannelNames::new(channel), frames_published: 0, subscription: None }
    }
}

impl Observer<EncodedPacket> for PubSubFrameSink {
    fn on_next(&mut self, packet: EncodedPacket) {
        match packet {
            EncodedPacket::Metadata(metadata) => {
                self.client.publish(&self.names.metadata(), metadata.to_network().to_document());
            }
            EncodedPacket::Frame(frame) => {
                for part in frame.to_network(SystemTime::now()) {
                    self.client.publish(self.names.frames(), part.to_document());
                }
                self.frames_published += 1;
                if self.frames_published % FRAME_LOG_PERIOD == 0 {
                    info!(
                        channel = %self.names.frames(),
                        frames = self.frames_published,
                        "published frames"
                    );
                }
            }
        }
        if let Some(subscription) = &self.subscription {
            subscription.request(1);
        }
    }

    fn on_error(&mut self, err: PipelineError) {
        error!(channel = %self.names.frames(), error = %err, "frame stream failed");
        self.subscription = None;
    }

    fn on_complete(&mut self) {
        info!(
            channel = %self.names.frames(),
            frames = self.frames_published,
            "frame stream complete"
        );
        self.subscription = None;
    }
}

impl Subscriber<EncodedPacket> for PubSubFrameSink {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        subscription.request(1);
        self.subscription = Some(subscription);
    }
}

/// Publish documents onto one fixed channel.
///
/// Used both as a stream subscriber and imperatively (the bot output
/// router drives it through [`Observer`]).
pub struct DocumentPubSubSink {
    client: Arc<dyn PubSubClient>,
    channel: String,
    subscription: Option<SubscriptionRef>,
}

impl DocumentPubSubSink {
    pub fn new(client: Arc<dyn PubSubClient>, channel: impl Into<String>) -> Self {
        Self { client, channel: channel.into(), subscription: None }
    }
}

impl Observer<Document> for DocumentPubSubSink {
    fn on_next(&mut self, document: Document) {
        self.client.publish(&self.channel, document);
        if let Some(subscription) = &self.subscription {
            subscription.request(1);
        }
    }

    fn on_error(&mut self, err: PipelineError) {
        error!(channel = %self.channel, error = %err, "document stream failed");
        self.subscription = None;
    }

    fn on_complete(&mut self) {
        self.subscription = None;
    }
}

impl Subscriber<Document> for DocumentPubSubSink {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        subscription.request(1);
        self.subscription = Some(subscription);
    }
}

/// Record a network packet stream as JSON lines compatible with
/// [`network_replay_source`](crate::sources::network_replay_source).
pub fn replay_file_sink(
    path: &std::path::Path,
) -> crate::error::Result<impl Subscriber<NetworkPacket>> {
    struct RecorderSink {
        inner: crate::streams::WriteSink<Document, std::fs::File>,
    }

    impl Observer<NetworkPacket> for RecorderSink {
        fn on_next(&mut self, packet: NetworkPacket) {
            self.inner.on_next(packet.to_document());
        }

        fn on_error(&mut self, err: PipelineError) {
            self.inner.on_error(err);
        }

        fn on_complete(&mut self) {
            self.inner.on_complete();
        }
    }

    impl Subscriber<NetworkPacket> for RecorderSink {
        fn on_subscribe(&mut self, subscription: SubscriptionRef) {
            self.inner.on_subscribe(subscription);
        }
    }

    Ok(RecorderSink { inner: crate::streams::WriteSink::create(path)? })
}
