//! Pub/sub channel source.

use std::sync::Arc;

use tracing::warn;

use crate::packets::NetworkPacket;
use crate::pubsub::{ChannelNames, PubSubClient, SubscriptionToken};
use crate::streams::{generators, AsyncObserver, Publisher};

/// Stream network packets from a pub/sub channel pair.
///
/// Subscribes to the frames channel and its metadata sibling; documents
/// arrive whenever the transport delivers them and buffer until downstream
/// demand. Malformed documents are logged and skipped; a live channel may
/// carry unrelated traffic and one bad document must not kill the
/// pipeline.
pub fn pubsub_source(
    client: Arc<dyn PubSubClient>,
    channel: impl Into<String>,
) -> Publisher<NetworkPacket> {
    let names = ChannelNames::new(channel);
    generators::async_source(
        move |observer: AsyncObserver<NetworkPacket>| {
            let mut tokens: Vec<SubscriptionToken> = Vec::with_capacity(2);
            for channel in [names.frames().to_string(), names.metadata()] {
                let handler_observer = observer.clone();
                let handler_channel = channel.clone();
                let subscribed = client.subscribe(
                    &channel,
                    Box::new(move |document| match NetworkPacket::from_document(&document) {
                        Ok(packet) => handler_observer.on_next(packet),
                        Err(error) => {
                            warn!(channel = %handler_channel, %error, "skipping malformed document");
                        }
                    }),
                );
                match subscribed {
                    Ok(token) => tokens.push(token),
                    Err(error) => {
                        observer.on_error(error);
                        break;
                    }
                }
            }
            tokens
        },
        // dropping the tokens unsubscribes both channels
        |tokens: Vec<SubscriptionToken>| drop(tokens),
    )
}

/// Stream raw documents from one pub/sub channel.
///
/// Backs the control channel: every document is forwarded as-is.
pub fn document_source(
    client: Arc<dyn PubSubClient>,
    channel: impl Into<String>,
) -> Publisher<crate::pubsub::Document> {
    let channel = channel.into();
    generators::async_source(
        move |observer: AsyncObserver<crate::pubsub::Document>| {
            let handler_observer = observer.clone();
            match client
                .subscribe(&channel, Box::new(move |document| handler_observer.on_next(document)))
            {
                Ok(token) => Some(token),
                Err(error) => {
                    observer.on_error(error);
                    None
                }
            }
        },
        |token: Option<SubscriptionToken>| drop(token),
    )
}
