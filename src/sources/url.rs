//! Network URL source.

use std::sync::Arc;

use crate::media::{MediaBackend, MediaOptions};
use crate::packets::EncodedPacket;
use crate::streams::{generators, Publisher};

use super::{MediaSourceState, MediaTarget};

/// Stream encoded packets from a network URL.
///
/// `options` are protocol options in `k1=v1,k2=v2` form, passed through to
/// the backend. No pacing is applied; the remote end times the stream.
pub fn url_source(
    backend: Arc<dyn MediaBackend>,
    url: impl Into<String>,
    options: &str,
) -> Publisher<EncodedPacket> {
    let uri = url.into();
    let options = MediaOptions::parse(options);
    generators::stateful(
        move || MediaSourceState::new(backend, MediaTarget::Uri { uri, options }, false),
        |state: &mut MediaSourceState, n, observer: &mut dyn crate::streams::Observer<EncodedPacket>| {
            state.generate(n, observer)
        },
    )
}
