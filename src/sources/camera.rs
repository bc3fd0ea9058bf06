//! Capture device source.

use std::sync::Arc;

use crate::media::MediaBackend;
use crate::packets::EncodedPacket;
use crate::streams::{generators, Publisher};

use super::{MediaSourceState, MediaTarget};

/// Stream encoded packets from a capture device.
///
/// `dimensions` constrains the capture size (e.g. `1280x720`). The device
/// paces the stream; no interval is applied.
pub fn camera_source(
    backend: Arc<dyn MediaBackend>,
    dimensions: impl Into<String>,
) -> Publisher<EncodedPacket> {
    let dimensions = dimensions.into();
    generators::stateful(
        move || MediaSourceState::new(backend, MediaTarget::Camera { dimensions }, false),
        |state: &mut MediaSourceState, n, observer: &mut dyn crate::streams::Observer<EncodedPacket>| {
            state.generate(n, observer)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::EncodedPacket;
    use crate::sources::test_support::{video_packet, MockBackend};
    use std::sync::Mutex;

    #[test]
    fn metadata_precedes_device_frames() {
        let backend = MockBackend::with_packets(vec![video_packet(3, true)]);
        let source = camera_source(backend.clone(), "640x480");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let deferred = source.process(move |packet| {
            sink.lock().unwrap().push(matches!(packet, EncodedPacket::Metadata(_)));
        });

        assert!(matches!(deferred.try_result(), Some(Ok(()))));
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
        assert_eq!(backend.last_uri.lock().unwrap().as_deref(), Some("camera:640x480"));
    }
}
