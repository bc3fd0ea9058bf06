//! Source adapters producing packet streams.
//!
//! Every media-backed source shares one skeleton: lazy open on first
//! demand, codec metadata exactly once before any frame, a demand-sliced
//! read loop that skips non-video packets, EOF handling (seek-and-loop or
//! complete), and teardown of the media context with the generator state.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, trace};

use crate::error::PipelineError;
use crate::media::{MediaBackend, MediaOptions, MediaReader};
use crate::packets::{EncodedFrame, EncodedPacket, FrameId};
use crate::streams::Observer;

mod camera;
mod file;
mod pubsub;
mod replay;
mod url;

pub use camera::camera_source;
pub use file::file_source;
pub use pubsub::{document_source, pubsub_source};
pub use replay::network_replay_source;
pub use url::url_source;

/// Pacing fallback for live playback when neither the configuration nor
/// the media declares a frame rate.
pub const DEFAULT_FPS: f64 = 25.0;

/// What a media-backed source opens.
pub(crate) enum MediaTarget {
    Uri { uri: String, options: MediaOptions },
    Camera { dimensions: String },
}

impl MediaTarget {
    fn describe(&self) -> String {
        match self {
            MediaTarget::Uri { uri, .. } => uri.clone(),
            MediaTarget::Camera { dimensions } => format!("camera {dimensions}"),
        }
    }
}

/// Generator state shared by the file, url, and camera sources.
pub(crate) struct MediaSourceState {
    backend: Arc<dyn MediaBackend>,
    target: MediaTarget,
    looped: bool,
    reader: Option<Box<dyn MediaReader>>,
    last_pos: i64,
    metadata_sent: bool,
}

impl MediaSourceState {
    pub(crate) fn new(backend: Arc<dyn MediaBackend>, target: MediaTarget, looped: bool) -> Self {
        Self { backend, target, looped, reader: None, last_pos: 0, metadata_sent: false }
    }

    pub(crate) fn generate(&mut self, n: u64, observer: &mut dyn Observer<EncodedPacket>) {
        if self.reader.is_none() {
            debug!(source = %self.target.describe(), "opening media source");
            let opened = match &self.target {
                MediaTarget::Uri { uri, options } => self.backend.open_uri(uri, options),
                MediaTarget::Camera { dimensions } => self.backend.open_camera(dimensions),
            };
            match opened {
                Ok(reader) => self.reader = Some(reader),
                Err(error) => {
                    observer.on_error(PipelineError::stream_init_with_source(
                        format!("can't open {}", self.target.describe()),
                        Box::new(error),
                    ));
                    return;
                }
            }
        }
        let reader = self.reader.as_mut().expect("opened above");

        let mut emitted = 0u64;
        while emitted < n {
            if !self.metadata_sent {
                observer.on_next(EncodedPacket::Metadata(reader.codec()));
                self.metadata_sent = true;
                emitted += 1;
                continue;
            }

            match reader.read_packet() {
                Ok(Some(packet)) => {
                    if packet.stream_index != reader.video_stream() {
                        continue;
                    }
                    trace!(pos = packet.pos, key_frame = packet.key_frame, "video packet");
                    let frame = EncodedFrame {
                        data: packet.data,
                        id: FrameId::new(self.last_pos, packet.pos),
                        creation_time: SystemTime::now(),
                        key_frame: packet.key_frame,
                    };
                    self.last_pos = packet.pos + 1;
                    observer.on_next(EncodedPacket::Frame(frame));
                    emitted += 1;
                }
                Ok(None) => {
                    if self.looped {
                        debug!(source = %self.target.describe(), "eof; restarting");
                        if let Err(error) = reader.seek_to_start() {
                            observer.on_error(PipelineError::frame_generation(format!(
                                "can't seek to start: {error}"
                            )));
                            return;
                        }
                        // byte positions restart with the source, and so
                        // must the id intervals
                        self.last_pos = 0;
                        continue;
                    }
                    debug!(source = %self.target.describe(), "eof");
                    observer.on_complete();
                    return;
                }
                Err(error) => {
                    observer.on_error(PipelineError::frame_generation(error.to_string()));
                    return;
                }
            }
        }
    }
}
