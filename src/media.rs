//! Codec façade traits.
//!
//! The pipeline consumes media through these object-safe seams and never
//! depends on a particular codec library's API shape. A production build
//! plugs an FFmpeg-style backend in; tests plug mocks in.

use std::collections::HashMap;

use crate::error::Result;
use crate::packets::{EncodedFrame, EncodedMetadata, ImageFrame, ImageMetadata};

/// One demuxed compressed packet, any stream.
#[derive(Debug, Clone)]
pub struct MediaPacket {
    /// Which container stream this packet belongs to.
    pub stream_index: usize,
    /// Compressed payload bytes.
    pub data: Vec<u8>,
    /// Byte position of the packet in its source; drives frame ids.
    pub pos: i64,
    /// Whether this packet is independently decodable.
    pub key_frame: bool,
}

/// An open demuxing context over one media source.
///
/// Implementations: container demuxers, camera capture sessions, raw
/// bitstream readers.
pub trait MediaReader: Send {
    /// Index of the selected (best) video stream.
    fn video_stream(&self) -> usize;

    /// Codec name and codec-private data of the selected video stream.
    fn codec(&self) -> EncodedMetadata;

    /// Declared frame rate of the selected video stream, when the
    /// container exposes one.
    fn frames_per_second(&self) -> Option<f64> {
        None
    }

    /// Read the next compressed packet, or `None` at end-of-stream.
    fn read_packet(&mut self) -> Result<Option<MediaPacket>>;

    /// Rewind to the start of the source.
    fn seek_to_start(&mut self) -> Result<()>;
}

/// Protocol options passed to URL opens, parsed from `k1=v1,k2=v2` form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaOptions {
    pub entries: HashMap<String, String>,
}

impl MediaOptions {
    /// Parse `k1=v1,k2=v2`; empty input yields empty options, entries
    /// without `=` are ignored.
    pub fn parse(options: &str) -> Self {
        let entries = options
            .split(',')
            .filter_map(|pair| {
                let (k, v) = pair.split_once('=')?;
                Some((k.trim().to_string(), v.trim().to_string()))
            })
            .collect();
        Self { entries }
    }
}

/// Factory for media readers.
pub trait MediaBackend: Send + Sync {
    /// Open a source by URI (file path, network URL).
    fn open_uri(&self, uri: &str, options: &MediaOptions) -> Result<Box<dyn MediaReader>>;

    /// Open a capture device constrained to `dimensions` (e.g. `1280x720`).
    fn open_camera(&self, dimensions: &str) -> Result<Box<dyn MediaReader>>;
}

/// Decoder turning encoded frames into raw images.
///
/// `configure` must be called with stream metadata before the first
/// `decode` and reports the output shape; decoders may buffer, so one
/// encoded frame yields zero or more images. Scaling to bounding
/// dimensions and pixel-format conversion are the implementation's
/// concern.
pub trait VideoDecoder: Send {
    fn configure(&mut self, metadata: &EncodedMetadata) -> Result<ImageMetadata>;
    fn decode(&mut self, frame: &EncodedFrame) -> Result<Vec<ImageFrame>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_options_parse_key_value_pairs() {
        let options = MediaOptions::parse("rtsp_transport=tcp, max_delay=0");
        assert_eq!(options.entries["rtsp_transport"], "tcp");
        assert_eq!(options.entries["max_delay"], "0");
    }

    #[test]
    fn media_options_tolerate_junk() {
        assert!(MediaOptions::parse("").entries.is_empty());
        assert!(MediaOptions::parse("noequals").entries.is_empty());
    }
}
