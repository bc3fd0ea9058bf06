//! Packet types flowing through the pipeline.
//!
//! Each pipeline stage flows a tagged sum: [`EncodedPacket`] between sources
//! and encoders, [`NetworkPacket`] on the wire, [`ImagePacket`] after decode.
//! Variant dispatch is always an exhaustive `match` so adding a variant is a
//! compile-time break for every stage.
//!
//! A packet is exclusively owned by the in-flight element traversing the
//! stream; operator boundaries move it downstream. No packet is shared
//! mutably.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

mod network;

pub use network::{NetworkFrame, NetworkMetadata, NetworkPacket, MAX_PAYLOAD_SIZE};

/// Maximum number of pixel planes an [`ImageFrame`] can carry.
pub const MAX_IMAGE_PLANES: usize = 4;

/// Identifies a frame by the half-open byte interval `[i1, i2)` it occupies
/// in its source (RTP byte ranges, file positions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameId {
    pub i1: i64,
    pub i2: i64,
}

impl FrameId {
    /// Create a frame id. The interval is half-open; `i1 <= i2` must hold.
    pub fn new(i1: i64, i2: i64) -> Self {
        debug_assert!(i1 <= i2, "frame id interval must be ordered: [{i1}, {i2})");
        Self { i1, i2 }
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.i1, self.i2)
    }
}

/// Codec identity and codec-private-data bytes required to decode the
/// encoded frames that follow.
///
/// Emitted exactly once at the start of an encoded stream and again whenever
/// codec parameters change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMetadata {
    pub codec_name: String,
    pub codec_data: Vec<u8>,
}

/// Compressed video payload.
///
/// `creation_time` is assigned at source read time and rides along for
/// end-to-end latency observation.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub id: FrameId,
    pub creation_time: SystemTime,
    pub key_frame: bool,
}

/// Encoded pipeline stage packet.
#[derive(Debug, Clone)]
pub enum EncodedPacket {
    Metadata(EncodedMetadata),
    Frame(EncodedFrame),
}

/// Pixel layout of decoded frames.
///
/// Packed formats store all components in plane 0; planar formats split
/// components across planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgb0,
    Bgr,
    Yuv420p,
}

impl PixelFormat {
    /// Number of planes this format uses.
    pub fn plane_count(self) -> usize {
        match self {
            PixelFormat::Rgb0 | PixelFormat::Bgr => 1,
            PixelFormat::Yuv420p => 3,
        }
    }
}

/// Shape of the decoded frames that follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMetadata {
    pub pixel_format: PixelFormat,
    pub width: u16,
    pub height: u16,
}

/// One pixel plane: component bytes plus the aligned row stride.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePlane {
    pub data: Vec<u8>,
    pub stride: u32,
}

/// Raw decoded frame.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    pub id: FrameId,
    pub pixel_format: PixelFormat,
    pub width: u16,
    pub height: u16,
    /// At most [`MAX_IMAGE_PLANES`] entries; packed formats use one.
    pub planes: Vec<ImagePlane>,
}

/// Decoded pipeline stage packet.
#[derive(Debug, Clone)]
pub enum ImagePacket {
    Metadata(ImageMetadata),
    Frame(ImageFrame),
}
