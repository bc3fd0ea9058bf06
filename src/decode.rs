//! Decode operators bridging the pipeline stages.
//!
//! `decode_network_stream` turns wire packets back into encoded packets,
//! reassembling chunked frames; `decode_image_frames` drives a
//! [`VideoDecoder`] to produce raw images. Both are ordinary stream
//! operators built on `flat_map`, so they compose with the rest of the
//! pipeline and honor demand like any other stage.

use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::media::VideoDecoder;
use crate::packets::{EncodedPacket, ImagePacket, NetworkFrame, NetworkPacket};
use crate::streams::{publishers, StreamOp};

/// Reassemble a network packet stream into an encoded packet stream.
///
/// Chunked frames are accumulated per frame id and emitted once complete.
/// A gap, duplicate, or mismatched fragment invalidates the in-flight
/// assembly: the partial frame is logged and dropped, and assembly resumes
/// at the next first chunk. Live channels prefer a missing frame over a
/// dead pipeline.
pub fn decode_network_stream() -> StreamOp<NetworkPacket, EncodedPacket> {
    Box::new(|upstream| {
        let mut assembler = ChunkAssembler::default();
        upstream.flat_map(move |packet| match assembler.push(packet) {
            Ok(Some(encoded)) => publishers::of(vec![encoded]),
            Ok(None) => publishers::empty(),
            Err(error) => {
                warn!(%error, "dropping invalid network fragment");
                publishers::empty()
            }
        })
    })
}

/// Incremental chunk grouping; at most one frame is in flight because the
/// wire orders fragments within a frame.
#[derive(Default)]
struct ChunkAssembler {
    pending: Vec<NetworkFrame>,
}

impl ChunkAssembler {
    fn push(&mut self, packet: NetworkPacket) -> Result<Option<EncodedPacket>> {
        match packet {
            NetworkPacket::Metadata(metadata) => {
                // metadata never chunks; an in-flight frame stays pending
                Ok(Some(EncodedPacket::Metadata(metadata.to_metadata()?)))
            }
            NetworkPacket::Frame(frame) => {
                if frame.chunk == 1 {
                    if !self.pending.is_empty() {
                        let dropped = self.pending.len();
                        self.pending.clear();
                        self.pending.push(frame);
                        return Err(PipelineError::chunk_assembly(format!(
                            "new frame started with {dropped} fragments outstanding"
                        )));
                    }
                    self.pending.push(frame);
                } else {
                    let Some(first) = self.pending.first() else {
                        return Err(PipelineError::chunk_assembly(format!(
                            "continuation chunk {} without a first fragment",
                            frame.chunk
                        )));
                    };
                    if frame.id != first.id
                        || frame.chunks != first.chunks
                        || frame.chunk as usize != self.pending.len() + 1
                    {
                        let id = first.id;
                        self.pending.clear();
                        return Err(PipelineError::chunk_assembly(format!(
                            "fragment does not continue frame {id}"
                        )));
                    }
                    self.pending.push(frame);
                }

                let expected = self.pending[0].chunks as usize;
                if self.pending.len() == expected {
                    let chunks = std::mem::take(&mut self.pending);
                    let frame = NetworkFrame::reassemble(chunks, false)?;
                    Ok(Some(EncodedPacket::Frame(frame)))
                } else {
                    Ok(None)
                }
            }
        }
    }
}

/// Decode encoded packets into image packets through a [`VideoDecoder`].
///
/// Stream metadata configures the decoder and emits the output shape;
/// frames decode into zero or more images. A frame arriving before any
/// metadata is logged and dropped. Decoder failures are terminal: metadata
/// that cannot configure is an initialization error, a frame that cannot
/// decode is a frame-generation error.
pub fn decode_image_frames(decoder: Box<dyn VideoDecoder>) -> StreamOp<EncodedPacket, ImagePacket> {
    Box::new(move |upstream| {
        let mut decoder = decoder;
        let mut configured = false;
        upstream.flat_map(move |packet| match packet {
            EncodedPacket::Metadata(metadata) => match decoder.configure(&metadata) {
                Ok(shape) => {
                    configured = true;
                    publishers::of(vec![ImagePacket::Metadata(shape)])
                }
                Err(error) => publishers::error(error),
            },
            EncodedPacket::Frame(frame) => {
                if !configured {
                    warn!(id = %frame.id, "frame before stream metadata; dropping");
                    return publishers::empty();
                }
                match decoder.decode(&frame) {
                    Ok(images) => {
                        publishers::of(images.into_iter().map(ImagePacket::Frame).collect())
                    }
                    Err(error) => publishers::error(PipelineError::frame_generation(format!(
                        "decoding frame {}: {error}",
                        frame.id
                    ))),
                }
            }
        })
    })
}
