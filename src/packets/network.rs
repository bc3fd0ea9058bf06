//! Wire-safe packet forms.
//!
//! The transport accepts text-only structured documents, so codec data and
//! frame payloads travel base64-encoded. A frame whose base64 body exceeds
//! [`MAX_PAYLOAD_SIZE`] characters is split into ordered chunks sharing the
//! same id and timestamp; reassembly concatenates in chunk order and a gap,
//! duplicate, or mismatch invalidates the assembly.
//!
//! Frame documents are `{d, i: [i1, i2], t, c, n}` with `t` in milliseconds
//! since the epoch; metadata documents are `{codec, data}`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::{EncodedFrame, EncodedMetadata, FrameId};
use crate::error::{PipelineError, Result};
use crate::pubsub::Document;

/// Maximum number of base64 characters a single wire document may carry.
pub const MAX_PAYLOAD_SIZE: usize = 65_000;

/// Network representation of codec parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMetadata {
    pub codec_name: String,
    pub base64_data: String,
}

/// Network representation of one chunk of an encoded frame.
///
/// `chunk` is 1-based; a single-chunk frame has `chunk == chunks == 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkFrame {
    pub base64_data: String,
    pub id: FrameId,
    pub t: SystemTime,
    pub chunk: u32,
    pub chunks: u32,
}

/// Network pipeline stage packet.
#[derive(Debug, Clone)]
pub enum NetworkPacket {
    Metadata(NetworkMetadata),
    Frame(NetworkFrame),
}

impl EncodedMetadata {
    /// Wire-safe form: codec-private data goes out base64-encoded.
    pub fn to_network(&self) -> NetworkMetadata {
        NetworkMetadata {
            codec_name: self.codec_name.clone(),
            base64_data: BASE64.encode(&self.codec_data),
        }
    }
}

impl NetworkMetadata {
    /// Decode back into in-process codec metadata.
    pub fn to_metadata(&self) -> Result<EncodedMetadata> {
        let codec_data = BASE64
            .decode(&self.base64_data)
            .map_err(|e| PipelineError::wire_format(format!("metadata base64: {e}")))?;
        Ok(EncodedMetadata { codec_name: self.codec_name.clone(), codec_data })
    }
}

impl EncodedFrame {
    /// Split this frame into wire chunks stamped with `t`.
    ///
    /// Concatenating the base64 fragments in chunk order and decoding yields
    /// the original payload; `chunks == ceil(len(base64) / MAX_PAYLOAD_SIZE)`.
    pub fn to_network(&self, t: SystemTime) -> Vec<NetworkFrame> {
        let encoded = BASE64.encode(&self.data);
        // base64 output is ASCII, so byte offsets are char boundaries
        let chunks = encoded.len().div_ceil(MAX_PAYLOAD_SIZE).max(1) as u32;
        (0..chunks)
            .map(|n| {
                let start = n as usize * MAX_PAYLOAD_SIZE;
                let end = encoded.len().min(start + MAX_PAYLOAD_SIZE);
                NetworkFrame {
                    base64_data: encoded[start..end].to_string(),
                    id: self.id,
                    t,
                    chunk: n + 1,
                    chunks,
                }
            })
            .collect()
    }
}

impl NetworkFrame {
    /// Reassemble one frame from its chunks.
    ///
    /// The group must carry the same `id`, `t`, and `chunks`, with `chunk`
    /// values forming exactly `{1, .., chunks}`. Order of the input slice
    /// does not matter.
    pub fn reassemble(chunks: Vec<NetworkFrame>, key_frame: bool) -> Result<EncodedFrame> {
        let first = chunks
            .first()
            .ok_or_else(|| PipelineError::chunk_assembly("empty chunk group"))?;
        let expected = first.chunks;
        let id = first.id;
        let t = first.t;

        if chunks.len() as u32 != expected {
            return Err(PipelineError::chunk_assembly(format!(
                "frame {id}: got {} chunks, expected {expected}",
                chunks.len()
            )));
        }

        let mut slots: Vec<Option<String>> = vec![None; expected as usize];
        for part in chunks {
            if part.id != id {
                return Err(PipelineError::chunk_assembly(format!(
                    "mismatched frame id: {} vs {id}",
                    part.id
                )));
            }
            if part.chunks != expected {
                return Err(PipelineError::chunk_assembly(format!(
                    "frame {id}: mismatched chunk count {} vs {expected}",
                    part.chunks
                )));
            }
            if part.chunk == 0 || part.chunk > expected {
                return Err(PipelineError::chunk_assembly(format!(
                    "frame {id}: chunk {} outside 1..={expected}",
                    part.chunk
                )));
            }
            let slot = &mut slots[(part.chunk - 1) as usize];
            if slot.is_some() {
                return Err(PipelineError::chunk_assembly(format!(
                    "frame {id}: duplicate chunk {}",
                    part.chunk
                )));
            }
            *slot = Some(part.base64_data);
        }

        let mut encoded = String::new();
        for (n, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(piece) => encoded.push_str(&piece),
                None => {
                    return Err(PipelineError::chunk_assembly(format!(
                        "frame {id}: missing chunk {}",
                        n + 1
                    )))
                }
            }
        }

        let data = BASE64
            .decode(&encoded)
            .map_err(|e| PipelineError::chunk_assembly(format!("frame {id}: base64: {e}")))?;
        Ok(EncodedFrame { data, id, creation_time: t, key_frame })
    }
}

// ---------------------------------------------------------------------------
// Wire documents
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct FrameWire {
    d: String,
    i: [i64; 2],
    t: u64,
    c: u32,
    n: u32,
}

#[derive(Serialize, Deserialize)]
struct MetadataWire {
    codec: String,
    data: String,
}

fn millis_since_epoch(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

fn time_from_millis(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

impl NetworkFrame {
    pub fn to_document(&self) -> Document {
        serde_json::to_value(FrameWire {
            d: self.base64_data.clone(),
            i: [self.id.i1, self.id.i2],
            t: millis_since_epoch(self.t),
            c: self.chunk,
            n: self.chunks,
        })
        .expect("frame wire form is always serializable")
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        let wire: FrameWire = serde_json::from_value(doc.clone())?;
        Ok(NetworkFrame {
            base64_data: wire.d,
            id: FrameId::new(wire.i[0], wire.i[1]),
            t: time_from_millis(wire.t),
            chunk: wire.c,
            chunks: wire.n,
        })
    }
}

impl NetworkMetadata {
    pub fn to_document(&self) -> Document {
        serde_json::to_value(MetadataWire {
            codec: self.codec_name.clone(),
            data: self.base64_data.clone(),
        })
        .expect("metadata wire form is always serializable")
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        let wire: MetadataWire = serde_json::from_value(doc.clone())?;
        Ok(NetworkMetadata { codec_name: wire.codec, base64_data: wire.data })
    }
}

impl NetworkPacket {
    pub fn to_document(&self) -> Document {
        match self {
            NetworkPacket::Metadata(m) => m.to_document(),
            NetworkPacket::Frame(f) => f.to_document(),
        }
    }

    /// Discriminate a wire document by its field layout.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let obj = doc
            .as_object()
            .ok_or_else(|| PipelineError::wire_format("expected a document object"))?;
        if obj.contains_key("codec") {
            Ok(NetworkPacket::Metadata(NetworkMetadata::from_document(doc)?))
        } else {
            Ok(NetworkPacket::Frame(NetworkFrame::from_document(doc)?))
        }
    }
}
