//! Replay source over recorded network packet streams.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::TimerService;
use crate::packets::NetworkPacket;
use crate::pubsub::Document;
use crate::streams::{interval, publishers, Publisher};

use super::DEFAULT_FPS;

/// Replay a JSON-lines recording of network packets.
///
/// Each line holds one wire document (the format the pub/sub video channel
/// carries). Batch mode replays as fast as downstream pulls; otherwise
/// emission is paced at [`DEFAULT_FPS`]. A malformed line terminates the
/// stream with a wire-format error; a recording is expected to be intact,
/// unlike a live channel.
pub fn network_replay_source(
    filename: impl Into<PathBuf>,
    batch: bool,
    timer: Arc<dyn TimerService>,
) -> Publisher<NetworkPacket> {
    let parsed = publishers::read_lines(filename).try_map(|line| {
        let document: Document = serde_json::from_str(&line)?;
        NetworkPacket::from_document(&document)
    });

    if batch {
        parsed
    } else {
        parsed.lift(interval(timer, Duration::from_secs_f64(1.0 / DEFAULT_FPS)))
    }
}
