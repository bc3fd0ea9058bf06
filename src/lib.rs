//! Reactive, backpressure-aware video processing pipeline.
//!
//! Vidflow ingests encoded video from heterogeneous sources (files,
//! cameras, network URLs, a pub/sub channel), decodes it into raw image
//! frames, feeds a pluggable analysis bot, and publishes the bot's
//! analysis/debug/control messages back onto the pub/sub substrate or to
//! files.
//!
//! # Architecture
//!
//! - `streams`: a Reactive Streams runtime with demand-driven publishers,
//!   a composable operator library, generators, and thread/timer/signal
//!   boundary operators
//! - `packets`: the packet algebra (encoded / network / image) with the
//!   base64 chunking that makes frames wire-safe
//! - `sources` and `sinks`: adapters between the packet streams and the
//!   outside world
//! - `media` / `pubsub` / `clock` / `signals`: collaborator facades the
//!   pipeline is generic over
//! - `bot` and `pipeline`: the analysis bot seam and the runner that
//!   assembles source, decode, bot, and sinks into one flow
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vidflow::bot::{BotContext, BotDescriptor, BotHandler, BotMessageKind};
//! use vidflow::config::{Configuration, InputConfig};
//! use vidflow::packets::{ImagePacket, PixelFormat};
//!
//! struct FrameCounter(u64);
//!
//! impl BotHandler for FrameCounter {
//!     fn on_frames(&mut self, ctx: &mut BotContext, frames: &[ImagePacket]) {
//!         self.0 += frames.len() as u64;
//!         ctx.emit(BotMessageKind::Analysis, serde_json::json!({"seen": self.0}));
//!     }
//! }
//!
//! # fn services() -> vidflow::pipeline::PipelineServices { unimplemented!() }
//! fn main() -> vidflow::Result<()> {
//!     let descriptor = BotDescriptor::new(PixelFormat::Rgb0, Box::new(FrameCounter(0)));
//!     let config: Configuration = serde_json::from_str(
//!         r#"{"input": {"kind": "file", "path": "clip.mp4", "batch": true}}"#,
//!     )?;
//!     vidflow::pipeline::run_bot(descriptor, config, services())
//! }
//! ```

pub mod bot;
pub mod clock;
pub mod config;
pub mod decode;
mod error;
pub mod media;
pub mod packets;
pub mod pipeline;
pub mod pubsub;
pub mod signals;
pub mod sinks;
pub mod sources;
pub mod streams;

pub use error::{PipelineError, Result};

// The types most embedders touch.
pub use bot::{BotDescriptor, BotHandler, BotInput, BotMessage, BotMessageKind};
pub use config::Configuration;
pub use packets::{
    EncodedFrame, EncodedMetadata, EncodedPacket, FrameId, ImageFrame, ImageMetadata,
    ImagePacket, NetworkFrame, NetworkMetadata, NetworkPacket, PixelFormat,
};
pub use pipeline::{run_bot, BotEnvironment, PipelineServices};
pub use pubsub::{Document, PubSubClient};
pub use streams::{Deferred, Publisher};
