//! Pipeline configuration.
//!
//! Command-line parsing lives outside the crate; whatever parses hands the
//! core one deserialized [`Configuration`]. Option conflicts that a CLI
//! can express but the pipeline can't honor are rejected in
//! [`validate`](Configuration::validate) before anything opens.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::bot::ExecutionMode;
use crate::error::{PipelineError, Result};
use crate::packets::PixelFormat;
use crate::pubsub::Document;

/// Where frames come from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputConfig {
    /// Local media file; the only input that can loop or run in batch
    /// mode.
    File {
        path: PathBuf,
        #[serde(rename = "loop", default)]
        looped: bool,
        #[serde(default)]
        batch: bool,
    },
    /// Network URL with `k1=v1,k2=v2` protocol options.
    Url {
        url: String,
        #[serde(default)]
        options: String,
    },
    /// Capture device constrained to `WIDTHxHEIGHT`.
    Camera { dimensions: String },
    /// The pub/sub video channel named by [`Configuration::channel`].
    PubSub,
}

/// Output bounding box for decoded frames.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingDims {
    pub width: u16,
    pub height: u16,
    #[serde(default = "default_keep_proportions")]
    pub keep_proportions: bool,
}

fn default_keep_proportions() -> bool {
    true
}

/// Everything a bot run needs beyond the descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub input: InputConfig,

    /// Base pub/sub channel; frames, metadata, analysis and debug sit on
    /// its suffix family.
    #[serde(default)]
    pub channel: Option<String>,

    /// Save analysis messages to a file instead of the analysis channel.
    #[serde(default)]
    pub analysis_file: Option<PathBuf>,

    /// Save debug messages to a file instead of the debug channel.
    #[serde(default)]
    pub debug_file: Option<PathBuf>,

    #[serde(default)]
    pub bot_id: String,

    /// Opaque bot configuration document.
    #[serde(default)]
    pub bot_config: Option<Document>,

    /// Overrides the descriptor's pixel format when set.
    #[serde(default)]
    pub pixel_format: Option<PixelFormat>,

    /// Decoder output bounding box; consumed when the decoder is built.
    #[serde(default)]
    pub bounding: Option<BoundingDims>,

    /// Live pacing rate for file playback; the default applies otherwise.
    #[serde(default)]
    pub fps: Option<f64>,
}

impl Configuration {
    /// Reject combinations the pipeline cannot honor.
    pub fn validate(&self) -> Result<()> {
        if matches!(self.input, InputConfig::PubSub) && self.channel.is_none() {
            return Err(PipelineError::config("pub/sub input requires a channel"));
        }
        if let Some(fps) = self.fps {
            if !fps.is_finite() || fps <= 0.0 {
                return Err(PipelineError::config(format!("fps must be positive, got {fps}")));
            }
        }
        if let Some(bounding) = &self.bounding {
            if bounding.width == 0 || bounding.height == 0 {
                return Err(PipelineError::config("bounding dimensions must be non-zero"));
            }
        }
        Ok(())
    }

    /// Batch mode applies only to file input.
    pub fn is_batch(&self) -> bool {
        matches!(self.input, InputConfig::File { batch: true, .. })
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        if self.is_batch() {
            ExecutionMode::Batch
        } else {
            ExecutionMode::Live
        }
    }
}
