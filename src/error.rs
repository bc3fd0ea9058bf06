//! Error types for the video pipeline.
//!
//! Two families of failures are visible to stream operators:
//!
//! - **Stream lifecycle faults** (`ValueMoved`, `NotInitialized`) indicate a
//!   programming error inside the reactive runtime itself.
//! - **Video faults** (`StreamInitialization`, `FrameGeneration`,
//!   `Transport`, `EndOfStream`, `FrameNotReady`) originate in sources,
//!   decoders, and the transport boundary.
//!
//! Any `on_error` is terminal for its pipeline: it flows downstream unchanged
//! until a `process()` site surfaces it to the application. `do_finally`
//! callbacks still run on the error path.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    /// A stream value was consumed twice (reactive runtime fault).
    #[error("stream value was moved")]
    ValueMoved,

    /// A stream stage was driven before it was wired (reactive runtime fault).
    #[error("stream not initialized")]
    NotInitialized,

    /// A source failed to open or probe its media context.
    #[error("failed to initialize video stream: {reason}")]
    StreamInitialization {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A source failed while reading a compressed packet below EOF.
    #[error("failed to generate video frame: {reason}")]
    FrameGeneration { reason: String },

    /// Transport-level failure (pub/sub client, executor handoff).
    #[error("transport error: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Normal end of a finite video stream.
    #[error("end of video stream")]
    EndOfStream,

    /// A frame was requested before its chunks or codec metadata arrived.
    #[error("frame not ready")]
    FrameNotReady,

    /// Reassembly of chunked network frames failed.
    #[error("chunk reassembly failed: {details}")]
    ChunkAssembly { details: String },

    /// A wire document did not match the expected field layout.
    #[error("malformed wire document: {details}")]
    WireFormat { details: String },

    /// File access failed.
    #[error("file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid pipeline configuration.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// Requested operation is not supported by this build or source.
    #[error("operation not supported")]
    NotSupported,
}

impl PipelineError {
    /// Returns whether retrying the failed operation can succeed.
    ///
    /// Lifecycle faults and configuration errors are permanent; transport
    /// hiccups and not-yet-assembled frames are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Transport { .. } => true,
            PipelineError::FrameNotReady => true,
            PipelineError::ValueMoved => false,
            PipelineError::NotInitialized => false,
            PipelineError::StreamInitialization { .. } => false,
            PipelineError::FrameGeneration { .. } => false,
            PipelineError::EndOfStream => false,
            PipelineError::ChunkAssembly { .. } => false,
            PipelineError::WireFormat { .. } => false,
            PipelineError::File { .. } => false,
            PipelineError::Config { .. } => false,
            PipelineError::NotSupported => false,
        }
    }

    /// Whether this error marks the normal end of a finite stream.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, PipelineError::EndOfStream)
    }

    /// Helper constructor for source initialization failures.
    pub fn stream_init(reason: impl Into<String>) -> Self {
        PipelineError::StreamInitialization { reason: reason.into(), source: None }
    }

    /// Helper constructor for source initialization failures with a cause.
    pub fn stream_init_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        PipelineError::StreamInitialization { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for frame generation failures.
    pub fn frame_generation(reason: impl Into<String>) -> Self {
        PipelineError::FrameGeneration { reason: reason.into() }
    }

    /// Helper constructor for transport failures.
    pub fn transport(reason: impl Into<String>) -> Self {
        PipelineError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for chunk reassembly failures.
    pub fn chunk_assembly(details: impl Into<String>) -> Self {
        PipelineError::ChunkAssembly { details: details.into() }
    }

    /// Helper constructor for wire format violations.
    pub fn wire_format(details: impl Into<String>) -> Self {
        PipelineError::WireFormat { details: details.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        PipelineError::File { path, source }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        PipelineError::Config { reason: reason.into() }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::WireFormat { details: err.to_string() }
    }
}
