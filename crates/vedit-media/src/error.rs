//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;
use vedit_models::TrackType;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Input rejected before any process was started.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("no segments to concatenate")]
    EmptySegments,

    #[error("input file not found: {0}")]
    MissingFile(PathBuf),

    #[error("segment {index} has a non-positive duration")]
    NonPositiveDuration { index: usize },

    #[error("transition duration must be positive")]
    ZeroTransition,

    #[error("transition of {transition_ms}ms is longer than segment {index} ({segment_ms}ms)")]
    TransitionTooLong {
        transition_ms: u64,
        index: usize,
        segment_ms: u64,
    },

    #[error("no audio tracks to mix")]
    NoTracks,

    #[error("{count} audio tracks exceed the limit of {max}")]
    TooManyTracks { count: usize, max: usize },

    #[error("track type {0} appears more than once")]
    DuplicateTrackType(TrackType),

    #[error("volume {volume} for {track_type} track is outside [0, 1]")]
    VolumeOutOfRange { track_type: TrackType, volume: f64 },

    #[error("scene threshold {0} must be within (0, 1)")]
    InvalidThreshold(f64),

    #[error("frame count must be at least 1")]
    ZeroFrameCount,

    #[error("clip duration must be positive")]
    EmptyClip,

    #[error("composition id must not be empty")]
    EmptyCompositionId,

    #[error("subtitle cues are malformed or out of order")]
    MalformedCues,
}

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to launch {program}: {source}")]
    ProcessLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}: {}", describe_exit(.exit_code), last_line(.tail))]
    ProcessExit {
        program: String,
        exit_code: Option<i32>,
        /// Last diagnostic lines before exit, oldest first
        tail: Vec<String>,
    },

    #[error("Output already exists: {0}")]
    OutputExists(PathBuf),

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Invalid media file: {0}")]
    InvalidMedia(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

fn last_line(tail: &[String]) -> &str {
    tail.last().map(String::as_str).unwrap_or("no diagnostics")
}

impl MediaError {
    /// Create a process exit error.
    pub fn process_exit(program: impl Into<String>, exit_code: Option<i32>, tail: Vec<String>) -> Self {
        Self::ProcessExit {
            program: program.into(),
            exit_code,
            tail,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Diagnostic tail joined into one block, empty for other variants.
    pub fn diagnostics(&self) -> String {
        match self {
            MediaError::ProcessExit { tail, .. } => tail.join("\n"),
            MediaError::FfprobeFailed { stderr, .. } => stderr.clone().unwrap_or_default(),
            _ => String::new(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, MediaError::Validation(_) | MediaError::OutputExists(_))
    }
}
