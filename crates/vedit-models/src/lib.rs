//! Shared data models for the vedit render core.
//!
//! This crate provides Serde-serializable types for:
//! - Edit decisions (segments, audio tracks, transitions)
//! - Detected shots, sampled keyframes and subtitle cues
//! - Encoding configuration and output formats
//! - Render jobs, their payloads and results

pub mod encoding;
pub mod job;
pub mod payload;
pub mod segment;
pub mod shot;
pub mod subtitle;
pub mod timestamp;
pub mod track;

// Re-export common types
pub use encoding::{EncodingConfig, OutputFormat};
pub use job::{JobId, JobKind, JobStatus, JobTransitionError, RenderJob};
pub use payload::{
    CompositionProps, CompositionRequest, ConcatRequest, JobPayload, JobResult, KeyframeRequest,
    MediaOutput, MixRequest, RenderOutput, SamplingStrategy, ShotDetectionRequest, TrimRequest,
};
pub use segment::{Segment, TransitionKind, TransitionSpec};
pub use shot::{Keyframe, Shot};
pub use subtitle::{SubtitleCue, WordTiming};
pub use timestamp::{format_ffmpeg_time, ms_to_secs, parse_timestamp, secs_to_ms, TimestampError};
pub use track::{Track, TrackType, MAX_MIX_TRACKS};
