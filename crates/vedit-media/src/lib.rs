#![deny(unreachable_patterns)]
//! FFmpeg and composition renderer wrapper.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building for any number of inputs
//! - Progress parsing from the encoder's stats line
//! - Process invocation with bounded progress channels and cancellation
//! - Trim, concatenation (list and transition graph) and audio mixing
//! - Shot detection and keyframe sampling
//! - Declarative composition rendering behind a prepare-once handle

pub mod audio_mix;
pub mod command;
pub mod concat;
pub mod error;
pub mod filters;
pub mod fs_utils;
pub mod invoker;
pub mod keyframes;
pub mod probe;
pub mod progress;
pub mod renderer;
pub mod shots;
pub mod thumbnail;
pub mod timeline;
pub mod trim;

pub use audio_mix::{build_mix_filter, expected_mix_duration_ms, mix_audio, validate_tracks};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegInput};
pub use concat::{build_concat_list, build_transition_graph, concat_segments, FilterGraph};
pub use error::{MediaError, MediaResult, ValidationError};
pub use fs_utils::StagedOutput;
pub use invoker::{EncodeInvoker, RunOutcome};
pub use keyframes::{sample_keyframes, scene_timestamps, uniform_timestamps};
pub use probe::{probe_duration_ms, probe_media, MediaInfo};
pub use progress::{DiagnosticParser, EncodeStats, ProgressParser, ProgressUpdate};
pub use renderer::{CompositionRenderer, FrameProgressParser, RendererConfig};
pub use shots::{detect_shots, shots_from_cuts, SceneScoreParser, ShortShotPolicy};
pub use thumbnail::{extract_frame, stage_frame};
pub use timeline::{resolve_durations, validate_segments, ConcatStrategy, ResolvedSegment, Timeline};
pub use trim::trim_clip;
