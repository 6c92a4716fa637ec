//! Job payloads and results.
//!
//! Each job kind carries its own request type. Payloads are decoded once when
//! a worker picks the job up, so the processing path never inspects loosely
//! typed JSON.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::encoding::{EncodingConfig, OutputFormat, PROXY_FRAME_WIDTH};
use crate::job::JobKind;
use crate::segment::{Segment, TransitionSpec};
use crate::shot::{Keyframe, Shot};
use crate::subtitle::SubtitleCue;
use crate::track::Track;

/// Default scene-score threshold for shot detection.
pub const DEFAULT_SCENE_THRESHOLD: f64 = 0.3;
/// Default minimum length of a retained shot.
pub const DEFAULT_MIN_SHOT_DURATION_MS: u64 = 2000;

fn default_threshold() -> f64 {
    DEFAULT_SCENE_THRESHOLD
}
fn default_min_shot_ms() -> u64 {
    DEFAULT_MIN_SHOT_DURATION_MS
}
fn default_proxy_width() -> u32 {
    PROXY_FRAME_WIDTH
}
fn default_true() -> bool {
    true
}

/// Cut `[start_ms, start_ms + duration_ms)` out of a source with a re-encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrimRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub start_ms: u64,
    pub duration_ms: u64,
    #[serde(default)]
    pub encoding: EncodingConfig,
    #[serde(default)]
    pub overwrite: bool,
}

/// Join segments in order, optionally with transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConcatRequest {
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub transition: TransitionSpec,
    pub output: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub encoding: EncodingConfig,
    /// Whether the inputs carry audio that should be cross-faded along
    #[serde(default = "default_true")]
    pub include_audio: bool,
    #[serde(default)]
    pub overwrite: bool,
}

/// Mix up to four audio tracks, optionally muxed under a video stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MixRequest {
    pub tracks: Vec<Track>,
    pub output: PathBuf,
    /// Video whose picture is stream-copied under the mix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<PathBuf>,
    #[serde(default)]
    pub encoding: EncodingConfig,
    #[serde(default)]
    pub overwrite: bool,
}

/// Detect scene cuts and materialize shots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShotDetectionRequest {
    pub source: PathBuf,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_min_shot_ms")]
    pub min_shot_duration_ms: u64,
    /// Fold too-short shots into their predecessor instead of dropping them
    #[serde(default)]
    pub merge_short_shots: bool,
    /// Directory for one still per shot; no thumbnails when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_dir: Option<PathBuf>,
    #[serde(default = "default_proxy_width")]
    pub thumbnail_width: u32,
    /// Replace thumbnails already present in `thumbnail_dir`
    #[serde(default)]
    pub overwrite: bool,
}

impl ShotDetectionRequest {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            threshold: DEFAULT_SCENE_THRESHOLD,
            min_shot_duration_ms: DEFAULT_MIN_SHOT_DURATION_MS,
            merge_short_shots: false,
            thumbnail_dir: None,
            thumbnail_width: PROXY_FRAME_WIDTH,
            overwrite: false,
        }
    }
}

/// How keyframe timestamps are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    #[default]
    Uniform,
    SceneBased,
}

/// Extract representative stills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyframeRequest {
    pub source: PathBuf,
    pub output_dir: PathBuf,
    pub frame_count: u32,
    #[serde(default)]
    pub strategy: SamplingStrategy,
    #[serde(default = "default_proxy_width")]
    pub proxy_width: u32,
    /// Shot detection settings used by the scene-based strategy
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_min_shot_ms")]
    pub min_shot_duration_ms: u64,
    #[serde(default)]
    pub overwrite: bool,
}

/// Input properties handed to a composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompositionProps {
    pub source_path: PathBuf,
    #[serde(default)]
    pub cues: Vec<SubtitleCue>,
    /// Free-form style parameters understood by the composition
    #[serde(default)]
    pub style: serde_json::Value,
}

/// Render a declarative composition to a video file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompositionRequest {
    pub composition_id: String,
    pub props: CompositionProps,
    #[serde(default)]
    pub format: OutputFormat,
    pub output_path: PathBuf,
    #[serde(default)]
    pub overwrite: bool,
}

/// Tagged union of every job the orchestrator can run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Trim(TrimRequest),
    Concat(ConcatRequest),
    MixAudio(MixRequest),
    DetectShots(ShotDetectionRequest),
    SampleKeyframes(KeyframeRequest),
    RenderComposition(CompositionRequest),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Trim(_) => JobKind::Trim,
            JobPayload::Concat(_) => JobKind::Concat,
            JobPayload::MixAudio(_) => JobKind::MixAudio,
            JobPayload::DetectShots(_) => JobKind::DetectShots,
            JobPayload::SampleKeyframes(_) => JobKind::SampleKeyframes,
            JobPayload::RenderComposition(_) => JobKind::RenderComposition,
        }
    }

    /// Generate idempotency key for deduplication.
    ///
    /// Jobs that write the same artifact are the same job.
    pub fn idempotency_key(&self) -> String {
        let target = match self {
            JobPayload::Trim(r) => r.output.display().to_string(),
            JobPayload::Concat(r) => r.output.display().to_string(),
            JobPayload::MixAudio(r) => r.output.display().to_string(),
            JobPayload::DetectShots(r) => format!(
                "{}:{}:{}",
                r.source.display(),
                r.threshold,
                r.min_shot_duration_ms
            ),
            JobPayload::SampleKeyframes(r) => r.output_dir.display().to_string(),
            JobPayload::RenderComposition(r) => r.output_path.display().to_string(),
        };
        format!("{}:{}", self.kind(), target)
    }
}

/// A media file produced by an encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MediaOutput {
    pub output_path: PathBuf,
    /// Expected duration of the produced media
    pub duration_ms: u64,
    pub size_bytes: u64,
}

/// Result of a composition render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutput {
    pub output_path: PathBuf,
    pub duration_sec: f64,
    pub total_frames: u64,
    pub render_time_ms: u64,
    pub size_bytes: u64,
}

/// Tagged union of job results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobResult {
    Media(MediaOutput),
    Shots { shots: Vec<Shot> },
    Keyframes { keyframes: Vec<Keyframe> },
    Composition(RenderOutput),
}
