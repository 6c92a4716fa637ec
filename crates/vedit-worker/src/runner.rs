//! Payload dispatch.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use vedit_media::{
    check_ffmpeg, concat_segments, detect_shots, mix_audio, sample_keyframes, trim_clip,
    CompositionRenderer, EncodeInvoker, ProgressUpdate,
};
use vedit_models::{JobId, JobPayload, JobResult};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;

/// What a runner gets for one attempt.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub attempt: u32,
    /// Turns `true` when the job is cancelled
    pub cancel: watch::Receiver<bool>,
    pub progress: mpsc::Sender<ProgressUpdate>,
}

/// Executes one decoded payload.
///
/// Implementations run at most one external process at a time and must
/// stop it when `ctx.cancel` flips.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, payload: &JobPayload, ctx: JobContext) -> WorkerResult<JobResult>;
}

/// Runs payloads with FFmpeg and the composition renderer.
#[derive(Debug, Clone)]
pub struct MediaJobRunner {
    ffmpeg: PathBuf,
    renderer: Arc<CompositionRenderer>,
}

impl MediaJobRunner {
    pub fn new(ffmpeg: impl Into<PathBuf>, renderer: Arc<CompositionRenderer>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            renderer,
        }
    }

    /// Resolve the encoder and set up the renderer handle.
    ///
    /// The renderer bundle is prepared by the first composition job.
    pub fn from_config(config: &WorkerConfig) -> WorkerResult<Self> {
        let ffmpeg = match &config.ffmpeg_path {
            Some(path) => path.clone(),
            None => check_ffmpeg()?,
        };
        Ok(Self::new(
            ffmpeg,
            Arc::new(CompositionRenderer::new(config.renderer.clone())),
        ))
    }

    pub fn renderer(&self) -> &Arc<CompositionRenderer> {
        &self.renderer
    }
}

#[async_trait]
impl JobRunner for MediaJobRunner {
    async fn run(&self, payload: &JobPayload, ctx: JobContext) -> WorkerResult<JobResult> {
        let invoker = EncodeInvoker::new(&self.ffmpeg).with_cancel(ctx.cancel.clone());
        let progress = Some(ctx.progress);

        let result = match payload {
            JobPayload::Trim(req) => JobResult::Media(trim_clip(&invoker, req, progress).await?),
            JobPayload::Concat(req) => JobResult::Media(concat_segments(&invoker, req, progress).await?),
            JobPayload::MixAudio(req) => JobResult::Media(mix_audio(&invoker, req, progress).await?),
            JobPayload::DetectShots(req) => JobResult::Shots {
                shots: detect_shots(&invoker, req, progress).await?,
            },
            JobPayload::SampleKeyframes(req) => JobResult::Keyframes {
                keyframes: sample_keyframes(&invoker, req, progress).await?,
            },
            JobPayload::RenderComposition(req) => JobResult::Composition(
                self.renderer.render(req, Some(ctx.cancel), progress).await?,
            ),
        };

        Ok(result)
    }
}
