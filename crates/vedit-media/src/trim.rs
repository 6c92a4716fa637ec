//! Frame-accurate trimming.
//!
//! Trims always re-encode with the request's quality/preset pair. Stream copy
//! would snap the start to the previous keyframe.

use std::path::Path;

use tokio::sync::mpsc;
use tracing::info;
use vedit_models::{MediaOutput, TrimRequest};

use crate::command::{FfmpegCommand, FfmpegInput};
use crate::error::{MediaResult, ValidationError};
use crate::fs_utils::{file_size, require_file, StagedOutput};
use crate::invoker::EncodeInvoker;
use crate::progress::ProgressUpdate;

/// Build the re-encoding trim command writing to the staged `output`.
pub fn build_trim_command(req: &TrimRequest, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(output)
        .input(
            FfmpegInput::new(&req.input)
                .seek_ms(req.start_ms)
                .duration_ms(req.duration_ms),
        )
        .output_args(req.encoding.to_ffmpeg_args())
        .output_args(["-avoid_negative_ts", "make_zero"])
        .overwrite(true)
}

/// Cut `[start_ms, start_ms + duration_ms)` out of the input.
pub async fn trim_clip(
    invoker: &EncodeInvoker,
    req: &TrimRequest,
    progress: Option<mpsc::Sender<ProgressUpdate>>,
) -> MediaResult<MediaOutput> {
    require_file(&req.input)?;
    if req.duration_ms == 0 {
        return Err(ValidationError::EmptyClip.into());
    }

    let staged = StagedOutput::new(&req.output, req.overwrite).await?;
    info!(
        input = %req.input.display(),
        start_ms = req.start_ms,
        duration_ms = req.duration_ms,
        output = %staged.target().display(),
        "Trimming clip"
    );

    let cmd = build_trim_command(req, staged.path());
    invoker
        .run_command(&cmd, Some(vedit_models::ms_to_secs(req.duration_ms)), progress)
        .await?;
    let output = staged.commit()?;

    Ok(MediaOutput {
        size_bytes: file_size(&output).await?,
        output_path: output,
        duration_ms: req.duration_ms,
    })
}
