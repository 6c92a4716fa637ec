//! Still frame extraction.

use std::path::{Path, PathBuf};

use crate::command::{FfmpegCommand, FfmpegInput};
use crate::error::MediaResult;
use crate::filters::filter_scale_width;
use crate::fs_utils::StagedOutput;
use crate::invoker::EncodeInvoker;

/// Build the command writing one downscaled frame at `timestamp_ms`.
pub fn build_frame_command(
    video_path: &Path,
    timestamp_ms: u64,
    output_path: &Path,
    width: u32,
    overwrite: bool,
) -> FfmpegCommand {
    FfmpegCommand::new(output_path)
        .input(FfmpegInput::new(video_path).seek_ms(timestamp_ms))
        .single_frame()
        .video_filter(filter_scale_width(width))
        .output_args(["-q:v", "2"])
        .overwrite(overwrite)
}

/// Extract a frame into a staged file beside `output_path`.
///
/// Callers writing a batch commit every frame once all of them succeeded.
pub async fn stage_frame(
    invoker: &EncodeInvoker,
    video_path: &Path,
    timestamp_ms: u64,
    output_path: &Path,
    width: u32,
    overwrite: bool,
) -> MediaResult<StagedOutput> {
    let staged = StagedOutput::new(output_path, overwrite).await?;
    let cmd = build_frame_command(video_path, timestamp_ms, staged.path(), width, true);
    invoker.run_command(&cmd, None, None).await?;
    Ok(staged)
}

/// Extract a single frame from a video into an image file.
pub async fn extract_frame(
    invoker: &EncodeInvoker,
    video_path: &Path,
    timestamp_ms: u64,
    output_path: &Path,
    width: u32,
    overwrite: bool,
) -> MediaResult<PathBuf> {
    stage_frame(invoker, video_path, timestamp_ms, output_path, width, overwrite)
        .await?
        .commit()
}
