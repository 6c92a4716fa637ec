//! Representative frame sampling.

use tokio::sync::mpsc;
use tracing::{info, warn};
use vedit_models::{Keyframe, KeyframeRequest, SamplingStrategy, Shot, ShotDetectionRequest};

use crate::error::{MediaResult, ValidationError};
use crate::fs_utils::{commit_all, ensure_dir, require_file};
use crate::invoker::EncodeInvoker;
use crate::probe::probe_duration_ms;
use crate::progress::ProgressUpdate;
use crate::shots::detect_shots;
use crate::thumbnail::stage_frame;

/// A planned sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePoint {
    pub timestamp_ms: u64,
    pub shot_id: Option<String>,
}

/// Interior boundaries of `frame_count + 1` equal intervals.
///
/// Never samples the very first or last instant.
pub fn uniform_timestamps(duration_ms: u64, frame_count: u32) -> Vec<u64> {
    let parts = u128::from(frame_count) + 1;
    (1..=u128::from(frame_count))
        .map(|k| (k * u128::from(duration_ms) / parts) as u64)
        .collect()
}

/// `ceil(frame_count / shots)` evenly spaced samples inside each shot,
/// stopping once `frame_count` samples are planned.
///
/// A shot gets at most one sample per interior millisecond, so no two
/// samples share a timestamp.
pub fn scene_timestamps(shots: &[Shot], frame_count: u32) -> Vec<SamplePoint> {
    if shots.is_empty() || frame_count == 0 {
        return Vec::new();
    }

    let limit = frame_count as usize;
    let per_shot = limit.div_ceil(shots.len()) as u32;
    let mut points = Vec::with_capacity(limit);

    'shots: for shot in shots {
        let interior = u32::try_from(shot.duration_ms().saturating_sub(1)).unwrap_or(u32::MAX);
        for offset in uniform_timestamps(shot.duration_ms(), per_shot.min(interior)) {
            if points.len() == limit {
                break 'shots;
            }
            points.push(SamplePoint {
                timestamp_ms: shot.start_ms + offset,
                shot_id: Some(shot.id.clone()),
            });
        }
    }

    points
}

fn uniform_points(duration_ms: u64, frame_count: u32) -> Vec<SamplePoint> {
    uniform_timestamps(duration_ms, frame_count)
        .into_iter()
        .map(|timestamp_ms| SamplePoint {
            timestamp_ms,
            shot_id: None,
        })
        .collect()
}

/// Plan and extract keyframes.
pub async fn sample_keyframes(
    invoker: &EncodeInvoker,
    req: &KeyframeRequest,
    progress: Option<mpsc::Sender<ProgressUpdate>>,
) -> MediaResult<Vec<Keyframe>> {
    require_file(&req.source)?;
    if req.frame_count == 0 {
        return Err(ValidationError::ZeroFrameCount.into());
    }

    let points = match req.strategy {
        SamplingStrategy::Uniform => uniform_points(probe_duration_ms(&req.source).await?, req.frame_count),
        SamplingStrategy::SceneBased => {
            let detection = ShotDetectionRequest {
                threshold: req.threshold,
                min_shot_duration_ms: req.min_shot_duration_ms,
                ..ShotDetectionRequest::new(&req.source)
            };
            let shots = detect_shots(invoker, &detection, None).await?;
            if shots.is_empty() {
                warn!(source = %req.source.display(), "No shots retained, sampling uniformly");
                uniform_points(probe_duration_ms(&req.source).await?, req.frame_count)
            } else {
                scene_timestamps(&shots, req.frame_count)
            }
        }
    };

    let keyframes = extract_keyframes(invoker, req, points, progress).await?;

    info!(
        source = %req.source.display(),
        strategy = ?req.strategy,
        frames = keyframes.len(),
        "Keyframes sampled"
    );

    Ok(keyframes)
}

/// Extract `keyframe_NNNN.jpg` for every point into `req.output_dir`.
///
/// Frames are staged and moved into place together once every extraction
/// succeeded, so a failed run leaves the directory as it found it.
pub async fn extract_keyframes(
    invoker: &EncodeInvoker,
    req: &KeyframeRequest,
    points: Vec<SamplePoint>,
    progress: Option<mpsc::Sender<ProgressUpdate>>,
) -> MediaResult<Vec<Keyframe>> {
    let dir = ensure_dir(&req.output_dir).await?;
    let total = points.len() as u64;
    let mut staged = Vec::with_capacity(points.len());

    for (index, point) in points.iter().enumerate() {
        let path = dir.join(format!("keyframe_{:04}.jpg", index));
        staged.push(
            stage_frame(
                invoker,
                &req.source,
                point.timestamp_ms,
                &path,
                req.proxy_width,
                req.overwrite,
            )
            .await?,
        );

        if let Some(tx) = &progress {
            let _ = tx.try_send(ProgressUpdate::steps(index as u64 + 1, total));
        }
    }

    let keyframes = points
        .into_iter()
        .zip(commit_all(staged)?)
        .map(|(point, path)| Keyframe {
            timestamp_ms: point.timestamp_ms,
            path,
            shot_id: point.shot_id,
        })
        .collect();
    Ok(keyframes)
}
