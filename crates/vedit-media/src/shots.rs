//! Scene-cut based shot detection.
//!
//! One analysis pass runs `select='gt(scene,T)',metadata=print` over the
//! source. The metadata filter prints a `pts_time:` line per selected frame
//! followed by its `lavfi.scene_score=` line:
//!
//! ```text
//! [Parsed_metadata_1 @ 0x5581] frame:0    pts:126126  pts_time:4.2042
//! [Parsed_metadata_1 @ 0x5581] lavfi.scene_score=0.512339
//! ```
//!
//! Cut timestamps plus the source bounds become shot boundaries.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use vedit_models::{secs_to_ms, Shot, ShotDetectionRequest};

use crate::command::FfmpegCommand;
use crate::error::{MediaResult, ValidationError};
use crate::filters::filter_scene_select;
use crate::fs_utils::{commit_all, ensure_dir, require_file};
use crate::invoker::EncodeInvoker;
use crate::probe::probe_media;
use crate::progress::{DiagnosticParser, ProgressParser, ProgressUpdate};
use crate::thumbnail::stage_frame;

static PTS_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"pts_time:\s*(-?[\d.]+)").expect("valid regex"));
static SCENE_SCORE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"lavfi\.scene_score=\s*([\d.]+)").expect("valid regex"));

/// What to do with candidate shots shorter than the minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortShotPolicy {
    /// Drop them, leaving a gap in coverage
    #[default]
    Discard,
    /// Fold them into the preceding shot (or the next one, at the start)
    MergeIntoPrevious,
}

/// A detected cut.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneCut {
    pub timestamp_sec: f64,
    pub score: f64,
}

/// Collects scene scores while forwarding encoder progress.
#[derive(Debug, Clone)]
pub struct SceneScoreParser {
    threshold: f64,
    pending_pts: Option<f64>,
    cuts: Vec<SceneCut>,
    progress: ProgressParser,
}

impl SceneScoreParser {
    pub fn new(threshold: f64, total_sec: Option<f64>) -> Self {
        Self {
            threshold,
            pending_pts: None,
            cuts: Vec::new(),
            progress: ProgressParser::new(total_sec),
        }
    }

    pub fn cuts(&self) -> &[SceneCut] {
        &self.cuts
    }

    pub fn into_cuts(self) -> Vec<SceneCut> {
        self.cuts
    }
}

impl DiagnosticParser for SceneScoreParser {
    fn parse_line(&mut self, line: &str) -> Option<ProgressUpdate> {
        if let Some(caps) = PTS_TIME_RE.captures(line) {
            self.pending_pts = caps[1].parse().ok();
            return None;
        }

        if let Some(caps) = SCENE_SCORE_RE.captures(line) {
            if let (Some(timestamp_sec), Ok(score)) = (self.pending_pts.take(), caps[1].parse::<f64>()) {
                if score > self.threshold {
                    self.cuts.push(SceneCut { timestamp_sec, score });
                }
            }
            return None;
        }

        self.progress.parse(line)
    }
}

/// Turn cut timestamps into shots.
///
/// Boundaries are `0`, the sorted cuts strictly inside the source, and the
/// source duration. Shot ids follow the order of the retained shots.
pub fn shots_from_cuts(
    cuts_ms: &[u64],
    duration_ms: u64,
    min_shot_duration_ms: u64,
    policy: ShortShotPolicy,
) -> Vec<Shot> {
    let mut boundaries: Vec<u64> = cuts_ms
        .iter()
        .copied()
        .filter(|t| *t > 0 && *t < duration_ms)
        .collect();
    boundaries.sort_unstable();
    boundaries.dedup();
    boundaries.insert(0, 0);
    boundaries.push(duration_ms);

    let mut spans: Vec<(u64, u64)> = Vec::new();
    let mut carry_start: Option<u64> = None;

    for pair in boundaries.windows(2) {
        let (start, end) = (carry_start.take().unwrap_or(pair[0]), pair[1]);
        if end <= start {
            continue;
        }
        if end - start >= min_shot_duration_ms {
            spans.push((start, end));
            continue;
        }
        match policy {
            ShortShotPolicy::Discard => {}
            ShortShotPolicy::MergeIntoPrevious => match spans.last_mut() {
                Some(previous) => previous.1 = end,
                None => carry_start = Some(start),
            },
        }
    }

    spans
        .into_iter()
        .enumerate()
        .map(|(ordinal, (start, end))| Shot::new(ordinal, start, end))
        .collect()
}

/// Build the analysis command for one source.
pub fn build_detection_command(source: &Path, threshold: f64) -> FfmpegCommand {
    FfmpegCommand::null_sink()
        .input_path(source)
        .video_filter(filter_scene_select(threshold))
        .output_arg("-an")
}

fn policy_for(req: &ShotDetectionRequest) -> ShortShotPolicy {
    if req.merge_short_shots {
        ShortShotPolicy::MergeIntoPrevious
    } else {
        ShortShotPolicy::Discard
    }
}

/// Write `{shot_id}.jpg` for every shot into `dir`, taken at the shot start.
///
/// Thumbnails are staged and only moved into place once all of them were
/// extracted. Existing files are kept unless `req.overwrite` is set.
pub async fn write_thumbnails(
    invoker: &EncodeInvoker,
    req: &ShotDetectionRequest,
    dir: &Path,
    shots: &mut [Shot],
) -> MediaResult<()> {
    let dir = ensure_dir(dir).await?;
    let mut staged = Vec::with_capacity(shots.len());
    for shot in shots.iter() {
        let path = dir.join(format!("{}.jpg", shot.id));
        staged.push(
            stage_frame(
                invoker,
                &req.source,
                shot.start_ms,
                &path,
                req.thumbnail_width,
                req.overwrite,
            )
            .await?,
        );
    }

    for (shot, written) in shots.iter_mut().zip(commit_all(staged)?) {
        shot.thumbnail_path = Some(written);
    }
    Ok(())
}

/// Detect shots, optionally writing one thumbnail per shot.
pub async fn detect_shots(
    invoker: &EncodeInvoker,
    req: &ShotDetectionRequest,
    progress: Option<mpsc::Sender<ProgressUpdate>>,
) -> MediaResult<Vec<Shot>> {
    require_file(&req.source)?;
    if !(req.threshold > 0.0 && req.threshold < 1.0) {
        return Err(ValidationError::InvalidThreshold(req.threshold).into());
    }

    let info = probe_media(&req.source).await?;
    let duration_ms = info.duration_ms();

    let cmd = build_detection_command(&req.source, req.threshold);
    let parser = SceneScoreParser::new(req.threshold, Some(info.duration));
    let (_, parser) = invoker
        .run_with_parser(&cmd.build_args(), parser, progress)
        .await?;

    let cuts_ms: Vec<u64> = parser
        .cuts()
        .iter()
        .map(|c| secs_to_ms(c.timestamp_sec))
        .collect();
    debug!(cuts = cuts_ms.len(), "Scene cuts collected");

    let mut shots = shots_from_cuts(&cuts_ms, duration_ms, req.min_shot_duration_ms, policy_for(req));

    if let Some(dir) = &req.thumbnail_dir {
        write_thumbnails(invoker, req, dir, &mut shots).await?;
    }

    info!(
        source = %req.source.display(),
        threshold = req.threshold,
        shots = shots.len(),
        "Shot detection complete"
    );

    Ok(shots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MediaError;
    use tempfile::TempDir;

    fn spans(shots: &[Shot]) -> Vec<(u64, u64)> {
        shots.iter().map(|s| (s.start_ms, s.end_ms)).collect()
    }

    #[test]
    fn test_parser_pairs_timestamps_with_scores() {
        let mut parser = SceneScoreParser::new(0.3, Some(20.0));
        let lines = [
            "[Parsed_metadata_1 @ 0x55] frame:0    pts:126126  pts_time:4.2042",
            "[Parsed_metadata_1 @ 0x55] lavfi.scene_score=0.512339",
            "[Parsed_metadata_1 @ 0x55] frame:1    pts:300300  pts_time:10.01",
            "[Parsed_metadata_1 @ 0x55] lavfi.scene_score=0.250000",
        ];
        for line in lines {
            assert!(parser.parse_line(line).is_none());
        }

        assert_eq!(parser.cuts().len(), 1);
        assert!((parser.cuts()[0].timestamp_sec - 4.2042).abs() < 1e-9);
    }

    #[test]
    fn test_parser_forwards_stats_progress() {
        let mut parser = SceneScoreParser::new(0.3, Some(20.0));
        let update = parser
            .parse_line("frame=  300 fps=150 q=-0.0 size=N/A time=00:00:10.00 bitrate=N/A speed=5x")
            .unwrap();
        assert!((update.percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_shots_cover_source() {
        let shots = shots_from_cuts(&[12_000, 4_000], 20_000, 2_000, ShortShotPolicy::Discard);
        assert_eq!(spans(&shots), vec![(0, 4_000), (4_000, 12_000), (12_000, 20_000)]);
        assert_eq!(shots[2].id, "shot_0002");
    }

    #[test]
    fn test_short_shots_discarded() {
        let shots = shots_from_cuts(&[4_000, 5_000, 12_000], 20_000, 2_000, ShortShotPolicy::Discard);
        assert_eq!(spans(&shots), vec![(0, 4_000), (5_000, 12_000), (12_000, 20_000)]);
        assert_eq!(shots[1].id, "shot_0001");
        assert!(shots.iter().all(|s| s.duration_ms() >= 2_000));
    }

    #[test]
    fn test_short_shots_merged() {
        let shots = shots_from_cuts(
            &[1_000, 4_000, 5_000, 12_000],
            20_000,
            2_000,
            ShortShotPolicy::MergeIntoPrevious,
        );
        assert_eq!(spans(&shots), vec![(0, 5_000), (5_000, 12_000), (12_000, 20_000)]);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let cuts = [3_000, 9_000, 15_500];
        let first = shots_from_cuts(&cuts, 30_000, 2_000, ShortShotPolicy::Discard);
        let second = shots_from_cuts(&cuts, 30_000, 2_000, ShortShotPolicy::Discard);
        assert_eq!(first, second);
    }

    #[test]
    fn test_no_cuts_yields_one_shot() {
        let shots = shots_from_cuts(&[], 8_000, 2_000, ShortShotPolicy::Discard);
        assert_eq!(spans(&shots), vec![(0, 8_000)]);
        assert!(shots_from_cuts(&[], 1_000, 2_000, ShortShotPolicy::Discard).is_empty());
    }

    /// Encoder that writes `frame` to its output path.
    #[cfg(unix)]
    fn frame_writer(dir: &Path) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("ffmpeg.sh");
        std::fs::write(&script, "#!/bin/sh\nfor last; do :; done\necho frame > \"$last\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    fn thumbnail_request(thumbs: &Path, overwrite: bool) -> ShotDetectionRequest {
        ShotDetectionRequest {
            thumbnail_dir: Some(thumbs.to_path_buf()),
            overwrite,
            ..ShotDetectionRequest::new("/media/in.mp4")
        }
    }

    #[tokio::test]
    async fn test_existing_thumbnail_is_not_overwritten() {
        let thumbs = TempDir::new().unwrap();
        let existing = thumbs.path().join("shot_0000.jpg");
        std::fs::write(&existing, b"keep me").unwrap();

        let mut shots = vec![Shot::new(0, 0, 5_000), Shot::new(1, 5_000, 9_000)];
        let req = thumbnail_request(thumbs.path(), false);
        let err = write_thumbnails(&EncodeInvoker::new("ffmpeg"), &req, thumbs.path(), &mut shots)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::OutputExists(_)));
        assert_eq!(std::fs::read(&existing).unwrap(), b"keep me");
        assert_eq!(std::fs::read_dir(thumbs.path()).unwrap().count(), 1);
        assert!(shots.iter().all(|s| s.thumbnail_path.is_none()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_thumbnails_written_per_shot() {
        let tools = TempDir::new().unwrap();
        let thumbs = TempDir::new().unwrap();
        let invoker = EncodeInvoker::new(frame_writer(tools.path()));
        let mut shots = vec![Shot::new(0, 0, 5_000), Shot::new(1, 5_000, 9_000)];

        let req = thumbnail_request(thumbs.path(), false);
        write_thumbnails(&invoker, &req, thumbs.path(), &mut shots).await.unwrap();

        let second = thumbs.path().join("shot_0001.jpg");
        assert_eq!(shots[1].thumbnail_path.as_deref(), Some(second.as_path()));
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "frame\n");
        assert_eq!(std::fs::read_dir(thumbs.path()).unwrap().count(), 2);

        let again = write_thumbnails(&invoker, &req, thumbs.path(), &mut shots).await;
        assert!(matches!(again, Err(MediaError::OutputExists(_))));

        let req = thumbnail_request(thumbs.path(), true);
        write_thumbnails(&invoker, &req, thumbs.path(), &mut shots).await.unwrap();
        assert_eq!(std::fs::read_dir(thumbs.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_detection_command() {
        let args = build_detection_command(Path::new("/in.mp4"), 0.3).build_args().join(" ");
        assert!(args.contains("-vf select='gt(scene,0.3)',metadata=print"));
        assert!(args.ends_with("-f null -"));
    }
}
