//! Segment concatenation.
//!
//! Hard cuts go through the concat demuxer with stream copy. Transitions go
//! through a filter graph that normalizes every input and chains `xfade` and
//! `acrossfade` pairwise.

use std::fmt::Write as _;
use std::path::Path;

use tokio::sync::mpsc;
use tracing::info;
use vedit_models::timestamp::format_secs_arg;
use vedit_models::{ConcatRequest, MediaOutput, OutputFormat};

use crate::command::{FfmpegCommand, FfmpegInput};
use crate::error::MediaResult;
use crate::filters::{filter_normalize_audio, filter_normalize_video};
use crate::fs_utils::{file_size, StagedOutput};
use crate::invoker::EncodeInvoker;
use crate::progress::ProgressUpdate;
use crate::timeline::{resolve_durations, ConcatStrategy, ResolvedSegment, Timeline};

/// A filter graph and the labels it leaves for mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterGraph {
    pub filter: String,
    pub video_out: String,
    pub audio_out: Option<String>,
}

impl FilterGraph {
    /// `-map` arguments for the graph's final labels.
    pub fn map_args(&self) -> Vec<String> {
        let mut args = vec!["-map".to_string(), self.video_out.clone()];
        if let Some(audio) = &self.audio_out {
            args.push("-map".to_string());
            args.push(audio.clone());
        }
        args
    }

    fn apply(&self, cmd: FfmpegCommand) -> FfmpegCommand {
        let cmd = cmd.filter_complex(self.filter.clone()).map(self.video_out.clone());
        match &self.audio_out {
            Some(audio) => cmd.map(audio.clone()),
            None => cmd,
        }
    }
}

/// Quote a path for a concat list entry.
///
/// Single quotes close the quoted run, emit an escaped quote and reopen.
pub fn escape_concat_path(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

/// Concat demuxer list, one `file` entry per segment.
///
/// Trimmed segments get `inpoint`/`outpoint` directives. With stream copy
/// these cut on the nearest preceding keyframe.
pub fn build_concat_list(segments: &[ResolvedSegment]) -> String {
    let mut list = String::new();
    for segment in segments {
        let _ = writeln!(list, "file {}", escape_concat_path(&segment.path));
        if segment.trimmed {
            if segment.start_ms > 0 {
                let _ = writeln!(list, "inpoint {}", format_secs_arg(segment.start_ms));
            }
            let _ = writeln!(list, "outpoint {}", format_secs_arg(segment.end_ms()));
        }
    }
    list
}

/// Normalize every input and chain them with cross-fades.
pub fn build_transition_graph(timeline: &Timeline, format: &OutputFormat, include_audio: bool) -> FilterGraph {
    let segments = timeline.segments();
    let transition = timeline.transition();
    let xfade = transition.kind.xfade_name().unwrap_or("fade");
    let overlap = format_secs_arg(transition.duration_ms);

    let normalize_video = filter_normalize_video(format);
    let normalize_audio = filter_normalize_audio();

    let mut parts = Vec::new();
    for i in 0..segments.len() {
        parts.push(format!("[{i}:v]{normalize_video}[v{i}]"));
        if include_audio {
            parts.push(format!("[{i}:a]{normalize_audio}[a{i}]"));
        }
    }

    let last = segments.len() - 1;
    let label = |prefix: &str, i: usize| {
        if i == last {
            format!("{prefix}out")
        } else {
            format!("{prefix}x{i}")
        }
    };

    let mut video_prev = "v0".to_string();
    let mut audio_prev = "a0".to_string();
    for (i, offset_ms) in (1..=last).zip(timeline.transition_offsets_ms()) {
        let video_next = label("v", i);
        parts.push(format!(
            "[{video_prev}][v{i}]xfade=transition={xfade}:duration={overlap}:offset={}[{video_next}]",
            format_secs_arg(offset_ms)
        ));
        video_prev = video_next;

        if include_audio {
            let audio_next = label("a", i);
            parts.push(format!("[{audio_prev}][a{i}]acrossfade=d={overlap}[{audio_next}]"));
            audio_prev = audio_next;
        }
    }

    FilterGraph {
        filter: parts.join(";"),
        video_out: format!("[{video_prev}]"),
        audio_out: include_audio.then(|| format!("[{audio_prev}]")),
    }
}

/// Command for the graph strategy. Segment windows become input seeks.
///
/// `output` is a staged path, so the command always overwrites.
pub fn build_graph_command(req: &ConcatRequest, timeline: &Timeline, output: &Path) -> FfmpegCommand {
    let graph = build_transition_graph(timeline, &req.format, req.include_audio);

    let mut cmd = FfmpegCommand::new(output).overwrite(true);
    for segment in timeline.segments() {
        let mut input = FfmpegInput::new(&segment.path);
        if segment.start_ms > 0 {
            input = input.seek_ms(segment.start_ms);
        }
        cmd = cmd.input(input.duration_ms(segment.duration_ms));
    }

    let mut cmd = graph.apply(cmd).output_args(req.encoding.video_args());
    if req.include_audio {
        cmd = cmd.output_args(req.encoding.audio_args());
    }
    cmd.output_args(req.encoding.extra_args.iter().cloned())
}

/// Command for the list strategy, writing to a staged path.
pub fn build_list_command(list_path: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(output)
        .input(FfmpegInput::new(list_path).format("concat").arg("-safe").arg("0"))
        .stream_copy()
        .overwrite(true)
}

/// Concatenate segments into one file.
pub async fn concat_segments(
    invoker: &EncodeInvoker,
    req: &ConcatRequest,
    progress: Option<mpsc::Sender<ProgressUpdate>>,
) -> MediaResult<MediaOutput> {
    let resolved = resolve_durations(&req.segments).await?;
    let timeline = Timeline::new(resolved, req.transition)?;
    let staged = StagedOutput::new(&req.output, req.overwrite).await?;
    let expected_ms = timeline.expected_duration_ms();
    let total_sec = Some(vedit_models::ms_to_secs(expected_ms));

    info!(
        segments = timeline.segments().len(),
        transition = %req.transition.kind,
        strategy = ?timeline.strategy(),
        expected_ms,
        output = %staged.target().display(),
        "Concatenating segments"
    );

    match timeline.strategy() {
        ConcatStrategy::List => {
            let workdir = tempfile::Builder::new().prefix("vedit-concat-").tempdir()?;
            let list_path = workdir.path().join("segments.txt");
            tokio::fs::write(&list_path, build_concat_list(timeline.segments())).await?;

            let cmd = build_list_command(&list_path, staged.path());
            invoker.run_command(&cmd, total_sec, progress).await?;
        }
        ConcatStrategy::Graph => {
            let cmd = build_graph_command(req, &timeline, staged.path());
            invoker.run_command(&cmd, total_sec, progress).await?;
        }
    }
    let output = staged.commit()?;

    Ok(MediaOutput {
        size_bytes: file_size(&output).await?,
        output_path: output,
        duration_ms: expected_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use vedit_models::{EncodingConfig, Segment, TransitionKind, TransitionSpec};

    fn resolved(durations: &[u64]) -> Vec<ResolvedSegment> {
        durations
            .iter()
            .enumerate()
            .map(|(i, d)| ResolvedSegment {
                path: PathBuf::from(format!("/clips/{i}.mp4")),
                start_ms: 0,
                duration_ms: *d,
                trimmed: false,
            })
            .collect()
    }

    fn fade_timeline() -> Timeline {
        Timeline::new(
            resolved(&[10_000, 15_000, 8_000]),
            TransitionSpec::new(TransitionKind::Fade, 1_000),
        )
        .unwrap()
    }

    #[test]
    fn test_escape_concat_path() {
        assert_eq!(
            escape_concat_path(Path::new("/media/it's here.mp4")),
            r"'/media/it'\''s here.mp4'"
        );
    }

    #[test]
    fn test_concat_list_entries() {
        let mut segments = resolved(&[4_000, 6_000]);
        segments[1].start_ms = 1_500;
        segments[1].trimmed = true;

        let list = build_concat_list(&segments);
        assert_eq!(
            list,
            "file '/clips/0.mp4'\nfile '/clips/1.mp4'\ninpoint 1.500\noutpoint 7.500\n"
        );
    }

    #[test]
    fn test_transition_graph_chain() {
        let graph = build_transition_graph(&fade_timeline(), &OutputFormat::default(), true);

        assert!(graph.filter.contains(
            "[v0][v1]xfade=transition=fade:duration=1.000:offset=9.000[vx1]"
        ));
        assert!(graph.filter.contains(
            "[vx1][v2]xfade=transition=fade:duration=1.000:offset=23.000[vout]"
        ));
        assert!(graph.filter.contains("[a0][a1]acrossfade=d=1.000[ax1]"));
        assert!(graph.filter.contains("[ax1][a2]acrossfade=d=1.000[aout]"));
        assert!(graph.filter.contains("[2:v]scale=1920:1080"));
        assert_eq!(graph.map_args(), vec!["-map", "[vout]", "-map", "[aout]"]);
    }

    #[test]
    fn test_graph_labels_match_maps() {
        let graph = build_transition_graph(&fade_timeline(), &OutputFormat::default(), false);
        assert!(graph.audio_out.is_none());
        assert!(!graph.filter.contains("acrossfade"));
        assert!(graph.filter.ends_with(&graph.video_out));
    }

    #[test]
    fn test_single_segment_graph_maps_normalized_input() {
        let timeline = Timeline::new(resolved(&[5_000]), TransitionSpec::new(TransitionKind::Zoom, 500)).unwrap();
        let graph = build_transition_graph(&timeline, &OutputFormat::default(), true);
        assert_eq!(graph.video_out, "[v0]");
        assert_eq!(graph.audio_out.as_deref(), Some("[a0]"));
        assert!(!graph.filter.contains("xfade"));
    }

    #[test]
    fn test_transition_names() {
        let timeline = Timeline::new(
            resolved(&[3_000, 3_000]),
            TransitionSpec::new(TransitionKind::Crossfade, 500),
        )
        .unwrap();
        let graph = build_transition_graph(&timeline, &OutputFormat::default(), false);
        assert!(graph.filter.contains("xfade=transition=dissolve:duration=0.500:offset=2.500"));
    }

    #[test]
    fn test_graph_command_maps_and_encodes() {
        let req = ConcatRequest {
            segments: vec![Segment::new("/clips/0.mp4"), Segment::new("/clips/1.mp4")],
            transition: TransitionSpec::new(TransitionKind::Fade, 1_000),
            output: "/out/joined.mp4".into(),
            format: OutputFormat::default(),
            encoding: EncodingConfig::default(),
            include_audio: true,
            overwrite: false,
        };
        let timeline = Timeline::new(resolved(&[10_000, 15_000]), req.transition).unwrap();
        let args = build_graph_command(&req, &timeline, Path::new("/out/joined.mp4")).build_args();
        let joined = args.join(" ");

        assert!(joined.contains("-t 10.000 -i /clips/0.mp4"));
        assert!(joined.contains("-map [vout] -map [aout]"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-c:a aac"));
        assert!(args.contains(&"-y".to_string()));
    }

    #[test]
    fn test_list_command_uses_stream_copy() {
        let args = build_list_command(Path::new("/tmp/list.txt"), Path::new("/out.mp4"))
            .build_args()
            .join(" ");
        assert!(args.contains("-f concat -safe 0 -i /tmp/list.txt"));
        assert!(args.contains("-c copy"));
    }
}
