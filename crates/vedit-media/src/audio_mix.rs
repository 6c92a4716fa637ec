//! Multi-track audio mixing.

use std::collections::HashSet;

use tokio::sync::mpsc;
use tracing::info;
use vedit_models::timestamp::format_secs_arg;
use vedit_models::{MediaOutput, MixRequest, Track, MAX_MIX_TRACKS};

use crate::command::FfmpegCommand;
use crate::error::{MediaResult, ValidationError};
use crate::fs_utils::{file_size, require_file, StagedOutput};
use crate::invoker::EncodeInvoker;
use crate::probe::probe_duration_ms;
use crate::progress::ProgressUpdate;

/// Label of the mixed stream.
pub const MIX_OUTPUT_LABEL: &str = "[aout]";

/// Check a track set before building a mix.
pub fn validate_tracks(tracks: &[Track]) -> Result<(), ValidationError> {
    if tracks.is_empty() {
        return Err(ValidationError::NoTracks);
    }
    if tracks.len() > MAX_MIX_TRACKS {
        return Err(ValidationError::TooManyTracks {
            count: tracks.len(),
            max: MAX_MIX_TRACKS,
        });
    }

    let mut seen = HashSet::new();
    for track in tracks {
        if !seen.insert(track.track_type) {
            return Err(ValidationError::DuplicateTrackType(track.track_type));
        }
        if let Some(volume) = track.volume {
            if !(0.0..=1.0).contains(&volume) {
                return Err(ValidationError::VolumeOutOfRange {
                    track_type: track.track_type,
                    volume,
                });
            }
        }
        if track.duration_ms == Some(0) {
            return Err(ValidationError::EmptyClip);
        }
        require_file(&track.path)?;
    }

    Ok(())
}

/// Per-track gain and window, then one `amix` over all tracks.
///
/// Input `i` of the command must be track `i`.
pub fn build_mix_filter(tracks: &[Track]) -> String {
    let mut parts = Vec::with_capacity(tracks.len() + 1);
    let mut labels = String::new();

    for (i, track) in tracks.iter().enumerate() {
        let mut chain = format!("[{i}:a]volume={}", track.effective_volume());

        if track.has_window() {
            chain.push_str(&format!(",atrim=start={}", format_secs_arg(track.start_ms.unwrap_or(0))));
            if let Some(duration) = track.duration_ms {
                chain.push_str(&format!(":duration={}", format_secs_arg(duration)));
            }
            chain.push_str(",asetpts=PTS-STARTPTS");
        }

        chain.push_str(&format!("[t{i}]"));
        parts.push(chain);
        labels.push_str(&format!("[t{i}]"));
    }

    parts.push(format!(
        "{labels}amix=inputs={}:duration=longest:dropout_transition=0:normalize=0{MIX_OUTPUT_LABEL}",
        tracks.len()
    ));
    parts.join(";")
}

/// How long a track contributes to the mix, given its source length.
pub fn contributing_duration_ms(track: &Track, source_ms: u64) -> u64 {
    let available = source_ms.saturating_sub(track.start_ms.unwrap_or(0));
    match track.duration_ms {
        Some(duration) => duration.min(available),
        None => available,
    }
}

/// Length of the mix: the longest contribution, since `amix` runs until its
/// longest input ends.
///
/// `sources_ms[i]` is the probed length of track `i`'s file.
pub fn expected_mix_duration_ms(tracks: &[Track], sources_ms: &[u64]) -> u64 {
    tracks
        .iter()
        .zip(sources_ms)
        .map(|(track, source_ms)| contributing_duration_ms(track, *source_ms))
        .max()
        .unwrap_or(0)
}

/// Build the mix command writing to a staged path. A video source is
/// appended as the last input and its picture is stream-copied.
pub fn build_mix_command(req: &MixRequest, output: &std::path::Path) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new(output).overwrite(true);
    for track in &req.tracks {
        cmd = cmd.input_path(&track.path);
    }

    cmd = cmd
        .filter_complex(build_mix_filter(&req.tracks))
        .map(MIX_OUTPUT_LABEL);

    cmd = match &req.video {
        Some(video) => cmd
            .input_path(video)
            .map(format!("{}:v:0", req.tracks.len()))
            .output_args(["-c:v", "copy"]),
        None => cmd.output_arg("-vn"),
    };

    cmd.output_args(req.encoding.audio_args())
}

/// Mix the tracks into one output.
pub async fn mix_audio(
    invoker: &EncodeInvoker,
    req: &MixRequest,
    progress: Option<mpsc::Sender<ProgressUpdate>>,
) -> MediaResult<MediaOutput> {
    validate_tracks(&req.tracks)?;
    if let Some(video) = &req.video {
        require_file(video)?;
    }

    let mut sources_ms = Vec::with_capacity(req.tracks.len());
    for track in &req.tracks {
        sources_ms.push(probe_duration_ms(&track.path).await?);
    }
    let expected_ms = expected_mix_duration_ms(&req.tracks, &sources_ms);

    let staged = StagedOutput::new(&req.output, req.overwrite).await?;
    info!(
        tracks = req.tracks.len(),
        expected_ms,
        output = %staged.target().display(),
        "Mixing audio tracks"
    );

    let cmd = build_mix_command(req, staged.path());
    invoker
        .run_command(&cmd, Some(vedit_models::ms_to_secs(expected_ms)), progress)
        .await?;
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
    use tempfile::TempDir;
    use vedit_models::{EncodingConfig, TrackType};

    fn tracks_in(dir: &TempDir, types: &[TrackType]) -> Vec<Track> {
        types
            .iter()
            .map(|t| {
                let path = dir.path().join(format!("{t}.wav"));
                std::fs::write(&path, b"RIFF").unwrap();
                Track::new(*t, path)
            })
            .collect()
    }

    #[test]
    fn test_voiceover_and_bgm_defaults() {
        let tracks = vec![
            Track::new(TrackType::Voiceover, "/a/vo.wav"),
            Track::new(TrackType::Bgm, "/a/music.mp3"),
        ];
        assert_eq!(
            build_mix_filter(&tracks),
            "[0:a]volume=1[t0];[1:a]volume=0.3[t1];\
             [t0][t1]amix=inputs=2:duration=longest:dropout_transition=0:normalize=0[aout]"
        );
    }

    #[test]
    fn test_windowed_track_is_trimmed() {
        let tracks = vec![Track::new(TrackType::Sfx, "/a/hit.wav")
            .with_volume(0.8)
            .with_window(Some(1_500), Some(2_000))];
        let filter = build_mix_filter(&tracks);
        assert!(filter.starts_with(
            "[0:a]volume=0.8,atrim=start=1.500:duration=2.000,asetpts=PTS-STARTPTS[t0]"
        ));
        assert!(filter.contains("amix=inputs=1"));
    }

    #[test]
    fn test_validate_track_count() {
        assert_eq!(validate_tracks(&[]), Err(ValidationError::NoTracks));

        let dir = TempDir::new().unwrap();
        let mut tracks = tracks_in(
            &dir,
            &[TrackType::Voiceover, TrackType::Original, TrackType::Bgm, TrackType::Sfx],
        );
        assert!(validate_tracks(&tracks).is_ok());

        tracks.push(tracks[0].clone());
        assert_eq!(
            validate_tracks(&tracks),
            Err(ValidationError::TooManyTracks { count: 5, max: 4 })
        );
    }

    #[test]
    fn test_validate_duplicates_and_volume() {
        let dir = TempDir::new().unwrap();
        let mut tracks = tracks_in(&dir, &[TrackType::Bgm, TrackType::Voiceover]);

        tracks[1].track_type = TrackType::Bgm;
        assert_eq!(
            validate_tracks(&tracks),
            Err(ValidationError::DuplicateTrackType(TrackType::Bgm))
        );

        tracks[1].track_type = TrackType::Voiceover;
        tracks[1].volume = Some(1.5);
        assert!(matches!(
            validate_tracks(&tracks),
            Err(ValidationError::VolumeOutOfRange { volume, .. }) if volume == 1.5
        ));

        tracks[1].volume = None;
        tracks[1].path = dir.path().join("absent.wav");
        assert!(matches!(validate_tracks(&tracks), Err(ValidationError::MissingFile(_))));
    }

    #[test]
    fn test_contributing_duration() {
        let track = Track::new(TrackType::Bgm, "/a.mp3");
        assert_eq!(contributing_duration_ms(&track, 60_000), 60_000);

        let windowed = track.clone().with_window(Some(10_000), Some(5_000));
        assert_eq!(contributing_duration_ms(&windowed, 60_000), 5_000);

        let tail = track.with_window(Some(58_000), Some(5_000));
        assert_eq!(contributing_duration_ms(&tail, 60_000), 2_000);
    }

    #[test]
    fn test_mix_lasts_as_long_as_longest_track() {
        let tracks = vec![
            Track::new(TrackType::Voiceover, "/a/vo.wav"),
            Track::new(TrackType::Bgm, "/a/music.mp3"),
        ];
        assert_eq!(expected_mix_duration_ms(&tracks, &[12_000, 60_000]), 60_000);
        assert_eq!(expected_mix_duration_ms(&tracks, &[60_000, 12_000]), 60_000);
    }

    #[test]
    fn test_mix_duration_respects_windows() {
        let tracks = vec![
            Track::new(TrackType::Voiceover, "/a/vo.wav"),
            Track::new(TrackType::Bgm, "/a/music.mp3").with_window(Some(5_000), Some(8_000)),
            Track::new(TrackType::Sfx, "/a/hit.wav").with_window(Some(0), None),
        ];
        // Voiceover 12 s outlasts the 8 s music window and the 3 s effect.
        assert_eq!(expected_mix_duration_ms(&tracks, &[12_000, 60_000, 3_000]), 12_000);

        let short_vo = &[4_000, 60_000, 3_000];
        assert_eq!(expected_mix_duration_ms(&tracks, short_vo), 8_000);
        assert_eq!(expected_mix_duration_ms(&[], &[]), 0);
    }

    #[test]
    fn test_mix_command_under_video() {
        let req = MixRequest {
            tracks: vec![
                Track::new(TrackType::Voiceover, "/a/vo.wav"),
                Track::new(TrackType::Original, "/a/orig.wav"),
            ],
            output: "/out/final.mp4".into(),
            video: Some("/a/picture.mp4".into()),
            encoding: EncodingConfig::default(),
            overwrite: false,
        };
        let args = build_mix_command(&req, std::path::Path::new("/out/final.mp4"))
            .build_args()
            .join(" ");

        assert!(args.contains("-i /a/vo.wav -i /a/orig.wav -i /a/picture.mp4"));
        assert!(args.contains("-map [aout] -map 2:v:0"));
        assert!(args.contains("-c:v copy"));
        assert!(!args.contains("-vn"));
    }
}
