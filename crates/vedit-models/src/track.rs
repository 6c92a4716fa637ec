//! Audio tracks for multi-track mixing.

use std::fmt;
use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maximum number of tracks in one mix.
pub const MAX_MIX_TRACKS: usize = 4;

/// Semantic role of an audio track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    Voiceover,
    Original,
    Bgm,
    Sfx,
}

impl TrackType {
    /// Volume applied when the track does not specify one.
    pub fn default_volume(&self) -> f64 {
        match self {
            TrackType::Voiceover => 1.0,
            TrackType::Original => 0.15,
            TrackType::Bgm => 0.3,
            TrackType::Sfx => 0.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackType::Voiceover => "voiceover",
            TrackType::Original => "original",
            TrackType::Bgm => "bgm",
            TrackType::Sfx => "sfx",
        }
    }
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audio stream with a role and a level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    #[serde(rename = "type")]
    pub track_type: TrackType,
    pub path: PathBuf,
    /// Linear gain in `[0, 1]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Track {
    pub fn new(track_type: TrackType, path: impl Into<PathBuf>) -> Self {
        Self {
            track_type,
            path: path.into(),
            volume: None,
            start_ms: None,
            duration_ms: None,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_window(mut self, start_ms: Option<u64>, duration_ms: Option<u64>) -> Self {
        self.start_ms = start_ms;
        self.duration_ms = duration_ms;
        self
    }

    /// Explicit volume if set, else the default for the track's role.
    pub fn effective_volume(&self) -> f64 {
        self.volume.unwrap_or_else(|| self.track_type.default_volume())
    }

    pub fn has_window(&self) -> bool {
        self.start_ms.is_some() || self.duration_ms.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_volumes() {
        assert_eq!(TrackType::Voiceover.default_volume(), 1.0);
        assert_eq!(TrackType::Original.default_volume(), 0.15);
        assert_eq!(TrackType::Bgm.default_volume(), 0.3);
        assert_eq!(TrackType::Sfx.default_volume(), 0.5);
    }

    #[test]
    fn test_effective_volume_prefers_explicit() {
        let track = Track::new(TrackType::Bgm, "/a/music.mp3");
        assert_eq!(track.effective_volume(), 0.3);
        assert_eq!(track.with_volume(0.0).effective_volume(), 0.0);
    }

    #[test]
    fn test_track_type_field_name() {
        let track: Track =
            serde_json::from_str(r#"{"type":"voiceover","path":"/v.wav","startMs":500}"#).unwrap();
        assert_eq!(track.track_type, TrackType::Voiceover);
        assert_eq!(track.start_ms, Some(500));
        assert!(track.has_window());
    }
}
