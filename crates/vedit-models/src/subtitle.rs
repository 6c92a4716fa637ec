//! Subtitle cues passed to the composition renderer.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Per-word timing inside a cue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WordTiming {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// One subtitle line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleCue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<WordTiming>>,
}

impl SubtitleCue {
    /// Cues must be non-empty intervals; word timings must sit inside the cue.
    pub fn is_well_formed(&self) -> bool {
        if self.end_ms <= self.start_ms {
            return false;
        }
        self.words.as_ref().map_or(true, |words| {
            words
                .iter()
                .all(|w| w.start_ms >= self.start_ms && w.end_ms <= self.end_ms && w.end_ms >= w.start_ms)
        })
    }
}

/// Check that cues are well formed and ordered by start time.
pub fn cues_are_ordered(cues: &[SubtitleCue]) -> bool {
    cues.iter().all(SubtitleCue::is_well_formed)
        && cues.windows(2).all(|w| w[0].start_ms <= w[1].start_ms)
}
