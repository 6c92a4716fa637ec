//! Detected shots and sampled keyframes.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A contiguous run of frames between two scene cuts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Shot {
    pub id: String,
    pub start_ms: u64,
    pub end_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<PathBuf>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Shot {
    /// Create a shot whose id is derived from its ordinal.
    pub fn new(ordinal: usize, start_ms: u64, end_ms: u64) -> Self {
        Self {
            id: Self::id_for(ordinal),
            start_ms,
            end_ms,
            thumbnail_path: None,
            tags: Vec::new(),
        }
    }

    /// Stable shot id for a position in the detected sequence.
    pub fn id_for(ordinal: usize) -> String {
        format!("shot_{:04}", ordinal)
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// One representative still extracted from a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Keyframe {
    pub timestamp_ms: u64,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shot_id: Option<String>,
}
