//! Clip segments and transitions.

use std::fmt;
use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One input clip to concatenate, with an optional trim window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Source media file
    pub path: PathBuf,
    /// Window start inside the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<u64>,
    /// Window length; when absent the segment runs to the end of the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Segment {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            start_ms: None,
            duration_ms: None,
        }
    }

    pub fn with_start(mut self, start_ms: u64) -> Self {
        self.start_ms = Some(start_ms);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Start offset, zero when not declared.
    pub fn start_or_zero(&self) -> u64 {
        self.start_ms.unwrap_or(0)
    }

    /// Whether the segment declares any trim window.
    pub fn is_trimmed(&self) -> bool {
        self.start_ms.is_some() || self.duration_ms.is_some()
    }
}

/// Transition style between consecutive segments.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    #[default]
    None,
    Fade,
    Slide,
    Zoom,
    Crossfade,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::None => "none",
            TransitionKind::Fade => "fade",
            TransitionKind::Slide => "slide",
            TransitionKind::Zoom => "zoom",
            TransitionKind::Crossfade => "crossfade",
        }
    }

    /// Name of the matching `xfade` transition, `None` for hard cuts.
    pub fn xfade_name(&self) -> Option<&'static str> {
        match self {
            TransitionKind::None => None,
            TransitionKind::Fade => Some("fade"),
            TransitionKind::Slide => Some("slideleft"),
            TransitionKind::Zoom => Some("zoomin"),
            TransitionKind::Crossfade => Some("dissolve"),
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition applied between every pair of consecutive segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransitionSpec {
    #[serde(default)]
    pub kind: TransitionKind,
    #[serde(default)]
    pub duration_ms: u64,
}

impl TransitionSpec {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(kind: TransitionKind, duration_ms: u64) -> Self {
        Self { kind, duration_ms }
    }

    /// True when segments should be joined with a hard cut.
    pub fn is_none(&self) -> bool {
        self.kind == TransitionKind::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_builder() {
        let seg = Segment::new("/media/a.mp4").with_start(1500).with_duration(4000);
        assert_eq!(seg.start_or_zero(), 1500);
        assert_eq!(seg.duration_ms, Some(4000));
        assert!(seg.is_trimmed());
        assert!(!Segment::new("/media/b.mp4").is_trimmed());
    }

    #[test]
    fn test_transition_serde() {
        let spec: TransitionSpec =
            serde_json::from_str(r#"{"kind":"crossfade","durationMs":750}"#).unwrap();
        assert_eq!(spec.kind, TransitionKind::Crossfade);
        assert_eq!(spec.duration_ms, 750);
        assert!(TransitionSpec::none().is_none());
    }

    #[test]
    fn test_xfade_names() {
        assert_eq!(TransitionKind::None.xfade_name(), None);
        assert_eq!(TransitionKind::Fade.xfade_name(), Some("fade"));
        assert_eq!(TransitionKind::Zoom.xfade_name(), Some("zoomin"));
    }
}
