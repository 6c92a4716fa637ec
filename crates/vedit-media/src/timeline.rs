//! Ordered segment timelines.
//!
//! A [`Timeline`] is a list of segments with known durations plus the
//! transition applied between neighbours. It decides which concat strategy
//! applies and computes the transition offsets and output duration.

use std::future::Future;
use std::path::{Path, PathBuf};

use vedit_models::{Segment, TransitionSpec};

use crate::error::{MediaResult, ValidationError};
use crate::fs_utils::{absolute, require_file};
use crate::probe::probe_duration_ms;

/// A segment with its effective window resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSegment {
    /// Absolute source path
    pub path: PathBuf,
    pub start_ms: u64,
    pub duration_ms: u64,
    /// Whether the segment declared a window of its own
    pub trimmed: bool,
}

impl ResolvedSegment {
    pub fn end_ms(&self) -> u64 {
        self.start_ms + self.duration_ms
    }
}

/// How the segments are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatStrategy {
    /// Concat demuxer list with stream copy
    List,
    /// Normalizing filter graph with chained cross-fades
    Graph,
}

/// Check segments before any probing or encoding.
pub fn validate_segments(segments: &[Segment]) -> Result<(), ValidationError> {
    if segments.is_empty() {
        return Err(ValidationError::EmptySegments);
    }

    for (index, segment) in segments.iter().enumerate() {
        require_file(&segment.path)?;
        if segment.duration_ms == Some(0) {
            return Err(ValidationError::NonPositiveDuration { index });
        }
    }

    Ok(())
}

/// Fill missing durations by probing the sources.
pub async fn resolve_durations(segments: &[Segment]) -> MediaResult<Vec<ResolvedSegment>> {
    resolve_with(segments, |path| {
        let path = path.to_path_buf();
        async move { probe_duration_ms(path).await }
    })
    .await
}

/// Resolve segment windows with a custom source-duration lookup.
///
/// The lookup is only consulted for segments without a declared duration.
pub async fn resolve_with<F, Fut>(segments: &[Segment], mut source_duration_ms: F) -> MediaResult<Vec<ResolvedSegment>>
where
    F: FnMut(&Path) -> Fut,
    Fut: Future<Output = MediaResult<u64>>,
{
    validate_segments(segments)?;

    let mut resolved = Vec::with_capacity(segments.len());
    for (index, segment) in segments.iter().enumerate() {
        let start_ms = segment.start_or_zero();
        let duration_ms = match segment.duration_ms {
            Some(duration) => duration,
            None => source_duration_ms(&segment.path).await?.saturating_sub(start_ms),
        };

        if duration_ms == 0 {
            return Err(ValidationError::NonPositiveDuration { index }.into());
        }

        resolved.push(ResolvedSegment {
            path: absolute(&segment.path)?,
            start_ms,
            duration_ms,
            trimmed: segment.is_trimmed(),
        });
    }

    Ok(resolved)
}

/// Segments with resolved durations and the transition between them.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    segments: Vec<ResolvedSegment>,
    transition: TransitionSpec,
}

impl Timeline {
    /// Build a timeline, rejecting transitions that cannot fit.
    pub fn new(segments: Vec<ResolvedSegment>, transition: TransitionSpec) -> Result<Self, ValidationError> {
        if segments.is_empty() {
            return Err(ValidationError::EmptySegments);
        }

        if !transition.is_none() {
            if transition.duration_ms == 0 {
                return Err(ValidationError::ZeroTransition);
            }
            if let Some((index, shortest)) = segments
                .iter()
                .enumerate()
                .find(|(_, s)| s.duration_ms < transition.duration_ms)
            {
                return Err(ValidationError::TransitionTooLong {
                    transition_ms: transition.duration_ms,
                    index,
                    segment_ms: shortest.duration_ms,
                });
            }
        }

        Ok(Self {
            segments,
            transition,
        })
    }

    pub fn segments(&self) -> &[ResolvedSegment] {
        &self.segments
    }

    pub fn transition(&self) -> TransitionSpec {
        self.transition
    }

    pub fn strategy(&self) -> ConcatStrategy {
        if self.transition.is_none() {
            ConcatStrategy::List
        } else {
            ConcatStrategy::Graph
        }
    }

    /// Effective overlap between neighbours, zero for hard cuts.
    pub fn overlap_ms(&self) -> u64 {
        match self.strategy() {
            ConcatStrategy::List => 0,
            ConcatStrategy::Graph => self.transition.duration_ms,
        }
    }

    /// Start of each transition in the output, one per join.
    ///
    /// `offset_i = sum(duration_0..i-1) - i * overlap` for `i` in `1..N`.
    pub fn transition_offsets_ms(&self) -> Vec<u64> {
        let overlap = self.overlap_ms();
        let mut offsets = Vec::with_capacity(self.segments.len().saturating_sub(1));
        let mut elapsed = 0u64;

        for (i, segment) in self.segments.iter().enumerate().take(self.segments.len() - 1) {
            elapsed += segment.duration_ms;
            offsets.push(elapsed.saturating_sub((i as u64 + 1) * overlap));
        }

        offsets
    }

    /// `sum(durations) - (N - 1) * overlap`.
    pub fn expected_duration_ms(&self) -> u64 {
        let total: u64 = self.segments.iter().map(|s| s.duration_ms).sum();
        let joins = self.segments.len() as u64 - 1;
        total.saturating_sub(joins * self.overlap_ms())
    }
}
