//! FFmpeg progress parsing.
//!
//! The encoder rewrites a single stats line on its diagnostic stream:
//!
//! ```text
//! frame=  240 fps= 48 q=28.0 size=    1024kB time=00:00:08.00 bitrate=1048.6kbits/s speed=1.6x
//! ```
//!
//! Lines without a `time=` field are not progress and are ignored.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=\s*(\d+):(\d{2}):(\d{2})\.(\d+)").expect("valid regex"));
static FRAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"frame=\s*(\d+)").expect("valid regex"));
static FPS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"fps=\s*([\d.]+)").expect("valid regex"));
static BITRATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bitrate=\s*([\d.]+)kbits/s").expect("valid regex"));
static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"size=\s*(\d+)(?:kB|KiB)").expect("valid regex"));

/// Encoder counters from one stats line. Absent fields are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodeStats {
    pub frame: u64,
    pub fps: f64,
    pub bitrate_kbps: f64,
    pub size_kb: u64,
}

/// One progress observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Percent complete in `[0, 100]`; zero when the total is unknown
    pub percent: f64,
    pub elapsed_sec: f64,
    pub total_sec: Option<f64>,
    pub stats: EncodeStats,
}

impl ProgressUpdate {
    /// Progress expressed as completed steps out of a known total.
    pub fn steps(done: u64, total: u64) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            (done as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
        };
        Self {
            percent,
            elapsed_sec: 0.0,
            total_sec: None,
            stats: EncodeStats {
                frame: done,
                ..EncodeStats::default()
            },
        }
    }
}

/// Turns diagnostic lines into progress updates.
///
/// Implementations may also accumulate state of their own (scene scores,
/// frame counters) which the caller reads back after the process exits.
pub trait DiagnosticParser: Send {
    fn parse_line(&mut self, line: &str) -> Option<ProgressUpdate>;
}

/// Parser for the encoder's stats line.
#[derive(Debug, Clone, Default)]
pub struct ProgressParser {
    total_sec: Option<f64>,
}

impl ProgressParser {
    /// Create a parser; `total_sec` is the expected output duration.
    pub fn new(total_sec: Option<f64>) -> Self {
        Self {
            total_sec: total_sec.filter(|t| *t > 0.0),
        }
    }

    pub fn total_sec(&self) -> Option<f64> {
        self.total_sec
    }

    /// Parse one line. Returns `None` unless it carries a `time=` field.
    pub fn parse(&self, line: &str) -> Option<ProgressUpdate> {
        let elapsed_sec = parse_elapsed(line)?;
        let percent = self
            .total_sec
            .map(|total| percent_of(elapsed_sec, total))
            .unwrap_or(0.0);

        Some(ProgressUpdate {
            percent,
            elapsed_sec,
            total_sec: self.total_sec,
            stats: parse_stats(line),
        })
    }
}

impl DiagnosticParser for ProgressParser {
    fn parse_line(&mut self, line: &str) -> Option<ProgressUpdate> {
        self.parse(line)
    }
}

/// Elapsed output time in seconds from `time=HH:MM:SS.cc`.
pub fn parse_elapsed(line: &str) -> Option<f64> {
    let caps = TIME_RE.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    let fraction: f64 = format!("0.{}", &caps[4]).parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds + fraction)
}

/// Counter fields from a stats line, zero when absent.
pub fn parse_stats(line: &str) -> EncodeStats {
    fn capture<T: std::str::FromStr + Default>(re: &Regex, line: &str) -> T {
        re.captures(line)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or_default()
    }

    EncodeStats {
        frame: capture(&FRAME_RE, line),
        fps: capture(&FPS_RE, line),
        bitrate_kbps: capture(&BITRATE_RE, line),
        size_kb: capture(&SIZE_RE, line),
    }
}

/// `elapsed / total` as a percentage clamped to `[0, 100]`.
pub fn percent_of(elapsed_sec: f64, total_sec: f64) -> f64 {
    if total_sec <= 0.0 {
        return 0.0;
    }
    (elapsed_sec / total_sec * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATS: &str = "frame=  240 fps= 48 q=28.0 size=    1024kB time=00:00:08.00 bitrate=1048.6kbits/s speed=1.6x";

    #[test]
    fn test_parse_full_stats_line() {
        let update = ProgressParser::new(Some(16.0)).parse(STATS).unwrap();
        assert!((update.elapsed_sec - 8.0).abs() < 1e-9);
        assert!((update.percent - 50.0).abs() < 1e-9);
        assert_eq!(update.stats.frame, 240);
        assert!((update.stats.fps - 48.0).abs() < 1e-9);
        assert!((update.stats.bitrate_kbps - 1048.6).abs() < 1e-9);
        assert_eq!(update.stats.size_kb, 1024);
    }

    #[test]
    fn test_elapsed_formula() {
        let elapsed = parse_elapsed("time=01:02:03.45").unwrap();
        assert!((elapsed - 3723.45).abs() < 1e-9);
    }

    #[test]
    fn test_lines_without_time_are_ignored() {
        let parser = ProgressParser::new(Some(10.0));
        assert!(parser.parse("Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'in.mp4':").is_none());
        assert!(parser.parse("frame=  10 fps=0.0 q=0.0 size=0kB").is_none());
        assert!(parser.parse("time=N/A bitrate=N/A").is_none());
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        let update = ProgressParser::new(None).parse("size=N/A time=00:00:01.50").unwrap();
        assert_eq!(update.stats, EncodeStats::default());
        assert_eq!(update.percent, 0.0);
        assert_eq!(update.total_sec, None);
    }

    #[test]
    fn test_percent_is_clamped() {
        let parser = ProgressParser::new(Some(5.0));
        let update = parser.parse("time=00:00:06.00").unwrap();
        assert_eq!(update.percent, 100.0);
        assert_eq!(percent_of(1.0, 0.0), 0.0);
    }

    #[test]
    fn test_kib_size_suffix() {
        assert_eq!(parse_stats("size=     256KiB time=00:00:01.00").size_kb, 256);
    }

    #[test]
    fn test_steps_progress() {
        let update = ProgressUpdate::steps(3, 12);
        assert!((update.percent - 25.0).abs() < 1e-9);
        assert_eq!(ProgressUpdate::steps(1, 0).percent, 0.0);
    }
}
