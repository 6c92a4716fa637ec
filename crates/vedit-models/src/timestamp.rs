//! Timestamp parsing and millisecond arithmetic.
//!
//! Edit decisions are expressed in integer milliseconds. Conversions to the
//! encoder's textual forms go through integer math so that a cut requested at
//! `12_345 ms` is passed as exactly `12.345`, never `12.344999`.

use thiserror::Error;

/// Maximum reasonable media duration (24 hours in milliseconds).
pub const MAX_MEDIA_DURATION_MS: u64 = 86_400_000;

/// Timestamp parsing error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimestampError {
    #[error("Timestamp cannot be empty")]
    Empty,

    #[error("Timestamp cannot be negative")]
    Negative,

    #[error("Invalid {0} value: {1}")]
    InvalidValue(&'static str, String),

    #[error("Invalid timestamp format: {0}")]
    InvalidFormat(String),
}

/// Parse a timestamp string to total seconds.
///
/// Supports formats:
/// - `HH:MM:SS` or `HH:MM:SS.mmm`
/// - `MM:SS` or `MM:SS.mmm`
/// - `SS` or `SS.mmm`
///
/// # Examples
/// ```
/// use vedit_models::timestamp::parse_timestamp;
/// assert_eq!(parse_timestamp("01:30:00").unwrap(), 5400.0);
/// assert_eq!(parse_timestamp("05:30").unwrap(), 330.0);
/// assert_eq!(parse_timestamp("90").unwrap(), 90.0);
/// ```
pub fn parse_timestamp(ts: &str) -> Result<f64, TimestampError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(TimestampError::Empty);
    }

    let parts: Vec<&str> = ts.split(':').collect();
    let names: &[&'static str] = match parts.len() {
        1 => &["seconds"],
        2 => &["minutes", "seconds"],
        3 => &["hours", "minutes", "seconds"],
        _ => return Err(TimestampError::InvalidFormat(ts.to_string())),
    };

    let mut total = 0.0;
    for (part, name) in parts.iter().zip(names) {
        let value: f64 = part
            .parse()
            .map_err(|_| TimestampError::InvalidValue(name, part.to_string()))?;
        if value < 0.0 {
            return Err(TimestampError::Negative);
        }
        total = total * 60.0 + value;
    }

    Ok(total)
}

/// Parse a timestamp string to whole milliseconds.
pub fn parse_timestamp_ms(ts: &str) -> Result<u64, TimestampError> {
    parse_timestamp(ts).map(secs_to_ms)
}

/// Convert milliseconds to fractional seconds.
pub fn ms_to_secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

/// Convert fractional seconds to milliseconds, rounding to the nearest.
pub fn secs_to_ms(secs: f64) -> u64 {
    if secs <= 0.0 || !secs.is_finite() {
        return 0;
    }
    (secs * 1000.0).round() as u64
}

/// Format milliseconds as a plain seconds argument (`12.345`).
pub fn format_secs_arg(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// Format milliseconds as `HH:MM:SS.mmm`.
pub fn format_ffmpeg_time(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let mins = (ms % 3_600_000) / 60_000;
    let secs = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, mins, secs, millis)
}

/// Format seconds into HH:MM:SS or HH:MM:SS.mmm string.
pub fn format_seconds(total_secs: f64) -> String {
    let ms = secs_to_ms(total_secs);
    if ms % 1000 == 0 {
        let s = ms / 1000;
        format!("{:02}:{:02}:{:02}", s / 3600, (s % 3600) / 60, s % 60)
    } else {
        format_ffmpeg_time(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_hh_mm_ss() {
        assert_eq!(parse_timestamp("00:00:00").unwrap(), 0.0);
        assert_eq!(parse_timestamp("00:01:00").unwrap(), 60.0);
        assert_eq!(parse_timestamp("01:30:45").unwrap(), 5445.0);
    }

    #[test]
    fn test_parse_timestamp_short_forms() {
        assert_eq!(parse_timestamp("05:30").unwrap(), 330.0);
        assert_eq!(parse_timestamp("90").unwrap(), 90.0);
        assert!((parse_timestamp("00:00:30.500").unwrap() - 30.5).abs() < 0.001);
    }

    #[test]
    fn test_parse_timestamp_errors() {
        assert!(matches!(parse_timestamp(""), Err(TimestampError::Empty)));
        assert!(matches!(parse_timestamp("abc"), Err(TimestampError::InvalidValue(_, _))));
        assert!(matches!(parse_timestamp("1:2:3:4"), Err(TimestampError::InvalidFormat(_))));
        assert!(matches!(parse_timestamp("-5"), Err(TimestampError::Negative)));
    }

    #[test]
    fn test_parse_timestamp_ms() {
        assert_eq!(parse_timestamp_ms("00:00:12.345").unwrap(), 12_345);
    }

    #[test]
    fn test_secs_to_ms_rounds() {
        assert_eq!(secs_to_ms(1.9355), 1936);
        assert_eq!(secs_to_ms(-3.0), 0);
        assert_eq!(secs_to_ms(f64::NAN), 0);
    }

    #[test]
    fn test_format_secs_arg_is_exact() {
        assert_eq!(format_secs_arg(12_345), "12.345");
        assert_eq!(format_secs_arg(5), "0.005");
        assert_eq!(format_secs_arg(9_000), "9.000");
    }

    #[test]
    fn test_format_ffmpeg_time() {
        assert_eq!(format_ffmpeg_time(0), "00:00:00.000");
        assert_eq!(format_ffmpeg_time(3_661_250), "01:01:01.250");
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(90.0), "00:01:30");
        assert_eq!(format_seconds(30.5), "00:00:30.500");
    }
}
