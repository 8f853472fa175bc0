//! Timestamp and audio time conversion utilities

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Seconds of audio represented by `samples` interleaved samples
///
/// Returns 0.0 for an unconfigured format (zero rate or channels).
pub fn samples_to_seconds(samples: u64, sample_rate: u32, channels: u16) -> f64 {
    let per_second = sample_rate as u64 * channels as u64;
    if per_second == 0 {
        return 0.0;
    }
    samples as f64 / per_second as f64
}

/// Interleaved sample count for `seconds` of audio, rounded down to a whole frame
pub fn seconds_to_samples(seconds: f64, sample_rate: u32, channels: u16) -> u64 {
    if seconds <= 0.0 {
        return 0;
    }
    let frames = (seconds * sample_rate as f64).floor() as u64;
    frames * channels as u64
}
