//! WAV test file generation

use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

/// Write a 16-bit stereo sine wave
///
/// # Arguments
/// * `path` - Output file path
/// * `sample_rate` - Frames per second
/// * `duration_ms` - Duration in milliseconds
/// * `frequency_hz` - Tone frequency
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    duration_ms: u64,
    frequency_hz: f32,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let total_frames = sample_rate as u64 * duration_ms / 1000;
    for frame in 0..total_frames {
        let t = frame as f32 / sample_rate as f32;
        let value = (0.5 * (2.0 * PI * frequency_hz * t).sin() * i16::MAX as f32) as i16;
        writer.write_sample(value)?;
        writer.write_sample(value)?;
    }

    writer.finalize()
}
