//! DSP chain stages
//!
//! A stream builds one [`Dsp`] per factory when it is created and runs every
//! buffer through them in order.

use super::buffer::Buffer;

/// In-place sample transform
pub trait Dsp: Send {
    fn process(&mut self, buffer: &mut Buffer);
}

/// Creates a fresh stage for each stream
pub trait DspFactory: Send + Sync {
    fn create(&self) -> Box<dyn Dsp>;

    fn name(&self) -> &str;
}

/// Convert decibels to a linear factor
pub fn db_to_linear(db: f64) -> f32 {
    10f64.powf(db / 20.0) as f32
}

/// Fixed gain stage
#[derive(Debug, Clone)]
pub struct PreampDsp {
    factor: f32,
}

impl PreampDsp {
    pub fn new(db: f64) -> Self {
        Self {
            factor: db_to_linear(db),
        }
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }
}

impl Dsp for PreampDsp {
    fn process(&mut self, buffer: &mut Buffer) {
        if self.factor != 1.0 {
            buffer.apply_gain(self.factor);
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreampDspFactory {
    pub db: f64,
}

impl DspFactory for PreampDspFactory {
    fn create(&self) -> Box<dyn Dsp> {
        Box::new(PreampDsp::new(self.db))
    }

    fn name(&self) -> &str {
        "preamp"
    }
}

/// Hard limiter to [-1.0, 1.0]
#[derive(Debug, Clone, Default)]
pub struct ClipDsp {
    clipped: u64,
}

impl ClipDsp {
    /// Samples clamped so far
    pub fn clipped(&self) -> u64 {
        self.clipped
    }
}

impl Dsp for ClipDsp {
    fn process(&mut self, buffer: &mut Buffer) {
        for sample in buffer.samples_mut() {
            if sample.abs() > 1.0 {
                *sample = sample.clamp(-1.0, 1.0);
                self.clipped += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClipDspFactory;

impl DspFactory for ClipDspFactory {
    fn create(&self) -> Box<dyn Dsp> {
        Box::new(ClipDsp::default())
    }

    fn name(&self) -> &str {
        "clip"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_of(samples: &[f32]) -> Buffer {
        let mut buffer = Buffer::new(0);
        buffer.assign(samples).unwrap();
        buffer
    }

    #[test]
    fn test_db_to_linear() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_linear(-6.0206) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_preamp_scales() {
        let mut buffer = buffer_of(&[0.5, -0.5]);
        PreampDspFactory { db: 6.0206 }.create().process(&mut buffer);
        assert!((buffer.samples()[0] - 1.0).abs() < 1e-4);
        assert!((buffer.samples()[1] + 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_clip_limits_and_counts() {
        let mut dsp = ClipDsp::default();
        let mut buffer = buffer_of(&[1.5, -2.0, 0.3]);
        dsp.process(&mut buffer);
        assert_eq!(buffer.samples(), &[1.0, -1.0, 0.3]);
        assert_eq!(dsp.clipped(), 2);
    }
}
