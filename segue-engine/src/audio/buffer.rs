//! Decoded sample container
//!
//! A `Buffer` holds interleaved f32 samples plus the format and stream
//! position they belong to. Buffers are moved, never shared: at any instant
//! one is either sitting in a [`BufferPool`](super::BufferPool) or travelling
//! through the decoder, DSP chain and output sink.

use crate::error::{Error, Result};
use bitflags::bitflags;

bitflags! {
    /// Allocation policy flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BufferFlags: u8 {
        /// Capacity is fixed; writes beyond it are rejected instead of growing
        const IMMUTABLE_SIZE = 0b0000_0001;
        /// Owned by a pool; returned there instead of being dropped
        const NO_DELETE = 0b0000_0010;
    }
}

/// Interleaved f32 samples with format and position metadata
#[derive(Debug)]
pub struct Buffer {
    data: Vec<f32>,
    len: usize,
    sample_rate: u32,
    channels: u16,
    /// Stream position of the first sample, seconds
    position: f64,
    flags: BufferFlags,
}

impl Buffer {
    /// Growable buffer with no format yet
    pub fn new(capacity: usize) -> Self {
        Self::with_flags(capacity, BufferFlags::empty())
    }

    pub fn with_flags(capacity: usize, flags: BufferFlags) -> Self {
        Self {
            data: vec![0.0; capacity],
            len: 0,
            sample_rate: 0,
            channels: 0,
            position: 0.0,
            flags,
        }
    }

    /// Fixed-size pooled buffer for the given format
    pub fn pooled(capacity: usize, sample_rate: u32, channels: u16) -> Self {
        let mut buffer = Self::with_flags(
            capacity,
            BufferFlags::IMMUTABLE_SIZE | BufferFlags::NO_DELETE,
        );
        buffer.set_format(sample_rate, channels);
        buffer
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn set_format(&mut self, sample_rate: u32, channels: u16) {
        self.sample_rate = sample_rate;
        self.channels = channels;
    }

    pub fn has_format(&self, sample_rate: u32, channels: u16) -> bool {
        self.sample_rate == sample_rate && self.channels == channels
    }

    /// Valid samples (all channels)
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.len / self.channels as usize
        }
    }

    /// Seconds of audio held
    pub fn duration(&self) -> f64 {
        segue_common::time::samples_to_seconds(self.len as u64, self.sample_rate, self.channels)
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn set_position(&mut self, seconds: f64) {
        self.position = seconds;
    }

    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    pub fn samples(&self) -> &[f32] {
        &self.data[..self.len]
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.data[..self.len]
    }

    /// Whole backing store, for writers that set the length afterwards
    pub fn storage_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Set the valid sample count, growing unless the size is immutable
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > self.data.len() {
            if self.flags.contains(BufferFlags::IMMUTABLE_SIZE) {
                return Err(Error::Buffer(format!(
                    "length {} exceeds fixed capacity {}",
                    len,
                    self.data.len()
                )));
            }
            self.data.resize(len, 0.0);
        }
        self.len = len;
        Ok(())
    }

    /// Replace the contents with `src`
    pub fn assign(&mut self, src: &[f32]) -> Result<()> {
        self.set_len(src.len())?;
        self.data[..src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Copy `src` in at `offset`, extending the valid length if needed
    pub fn copy_from(&mut self, src: &[f32], offset: usize) -> Result<()> {
        let end = offset + src.len();
        if end > self.len {
            self.set_len(end)?;
        }
        self.data[offset..end].copy_from_slice(src);
        Ok(())
    }

    pub fn apply_gain(&mut self, gain: f32) {
        for sample in self.samples_mut() {
            *sample *= gain;
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.position = 0.0;
    }
}

// ===== Tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growable_buffer_grows() {
        let mut buffer = Buffer::new(4);
        buffer.assign(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]).unwrap();
        assert_eq!(buffer.len(), 6);
        assert!(buffer.capacity() >= 6);
        assert_eq!(buffer.samples()[5], 0.6);
    }

    #[test]
    fn test_immutable_size_rejects_growth() {
        let mut buffer = Buffer::pooled(4, 44_100, 2);
        assert!(buffer.assign(&[0.0; 4]).is_ok());
        let err = buffer.assign(&[0.0; 5]).unwrap_err();
        assert!(matches!(err, Error::Buffer(_)));
        assert_eq!(buffer.capacity(), 4);
    }

    #[test]
    fn test_pooled_flags() {
        let buffer = Buffer::pooled(8, 48_000, 2);
        assert!(buffer.flags().contains(BufferFlags::NO_DELETE));
        assert!(buffer.flags().contains(BufferFlags::IMMUTABLE_SIZE));
        assert!(buffer.has_format(48_000, 2));
        assert!(Buffer::new(8).flags().is_empty());
    }

    #[test]
    fn test_duration_and_frames() {
        let mut buffer = Buffer::pooled(88_200, 44_100, 2);
        buffer.set_len(44_100).unwrap();
        assert_eq!(buffer.frames(), 22_050);
        assert!((buffer.duration() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_copy_from_offset() {
        let mut buffer = Buffer::new(0);
        buffer.copy_from(&[1.0, 2.0], 2).unwrap();
        assert_eq!(buffer.samples(), &[0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_apply_gain() {
        let mut buffer = Buffer::new(0);
        buffer.assign(&[0.5, -0.5]).unwrap();
        buffer.apply_gain(0.5);
        assert_eq!(buffer.samples(), &[0.25, -0.25]);
    }
}
