//! Master volume and mute
//!
//! Lock-free so the crossfader tick can read it while the transport mutates it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::warn;

#[derive(Debug)]
pub struct MasterVolume {
    volume_bits: AtomicU64,
    muted: AtomicBool,
}

impl Default for MasterVolume {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl MasterVolume {
    /// Non-finite volumes fall back to full volume
    pub fn new(volume: f64) -> Self {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        Self {
            volume_bits: AtomicU64::new(volume.to_bits()),
            muted: AtomicBool::new(false),
        }
    }

    pub fn volume(&self) -> f64 {
        f64::from_bits(self.volume_bits.load(Ordering::Acquire))
    }

    /// Store a clamped volume; returns true if the value changed
    ///
    /// NaN and infinities are ignored.
    pub fn set_volume(&self, volume: f64) -> bool {
        if !volume.is_finite() {
            warn!("Ignoring non-finite volume {}", volume);
            return false;
        }
        let volume = volume.clamp(0.0, 1.0);
        let previous = self.volume_bits.swap(volume.to_bits(), Ordering::AcqRel);
        f64::from_bits(previous) != volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Returns true if the mute state changed
    pub fn set_muted(&self, muted: bool) -> bool {
        self.muted.swap(muted, Ordering::AcqRel) != muted
    }

    /// Volume actually applied to outputs
    pub fn effective(&self) -> f64 {
        if self.is_muted() {
            0.0
        } else {
            self.volume()
        }
    }
}
