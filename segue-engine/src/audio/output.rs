//! Output sink contract
//!
//! A player hands buffers to an [`Output`] by value together with the
//! [`BufferProvider`] that wants them back. The output must eventually pass
//! every accepted buffer to that provider exactly once: after playing it,
//! or when it is cleared or released. The provider travels with each buffer,
//! so one output can serve consecutive players (gapless) without being
//! rebound.

use super::buffer::Buffer;
use crate::error::Result;
use std::sync::Arc;
use thiserror::Error;

/// Receives buffers the output is done with
///
/// Called on the output's own thread; implementations must not block.
pub trait BufferProvider: Send + Sync {
    fn on_buffer_processed(&self, buffer: Buffer);
}

/// Reasons an output refuses a buffer; the buffer always comes back
#[derive(Error, Debug)]
pub enum PlayError {
    /// Queue is full; retry later
    #[error("output queue is full")]
    Full(Buffer),

    /// The sink is broken; escalated as an output failure
    #[error("output failed: {reason}")]
    Failed { buffer: Buffer, reason: String },
}

impl PlayError {
    pub fn into_buffer(self) -> Buffer {
        match self {
            PlayError::Full(buffer) => buffer,
            PlayError::Failed { buffer, .. } => buffer,
        }
    }
}

/// Audio sink
pub trait Output: Send + Sync {
    /// Queue a buffer for playback
    fn play_buffer(
        &self,
        buffer: Buffer,
        provider: Arc<dyn BufferProvider>,
    ) -> std::result::Result<(), PlayError>;

    fn pause(&self);

    fn resume(&self);

    /// Linear volume, 0.0 to 1.0
    fn set_volume(&self, volume: f64);

    fn volume(&self) -> f64;

    /// Drop queued audio, returning every buffer to its provider
    fn clear_buffers(&self);

    /// Clear and let the sink idle (end of session)
    fn release_buffers(&self);

    /// Seconds between a buffer being accepted and being heard
    fn latency(&self) -> f64 {
        0.0
    }

    fn name(&self) -> &str;
}

/// Creates outputs for new players
pub trait OutputFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn Output>>;

    fn name(&self) -> &str;
}
