//! Output doubles

use parking_lot::Mutex;
use segue_engine::audio::{
    Buffer, BufferProvider, NullOutput, Output, OutputFactory, PlayError,
};
use segue_engine::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Rejects every buffer as a failed write
#[derive(Debug, Default)]
pub struct FailingOutput {
    pub attempts: AtomicUsize,
}

impl Output for FailingOutput {
    fn play_buffer(
        &self,
        buffer: Buffer,
        _provider: Arc<dyn BufferProvider>,
    ) -> std::result::Result<(), PlayError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PlayError::Failed {
            buffer,
            reason: "device unplugged".to_string(),
        })
    }

    fn pause(&self) {}

    fn resume(&self) {}

    fn set_volume(&self, _volume: f64) {}

    fn volume(&self) -> f64 {
        1.0
    }

    fn clear_buffers(&self) {}

    fn release_buffers(&self) {}

    fn name(&self) -> &str {
        "failing"
    }
}

pub struct FailingOutputFactory;

impl OutputFactory for FailingOutputFactory {
    fn create(&self) -> Result<Arc<dyn Output>> {
        Ok(Arc::new(FailingOutput::default()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Null output that remembers the position of every accepted buffer
pub struct RecordingOutput {
    inner: NullOutput,
    positions: Mutex<Vec<f64>>,
    clears: AtomicUsize,
}

impl RecordingOutput {
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            inner: NullOutput::new(capacity)?,
            positions: Mutex::new(Vec::new()),
            clears: AtomicUsize::new(0),
        })
    }

    pub fn positions(&self) -> Vec<f64> {
        self.positions.lock().clone()
    }

    pub fn accepted(&self) -> usize {
        self.positions.lock().len()
    }

    /// Times `clear_buffers` was called
    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl Output for RecordingOutput {
    fn play_buffer(
        &self,
        buffer: Buffer,
        provider: Arc<dyn BufferProvider>,
    ) -> std::result::Result<(), PlayError> {
        let position = buffer.position();
        self.inner.play_buffer(buffer, provider)?;
        self.positions.lock().push(position);
        Ok(())
    }

    fn pause(&self) {
        self.inner.pause();
    }

    fn resume(&self) {
        self.inner.resume();
    }

    fn set_volume(&self, volume: f64) {
        self.inner.set_volume(volume);
    }

    fn volume(&self) -> f64 {
        self.inner.volume()
    }

    fn clear_buffers(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear_buffers();
    }

    fn release_buffers(&self) {
        self.inner.release_buffers();
    }

    fn latency(&self) -> f64 {
        self.inner.latency()
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Hands out recording outputs and keeps them for inspection
#[derive(Default)]
pub struct RecordingOutputFactory {
    pub created: Mutex<Vec<Arc<RecordingOutput>>>,
}

impl OutputFactory for RecordingOutputFactory {
    fn create(&self) -> Result<Arc<dyn Output>> {
        let output = Arc::new(RecordingOutput::new(8)?);
        self.created.lock().push(Arc::clone(&output));
        Ok(output)
    }

    fn name(&self) -> &str {
        "recording"
    }
}
