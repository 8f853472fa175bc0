//! Clock-driven output that discards samples
//!
//! Behaves like a device sink without touching hardware: each queued buffer
//! is held for its real duration (divided by `speed`) and then handed back
//! to its provider. Used headless, in tests, and as the default backend.

use super::buffer::Buffer;
use super::output::{BufferProvider, Output, OutputFactory, PlayError};
use crate::error::{Error, Result};
use crate::playback::worker::{MessageQueue, Worker};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

enum NullMessage {
    Consume(u64),
}

struct Queued {
    buffer: Buffer,
    provider: Arc<dyn BufferProvider>,
}

#[derive(Default)]
struct NullState {
    queue: VecDeque<Queued>,
    paused: bool,
    /// Invalidates scheduled consume messages after pause/clear
    generation: u64,
    consumed: u64,
}

struct NullShared {
    state: Mutex<NullState>,
    volume_bits: AtomicU64,
    capacity: usize,
    speed: f64,
}

impl NullShared {
    fn schedule(&self, state: &mut NullState, queue: &MessageQueue<NullMessage>) {
        state.generation += 1;
        if let Some(front) = state.queue.front() {
            let delay = Duration::from_secs_f64(front.buffer.duration() / self.speed);
            queue.post_delayed(NullMessage::Consume(state.generation), delay);
        }
    }

    fn consume(&self, generation: u64, queue: &MessageQueue<NullMessage>) {
        let done = {
            let mut state = self.state.lock();
            if state.paused || generation != state.generation {
                return;
            }
            let done = state.queue.pop_front();
            if done.is_some() {
                state.consumed += 1;
            }
            self.schedule(&mut state, queue);
            done
        };
        if let Some(item) = done {
            item.provider.on_buffer_processed(item.buffer);
        }
    }

    fn take_all(&self) -> Vec<Queued> {
        let mut state = self.state.lock();
        state.generation += 1;
        state.queue.drain(..).collect()
    }
}

/// Sink that plays silence in real time
pub struct NullOutput {
    shared: Arc<NullShared>,
    worker: Worker<NullMessage>,
}

impl NullOutput {
    /// Real-time sink accepting up to `capacity` queued buffers
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_speed(capacity, 1.0)
    }

    /// Sink consuming audio `speed` times faster than real time
    pub fn with_speed(capacity: usize, speed: f64) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::AudioOutput("null output capacity must be > 0".into()));
        }
        if !(speed > 0.0) || !speed.is_finite() {
            return Err(Error::AudioOutput(format!("invalid null output speed {}", speed)));
        }

        let shared = Arc::new(NullShared {
            state: Mutex::new(NullState::default()),
            volume_bits: AtomicU64::new(1.0f64.to_bits()),
            capacity,
            speed,
        });

        let thread_shared = Arc::clone(&shared);
        let worker = Worker::spawn("segue-null-output", move |queue| {
            while let Some(NullMessage::Consume(generation)) = queue.recv() {
                thread_shared.consume(generation, &queue);
            }
        })?;

        debug!("Null output created (capacity {}, speed {}x)", capacity, speed);
        Ok(Self { shared, worker })
    }

    /// Buffers fully played since creation
    pub fn consumed_buffers(&self) -> u64 {
        self.shared.state.lock().consumed
    }

    /// Buffers waiting to be played
    pub fn queued_buffers(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    fn give_back(items: Vec<Queued>) {
        for item in items {
            item.provider.on_buffer_processed(item.buffer);
        }
    }
}

impl Output for NullOutput {
    fn play_buffer(
        &self,
        buffer: Buffer,
        provider: Arc<dyn BufferProvider>,
    ) -> std::result::Result<(), PlayError> {
        let mut state = self.shared.state.lock();
        if state.queue.len() >= self.shared.capacity {
            return Err(PlayError::Full(buffer));
        }
        let was_idle = state.queue.is_empty();
        state.queue.push_back(Queued { buffer, provider });
        if was_idle && !state.paused {
            self.shared.schedule(&mut state, self.worker.queue());
        }
        Ok(())
    }

    fn pause(&self) {
        let mut state = self.shared.state.lock();
        state.paused = true;
        state.generation += 1;
    }

    fn resume(&self) {
        let mut state = self.shared.state.lock();
        if state.paused {
            state.paused = false;
            self.shared.schedule(&mut state, self.worker.queue());
        }
    }

    fn set_volume(&self, volume: f64) {
        self.shared
            .volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn volume(&self) -> f64 {
        f64::from_bits(self.shared.volume_bits.load(Ordering::Relaxed))
    }

    fn clear_buffers(&self) {
        Self::give_back(self.shared.take_all());
    }

    fn release_buffers(&self) {
        let items = self.shared.take_all();
        self.shared.state.lock().paused = false;
        Self::give_back(items);
    }

    fn name(&self) -> &str {
        "null"
    }
}

impl Drop for NullOutput {
    fn drop(&mut self) {
        self.worker.shutdown();
        Self::give_back(self.shared.take_all());
    }
}

/// Creates [`NullOutput`]s
#[derive(Debug, Clone)]
pub struct NullOutputFactory {
    pub capacity: usize,
    pub speed: f64,
}

impl NullOutputFactory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            speed: 1.0,
        }
    }

    pub fn with_speed(capacity: usize, speed: f64) -> Self {
        Self { capacity, speed }
    }
}

impl OutputFactory for NullOutputFactory {
    fn create(&self) -> Result<Arc<dyn Output>> {
        Ok(Arc::new(NullOutput::with_speed(self.capacity, self.speed)?))
    }

    fn name(&self) -> &str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    struct ChannelProvider(Mutex<mpsc::Sender<f64>>);

    impl BufferProvider for ChannelProvider {
        fn on_buffer_processed(&self, buffer: Buffer) {
            let _ = self.0.lock().send(buffer.position());
        }
    }

    fn provider() -> (Arc<dyn BufferProvider>, mpsc::Receiver<f64>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(ChannelProvider(Mutex::new(tx))), rx)
    }

    fn buffer(frames: usize, position: f64) -> Buffer {
        let mut buffer = Buffer::pooled(frames * 2, 1000, 2);
        buffer.set_len(frames * 2).unwrap();
        buffer.set_position(position);
        buffer
    }

    #[test]
    fn test_buffers_come_back_in_order_after_their_duration() {
        let output = NullOutput::new(4).unwrap();
        let (provider, rx) = provider();
        let start = Instant::now();

        // 20 ms each at 1 kHz
        for i in 0..3 {
            output.play_buffer(buffer(20, i as f64), Arc::clone(&provider)).unwrap();
        }

        let positions: Vec<f64> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(positions, vec![0.0, 1.0, 2.0]);
        assert!(start.elapsed() >= Duration::from_millis(55));
        assert_eq!(output.consumed_buffers(), 3);
    }

    #[test]
    fn test_full_queue_returns_buffer() {
        let output = NullOutput::new(1).unwrap();
        let (provider, _rx) = provider();
        output.play_buffer(buffer(1000, 0.0), Arc::clone(&provider)).unwrap();

        match output.play_buffer(buffer(10, 5.0), provider) {
            Err(PlayError::Full(returned)) => assert_eq!(returned.position(), 5.0),
            other => panic!("expected Full, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_clear_returns_everything() {
        let output = NullOutput::new(8).unwrap();
        let (provider, rx) = provider();
        for i in 0..4 {
            output.play_buffer(buffer(1000, i as f64), Arc::clone(&provider)).unwrap();
        }
        output.clear_buffers();
        let returned: Vec<f64> = rx.try_iter().collect();
        assert_eq!(returned, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(output.queued_buffers(), 0);
    }

    #[test]
    fn test_pause_holds_buffers() {
        let output = NullOutput::new(8).unwrap();
        let (provider, rx) = provider();
        output.pause();
        output.play_buffer(buffer(5, 0.0), provider).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        output.resume();
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_volume_is_clamped() {
        let output = NullOutput::new(1).unwrap();
        output.set_volume(1.7);
        assert_eq!(output.volume(), 1.0);
        output.set_volume(0.25);
        assert_eq!(output.volume(), 0.25);
    }

    #[test]
    fn test_rejects_bad_settings() {
        assert!(NullOutput::new(0).is_err());
        assert!(NullOutput::with_speed(4, 0.0).is_err());
    }
}
