//! Single-track player
//!
//! A `Player` owns one [`Stream`] on its own worker thread and feeds the
//! stream's buffers to an [`Output`]. The output returns each buffer through
//! the player's [`BufferProvider`], which recycles it into the stream's pool
//! and tells the worker thread how far playback has progressed.
//!
//! # State machine
//!
//! ```text
//! Scheduled --play--> Playing --threshold/EOS--> AlmostDone --drained--> Finished
//!     |                  |                           |
//!     +------------------+---------------------------+--> Stopped | Error
//! ```
//!
//! Open and decode failures end in `Error` and are reported through the
//! [`PlayerListener`]; they never cross the thread boundary as panics or
//! return values. `stop()` never blocks: it marks the player stopped and
//! closes its queue. Dropping the player joins the worker thread, which owns
//! the stream, so the decoder is released exactly once.

use crate::audio::{Buffer, BufferPool, BufferProvider, Output, PlayError, PoolStats};
use crate::context::EngineContext;
use crate::error::Result;
use crate::playback::stream::{Stream, StreamOptions};
use crate::playback::worker::{MessageQueue, Received, Worker};
use parking_lot::Mutex;
use segue_common::StreamState;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Unique player identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayerId(Uuid);

impl PlayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, for thread names and logs
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}

/// Replay gain settings for one track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gain {
    pub preamp: f32,
    pub gain: f32,
    pub peak: f32,
    pub peak_valid: bool,
}

impl Default for Gain {
    fn default() -> Self {
        Self {
            preamp: 1.0,
            gain: 1.0,
            peak: 1.0,
            peak_valid: false,
        }
    }
}

impl Gain {
    pub fn new(gain: f32) -> Self {
        Self {
            gain,
            ..Self::default()
        }
    }

    /// Linear factor applied to every sample
    ///
    /// `preamp × gain`, limited to `peak` when it would amplify and the
    /// peak is known.
    pub fn factor(&self) -> f32 {
        let factor = self.preamp * self.gain;
        if factor > 1.0 && self.peak_valid {
            self.peak
        } else {
            factor
        }
    }
}

/// Player lifecycle notifications
///
/// Called from the player's worker thread. Implementations must not block
/// on the player they are notified about.
pub trait PlayerListener: Send + Sync {
    /// Stream opened; duration is known if the decoder reports one
    fn on_player_prepared(&self, _player: PlayerId) {}

    /// First buffer was consumed by the output
    fn on_player_started(&self, _player: PlayerId) {}

    fn on_player_almost_done(&self, _player: PlayerId) {}

    /// Playback crossed the mix point; a crossfade to the next track may start
    fn on_player_mix_point(&self, _player: PlayerId) {}

    /// Last buffer was submitted to the output
    fn on_player_end_of_stream(&self, _player: PlayerId) {}

    /// Every buffer was consumed
    fn on_player_finished(&self, _player: PlayerId) {}

    fn on_player_error(&self, _player: PlayerId, _message: &str) {}

    fn on_output_failed(&self, _player: PlayerId, _reason: &str) {}
}

/// Player timing parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerOptions {
    pub stream: StreamOptions,
    /// Seconds before the end at which AlmostDone fires
    pub almost_done_seconds: f64,
    /// Seconds before the end at which a crossfade starts; `None` when
    /// crossfading is off
    pub mix_point_seconds: Option<f64>,
    pub output_retry: Duration,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            stream: StreamOptions::default(),
            almost_done_seconds: 2.0,
            mix_point_seconds: None,
            output_retry: Duration::from_millis(10),
        }
    }
}

impl From<&segue_common::EngineConfig> for PlayerOptions {
    fn from(config: &segue_common::EngineConfig) -> Self {
        let mix_point_seconds = config
            .crossfade_enabled()
            .then(|| config.crossfade_ms as f64 / 1000.0);
        // AlmostDone never comes after the mix point
        let almost_done_seconds =
            mix_point_seconds.map_or(config.almost_done_seconds, |mix| {
                mix.max(config.almost_done_seconds)
            });
        Self {
            stream: StreamOptions::from(config),
            almost_done_seconds,
            mix_point_seconds,
            output_retry: config.output_retry(),
        }
    }
}

enum PlayerMessage {
    Play,
    Seek(f64),
    BufferProcessed { position: f64, epoch: u64 },
}

const UNKNOWN: u64 = u64::MAX;

struct PlayerShared {
    state: Mutex<StreamState>,
    seek_target: Mutex<Option<f64>>,
    position_bits: AtomicU64,
    duration_bits: AtomicU64,
    /// Buffers submitted to the output and not yet returned
    pending: AtomicUsize,
    /// Bumped on every seek; completions from before it are ignored
    epoch: AtomicU64,
    mix_point_reached: AtomicBool,
}

impl PlayerShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(StreamState::Scheduled),
            seek_target: Mutex::new(None),
            position_bits: AtomicU64::new(0f64.to_bits()),
            duration_bits: AtomicU64::new(UNKNOWN),
            pending: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            mix_point_reached: AtomicBool::new(false),
        }
    }

    fn state(&self) -> StreamState {
        *self.state.lock()
    }

    /// Move to `to` unless already terminal
    fn transition(&self, to: StreamState) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return false;
        }
        *state = to;
        true
    }

    fn transition_from(&self, from: StreamState, to: StreamState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    fn position(&self) -> f64 {
        f64::from_bits(self.position_bits.load(Ordering::Acquire))
    }

    fn set_position(&self, seconds: f64) {
        self.position_bits.store(seconds.to_bits(), Ordering::Release);
    }

    fn duration(&self) -> Option<f64> {
        match self.duration_bits.load(Ordering::Acquire) {
            UNKNOWN => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    fn set_duration(&self, duration: Option<f64>) {
        let bits = duration.map_or(UNKNOWN, f64::to_bits);
        self.duration_bits.store(bits, Ordering::Release);
    }

    fn release_pending(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Output completion path: recycle, record progress, wake the worker
///
/// One provider per seek epoch; buffers submitted before a seek come back
/// through the old provider and no longer move the position.
struct PlayerBufferProvider {
    pool: Arc<BufferPool>,
    shared: Arc<PlayerShared>,
    queue: Arc<MessageQueue<PlayerMessage>>,
    epoch: u64,
}

impl BufferProvider for PlayerBufferProvider {
    fn on_buffer_processed(&self, buffer: Buffer) {
        let position = buffer.position() + buffer.duration();
        self.pool.release(buffer);
        self.shared.release_pending();
        let current = self.shared.epoch.load(Ordering::Acquire) == self.epoch;
        if current && self.shared.seek_target.lock().is_none() {
            self.shared.set_position(position);
        }
        self.queue.post(PlayerMessage::BufferProcessed {
            position,
            epoch: self.epoch,
        });
    }
}

/// State owned by the worker thread
struct PlayerThread {
    id: PlayerId,
    uri: String,
    stream: Stream,
    output: Arc<dyn Output>,
    shared: Arc<PlayerShared>,
    listener: Arc<dyn PlayerListener>,
    gain: f32,
    options: PlayerOptions,
    started: bool,
    almost_done: bool,
    pending_seek: Option<f64>,
}

impl PlayerThread {
    fn run(mut self, queue: Arc<MessageQueue<PlayerMessage>>) {
        if let Err(e) = self.stream.open(&self.uri) {
            self.fail(&e.to_string());
            return;
        }
        self.shared.set_duration(self.stream.duration());
        debug!(
            "Player {} prepared {} (duration {:?})",
            self.id,
            self.uri,
            self.stream.duration()
        );
        self.listener.on_player_prepared(self.id);

        loop {
            match queue.recv() {
                None => return,
                Some(PlayerMessage::Play) => break,
                Some(PlayerMessage::Seek(target)) => self.pending_seek = Some(target),
                Some(PlayerMessage::BufferProcessed { .. }) => {}
            }
        }

        self.play_loop(&queue);
        debug!("Player {} thread exiting ({})", self.id, self.shared.state());
    }

    fn provider(&self, queue: &Arc<MessageQueue<PlayerMessage>>) -> Arc<dyn BufferProvider> {
        Arc::new(PlayerBufferProvider {
            pool: self.stream.pool(),
            shared: Arc::clone(&self.shared),
            queue: Arc::clone(queue),
            epoch: self.shared.epoch.load(Ordering::Acquire),
        })
    }

    fn play_loop(&mut self, queue: &Arc<MessageQueue<PlayerMessage>>) {
        let mut provider = self.provider(queue);
        let mut held: Option<Buffer> = None;
        let mut end_of_stream = false;

        loop {
            while let Some(message) = queue.try_recv() {
                self.handle(message);
            }
            if queue.is_closed() {
                return;
            }

            if let Some(target) = self.pending_seek.take() {
                if let Some(buffer) = held.take() {
                    self.stream.on_buffer_processed(buffer);
                }
                self.seek(target);
                provider = self.provider(queue);
                end_of_stream = false;
                continue;
            }

            if held.is_none() && !end_of_stream {
                match self.stream.next_buffer() {
                    Ok(Some(mut buffer)) => {
                        if self.gain != 1.0 {
                            buffer.apply_gain(self.gain);
                        }
                        held = Some(buffer);
                    }
                    Ok(None) => {
                        end_of_stream = true;
                        debug!("Player {} reached end of {}", self.id, self.uri);
                        self.listener.on_player_end_of_stream(self.id);
                        self.fire_almost_done();
                    }
                    Err(e) => {
                        self.fail(&e.to_string());
                        return;
                    }
                }
            }

            if let Some(buffer) = held.take() {
                self.shared.pending.fetch_add(1, Ordering::AcqRel);
                match self.output.play_buffer(buffer, Arc::clone(&provider)) {
                    Ok(()) => {}
                    Err(PlayError::Full(buffer)) => {
                        self.shared.release_pending();
                        held = Some(buffer);
                        self.wait(queue, Some(self.options.output_retry));
                    }
                    Err(PlayError::Failed { buffer, reason }) => {
                        self.shared.release_pending();
                        self.stream.on_buffer_processed(buffer);
                        error!("Player {} output failed: {}", self.id, reason);
                        if self.shared.transition(StreamState::Error) {
                            self.listener.on_output_failed(self.id, &reason);
                        }
                        return;
                    }
                }
                continue;
            }

            if end_of_stream {
                if self.shared.pending.load(Ordering::Acquire) == 0 {
                    if self.shared.transition(StreamState::Finished) {
                        info!("Player {} finished {}", self.id, self.uri);
                        self.listener.on_player_finished(self.id);
                    }
                    return;
                }
                self.wait(queue, None);
            }
        }
    }

    fn wait(&mut self, queue: &MessageQueue<PlayerMessage>, timeout: Option<Duration>) {
        let received = match timeout {
            Some(timeout) => queue.recv_timeout(timeout),
            None => match queue.recv() {
                Some(message) => Received::Message(message),
                None => Received::Closed,
            },
        };
        if let Received::Message(message) = received {
            self.handle(message);
        }
    }

    fn handle(&mut self, message: PlayerMessage) {
        match message {
            PlayerMessage::Play => {}
            PlayerMessage::Seek(target) => self.pending_seek = Some(target),
            PlayerMessage::BufferProcessed { position, epoch } => {
                if epoch == self.shared.epoch.load(Ordering::Acquire) {
                    self.on_buffer_consumed(position);
                }
            }
        }
    }

    fn on_buffer_consumed(&mut self, position: f64) {
        if !self.started {
            self.started = true;
            debug!("Player {} started {}", self.id, self.uri);
            self.listener.on_player_started(self.id);
        }
        if let Some(duration) = self.stream.duration() {
            if position >= duration - self.options.almost_done_seconds {
                self.fire_almost_done();
            }
            let mixing = self
                .options
                .mix_point_seconds
                .is_some_and(|lead| position >= duration - lead);
            if mixing {
                self.fire_mix_point();
            }
        }
    }

    fn fire_mix_point(&mut self) {
        if self.shared.mix_point_reached.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Player {} reached mix point of {}", self.id, self.uri);
        self.listener.on_player_mix_point(self.id);
    }

    fn fire_almost_done(&mut self) {
        if self.almost_done {
            return;
        }
        self.almost_done = true;
        if self
            .shared
            .transition_from(StreamState::Playing, StreamState::AlmostDone)
        {
            debug!("Player {} almost done with {}", self.id, self.uri);
            self.listener.on_player_almost_done(self.id);
        }
    }

    fn seek(&mut self, target: f64) {
        self.output.clear_buffers();
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);

        match self.stream.set_position(target) {
            Ok(actual) => {
                self.shared.set_position(actual);
                let rearm = self
                    .stream
                    .duration()
                    .is_some_and(|d| actual < d - self.options.almost_done_seconds);
                if rearm && self.almost_done {
                    self.almost_done = false;
                    self.shared
                        .transition_from(StreamState::AlmostDone, StreamState::Playing);
                }
                let before_mix = self.options.mix_point_seconds.is_some_and(|lead| {
                    self.stream.duration().is_some_and(|d| actual < d - lead)
                });
                if before_mix {
                    self.shared.mix_point_reached.store(false, Ordering::Release);
                }
                debug!("Player {} seeked to {:.3}s", self.id, actual);
            }
            Err(e) => warn!("Player {} seek to {:.3}s failed: {}", self.id, target, e),
        }
        *self.shared.seek_target.lock() = None;
    }

    fn fail(&mut self, message: &str) {
        if self.shared.transition(StreamState::Error) {
            error!("Player {} error on {}: {}", self.id, self.uri, message);
            self.listener.on_player_error(self.id, message);
        }
    }
}

/// One track bound to one output
pub struct Player {
    id: PlayerId,
    uri: String,
    output: Arc<dyn Output>,
    shared: Arc<PlayerShared>,
    pool: Arc<BufferPool>,
    worker: Worker<PlayerMessage>,
}

impl Player {
    /// Create a player in `Scheduled` state and start opening its stream
    ///
    /// Output stays untouched until [`play`](Self::play).
    pub fn spawn(
        context: &EngineContext,
        uri: &str,
        gain: Gain,
        output: Arc<dyn Output>,
        listener: Arc<dyn PlayerListener>,
    ) -> Result<Self> {
        let id = PlayerId::new();
        let options = PlayerOptions::from(context.config());
        let stream = Stream::new(options.stream, context.decoders(), context.dsps());
        let pool = stream.pool();
        let shared = Arc::new(PlayerShared::new());

        let runner = PlayerThread {
            id,
            uri: uri.to_string(),
            stream,
            output: Arc::clone(&output),
            shared: Arc::clone(&shared),
            listener,
            gain: gain.factor(),
            options,
            started: false,
            almost_done: false,
            pending_seek: None,
        };

        let worker = Worker::spawn(format!("segue-player-{}", id.short()), move |queue| {
            runner.run(queue)
        })?;

        debug!("Player {} scheduled for {}", id, uri);

        Ok(Self {
            id,
            uri: uri.to_string(),
            output,
            shared,
            pool,
            worker,
        })
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    pub fn output(&self) -> &Arc<dyn Output> {
        &self.output
    }

    /// Scheduled -> Playing; returns false in any other state
    pub fn play(&self) -> bool {
        if self
            .shared
            .transition_from(StreamState::Scheduled, StreamState::Playing)
        {
            self.worker.post(PlayerMessage::Play);
            true
        } else {
            false
        }
    }

    /// Cancel playback without waiting for the worker thread
    ///
    /// Returns true if this call moved the player to `Stopped`.
    pub fn stop(&self) -> bool {
        let stopped = self.shared.transition(StreamState::Stopped);
        if stopped {
            debug!("Player {} stopped", self.id);
        }
        self.worker.queue().close();
        stopped
    }

    /// Request a seek; [`position`](Self::position) reports the target until it lands
    pub fn set_position(&self, seconds: f64) {
        let mut target = seconds.max(0.0);
        if let Some(duration) = self.shared.duration() {
            target = target.min(duration);
        }
        *self.shared.seek_target.lock() = Some(target);
        self.worker.post(PlayerMessage::Seek(target));
    }

    /// Playback position in seconds
    pub fn position(&self) -> f64 {
        if let Some(target) = *self.shared.seek_target.lock() {
            return target;
        }
        (self.shared.position() - self.output.latency()).max(0.0)
    }

    pub fn duration(&self) -> Option<f64> {
        self.shared.duration()
    }

    /// Playback has crossed `duration - crossfade` since the last seek
    pub fn at_mix_point(&self) -> bool {
        self.shared.mix_point_reached.load(Ordering::Acquire)
    }

    pub fn set_volume(&self, volume: f64) {
        self.output.set_volume(volume);
    }

    pub fn volume(&self) -> f64 {
        self.output.volume()
    }

    /// Buffers handed to the output and not yet returned
    pub fn pending_buffers(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stop and wait for the worker thread to exit
    pub fn join(mut self) {
        self.stop();
        self.worker.shutdown();
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.worker.queue().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_factor() {
        assert_eq!(Gain::default().factor(), 1.0);
        assert_eq!(Gain::new(0.5).factor(), 0.5);

        let limited = Gain {
            preamp: 2.0,
            gain: 1.0,
            peak: 1.2,
            peak_valid: true,
        };
        assert_eq!(limited.factor(), 1.2);

        let unlimited = Gain {
            peak_valid: false,
            ..limited
        };
        assert_eq!(unlimited.factor(), 2.0);
    }

    #[test]
    fn test_player_id_short_form() {
        let id = PlayerId::new();
        assert_eq!(id.short().len(), 8);
        assert_ne!(id, PlayerId::new());
        assert_eq!(format!("{}", id), id.short());
    }

    #[test]
    fn test_shared_state_transitions() {
        let shared = PlayerShared::new();
        assert!(shared.transition_from(StreamState::Scheduled, StreamState::Playing));
        assert!(!shared.transition_from(StreamState::Scheduled, StreamState::Playing));
        assert!(shared.transition(StreamState::Stopped));
        assert!(!shared.transition(StreamState::Finished));
        assert_eq!(shared.state(), StreamState::Stopped);
    }

    #[test]
    fn test_pending_never_underflows() {
        let shared = PlayerShared::new();
        shared.release_pending();
        assert_eq!(shared.pending.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_stale_provider_leaves_position_alone() {
        let shared = Arc::new(PlayerShared::new());
        let queue = Arc::new(MessageQueue::new());
        let pool = Arc::new(BufferPool::new());
        let stale = PlayerBufferProvider {
            pool: Arc::clone(&pool),
            shared: Arc::clone(&shared),
            queue: Arc::clone(&queue),
            epoch: 0,
        };

        // Seek landed at 6.0 while a pre-seek buffer was still in the output
        shared.epoch.fetch_add(1, Ordering::AcqRel);
        shared.set_position(6.0);
        shared.pending.store(1, Ordering::Release);

        let mut buffer = Buffer::pooled(16, 8000, 2);
        buffer.set_len(16).unwrap();
        buffer.set_position(1.0);
        stale.on_buffer_processed(buffer);

        assert_eq!(shared.position(), 6.0);
        assert_eq!(shared.pending.load(Ordering::Acquire), 0);
        assert!(matches!(
            queue.try_recv(),
            Some(PlayerMessage::BufferProcessed { epoch: 0, .. })
        ));

        let current = PlayerBufferProvider {
            pool,
            shared: Arc::clone(&shared),
            queue,
            epoch: 1,
        };
        let mut buffer = Buffer::pooled(16, 8000, 2);
        buffer.set_len(16).unwrap();
        buffer.set_position(6.0);
        current.on_buffer_processed(buffer);
        assert!((shared.position() - 6.001).abs() < 1e-9);
    }

    #[test]
    fn test_almost_done_leads_mix_point() {
        let config = segue_common::EngineConfig {
            crossfade_ms: 3000,
            almost_done_seconds: 1.0,
            ..Default::default()
        };
        let options = PlayerOptions::from(&config);
        assert_eq!(options.mix_point_seconds, Some(3.0));
        assert_eq!(options.almost_done_seconds, 3.0);

        let config = segue_common::EngineConfig {
            crossfade_ms: 0,
            almost_done_seconds: 1.0,
            ..Default::default()
        };
        let options = PlayerOptions::from(&config);
        assert_eq!(options.mix_point_seconds, None);
        assert_eq!(options.almost_done_seconds, 1.0);
    }

    #[test]
    fn test_duration_round_trip() {
        let shared = PlayerShared::new();
        assert_eq!(shared.duration(), None);
        shared.set_duration(Some(3.5));
        assert_eq!(shared.duration(), Some(3.5));
    }
}
