//! Background fade engine
//!
//! Ramps output volumes of fading players on a fixed tick. Ticks are
//! self-posted delayed messages on the crossfader's worker queue; each tick
//! advances every [`FadeContext`] by one and writes
//! `master × curve(ticks_counted / ticks_total)` to its output. A finished
//! fade-out is reported to the [`CrossfaderListener`] so its player can be
//! retired. Listener calls are made outside the fade lock.

use crate::audio::Output;
use crate::error::Result;
use crate::playback::player::PlayerId;
use crate::playback::volume::MasterVolume;
use crate::playback::worker::{MessageQueue, Worker};
use parking_lot::Mutex;
use segue_common::FadeCurve;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Concurrent fade contexts; registering another completes the oldest
pub const MAX_FADES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeDirection {
    FadeIn,
    FadeOut,
}

/// Fade completion notifications, called from the crossfader thread
pub trait CrossfaderListener: Send + Sync {
    fn on_fade_out_complete(&self, player: PlayerId);

    /// Last active context finished
    fn on_crossfader_emptied(&self) {}
}

/// Volume multiplier for a fade `counted` ticks into `total`
pub fn fade_level(direction: FadeDirection, counted: u32, total: u32, curve: FadeCurve) -> f64 {
    let fraction = if total == 0 {
        1.0
    } else {
        counted.min(total) as f64 / total as f64
    };
    match direction {
        FadeDirection::FadeIn => curve.fade_in(fraction),
        FadeDirection::FadeOut => curve.fade_out(fraction),
    }
}

struct FadeContext {
    player: PlayerId,
    output: Arc<dyn Output>,
    direction: FadeDirection,
    ticks_counted: u32,
    ticks_total: u32,
}

impl FadeContext {
    fn level(&self, curve: FadeCurve) -> f64 {
        fade_level(self.direction, self.ticks_counted, self.ticks_total, curve)
    }

    fn is_complete(&self) -> bool {
        self.ticks_counted >= self.ticks_total
    }
}

enum FadeMessage {
    Tick(u64),
}

#[derive(Default)]
struct FadeState {
    contexts: Vec<FadeContext>,
    paused: bool,
    /// A tick for the current generation is queued
    scheduled: bool,
    /// Invalidates queued ticks after pause/stop
    generation: u64,
}

struct FadeShared {
    state: Mutex<FadeState>,
    master: Arc<MasterVolume>,
    listener: Arc<dyn CrossfaderListener>,
    tick: Duration,
    curve: FadeCurve,
}

impl FadeShared {
    fn schedule(&self, state: &mut FadeState, queue: &MessageQueue<FadeMessage>, delay: Duration) {
        if state.paused || state.contexts.is_empty() {
            state.scheduled = false;
            return;
        }
        state.scheduled = queue.post_delayed(FadeMessage::Tick(state.generation), delay);
    }

    fn apply(&self, context: &FadeContext) {
        context
            .output
            .set_volume(self.master.effective() * context.level(self.curve));
    }

    fn on_tick(&self, generation: u64, queue: &MessageQueue<FadeMessage>) {
        let started = Instant::now();
        let mut completed = Vec::new();

        let emptied = {
            let mut state = self.state.lock();
            if state.paused || generation != state.generation {
                return;
            }
            state.scheduled = false;

            state.contexts.retain_mut(|context| {
                context.ticks_counted = (context.ticks_counted + 1).min(context.ticks_total);
                self.apply(context);
                if !context.is_complete() {
                    return true;
                }
                if context.direction == FadeDirection::FadeOut {
                    completed.push(context.player);
                }
                debug!("Fade {:?} complete for player {}", context.direction, context.player);
                false
            });

            let delay = self.tick.saturating_sub(started.elapsed());
            self.schedule(&mut state, queue, delay);
            state.contexts.is_empty()
        };

        self.notify(completed, emptied);
    }

    fn notify(&self, completed: Vec<PlayerId>, emptied: bool) {
        for player in completed {
            self.listener.on_fade_out_complete(player);
        }
        if emptied {
            self.listener.on_crossfader_emptied();
        }
    }
}

/// Fade engine shared by all transitions of one transport
pub struct Crossfader {
    shared: Arc<FadeShared>,
    worker: Worker<FadeMessage>,
}

impl Crossfader {
    pub fn new(
        listener: Arc<dyn CrossfaderListener>,
        master: Arc<MasterVolume>,
        tick: Duration,
        curve: FadeCurve,
    ) -> Result<Self> {
        let tick = tick.max(Duration::from_millis(1));
        let shared = Arc::new(FadeShared {
            state: Mutex::new(FadeState::default()),
            master,
            listener,
            tick,
            curve,
        });

        let thread_shared = Arc::clone(&shared);
        let worker = Worker::spawn("segue-crossfader", move |queue| {
            while let Some(FadeMessage::Tick(generation)) = queue.recv() {
                thread_shared.on_tick(generation, &queue);
            }
        })?;

        Ok(Self { shared, worker })
    }

    pub fn tick_interval(&self) -> Duration {
        self.shared.tick
    }

    /// Start fading `output` over `duration_ms`
    ///
    /// A fade-in starts at volume 0. An existing fade of the same player in
    /// the same direction is replaced.
    pub fn fade(
        &self,
        player: PlayerId,
        output: Arc<dyn Output>,
        direction: FadeDirection,
        duration_ms: u64,
    ) {
        let tick_ms = self.shared.tick.as_millis().max(1) as u64;
        let ticks_total = (duration_ms / tick_ms).clamp(1, u32::MAX as u64) as u32;
        let context = FadeContext {
            player,
            output,
            direction,
            ticks_counted: 0,
            ticks_total,
        };

        let mut completed = Vec::new();
        {
            let mut state = self.shared.state.lock();
            state
                .contexts
                .retain(|c| !(c.player == player && c.direction == direction));

            while state.contexts.len() >= MAX_FADES {
                let mut oldest = state.contexts.remove(0);
                warn!(
                    "Too many concurrent fades, completing fade of player {} early",
                    oldest.player
                );
                oldest.ticks_counted = oldest.ticks_total;
                self.shared.apply(&oldest);
                if oldest.direction == FadeDirection::FadeOut {
                    completed.push(oldest.player);
                }
            }

            self.shared.apply(&context);
            debug!(
                "Fade {:?} registered for player {} ({} ticks)",
                direction, player, ticks_total
            );
            state.contexts.push(context);

            if !state.scheduled {
                self.shared
                    .schedule(&mut state, self.worker.queue(), self.shared.tick);
            }
        }
        self.shared.notify(completed, false);
    }

    /// Drop the fade of `player` in `direction` without touching its volume
    pub fn cancel(&self, player: PlayerId, direction: FadeDirection) -> bool {
        let mut state = self.shared.state.lock();
        let before = state.contexts.len();
        state
            .contexts
            .retain(|c| !(c.player == player && c.direction == direction));
        state.contexts.len() != before
    }

    /// Drop every fade of `player`; returns how many were removed
    pub fn cancel_player(&self, player: PlayerId) -> usize {
        let mut state = self.shared.state.lock();
        let before = state.contexts.len();
        state.contexts.retain(|c| c.player != player);
        before - state.contexts.len()
    }

    pub fn contains(&self, player: PlayerId) -> bool {
        self.shared
            .state
            .lock()
            .contexts
            .iter()
            .any(|c| c.player == player)
    }

    pub fn active_fades(&self) -> usize {
        self.shared.state.lock().contexts.len()
    }

    /// Freeze every context at its current tick
    pub fn pause(&self) {
        let mut state = self.shared.state.lock();
        state.paused = true;
        state.scheduled = false;
        state.generation += 1;
    }

    pub fn resume(&self) {
        let mut state = self.shared.state.lock();
        if !state.paused {
            return;
        }
        state.paused = false;
        self.shared
            .schedule(&mut state, self.worker.queue(), self.shared.tick);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    /// Restart every context at tick 0
    pub fn reset(&self) {
        let mut state = self.shared.state.lock();
        for context in state.contexts.iter_mut() {
            context.ticks_counted = 0;
            self.shared.apply(context);
        }
    }

    /// Drop every context; volumes stay where they are
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        if !state.contexts.is_empty() {
            debug!("Crossfader stopped with {} active fades", state.contexts.len());
        }
        state.contexts.clear();
        state.scheduled = false;
        state.generation += 1;
    }
}

impl Drop for Crossfader {
    fn drop(&mut self) {
        self.stop();
        self.worker.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Buffer, BufferProvider, PlayError};
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct VolumeOutput(AtomicU64);

    impl Output for VolumeOutput {
        fn play_buffer(
            &self,
            buffer: Buffer,
            _provider: Arc<dyn BufferProvider>,
        ) -> std::result::Result<(), PlayError> {
            Err(PlayError::Full(buffer))
        }
        fn pause(&self) {}
        fn resume(&self) {}
        fn set_volume(&self, volume: f64) {
            self.0.store(volume.to_bits(), Ordering::SeqCst);
        }
        fn volume(&self) -> f64 {
            f64::from_bits(self.0.load(Ordering::SeqCst))
        }
        fn clear_buffers(&self) {}
        fn release_buffers(&self) {}
        fn name(&self) -> &str {
            "volume"
        }
    }

    #[derive(Default)]
    struct Completions(Mutex<Vec<PlayerId>>);

    impl CrossfaderListener for Completions {
        fn on_fade_out_complete(&self, player: PlayerId) {
            self.0.lock().push(player);
        }
    }

    fn crossfader(listener: Arc<Completions>, tick_ms: u64) -> Crossfader {
        Crossfader::new(
            listener,
            Arc::new(MasterVolume::default()),
            Duration::from_millis(tick_ms),
            FadeCurve::Linear,
        )
        .unwrap()
    }

    #[test]
    fn test_fade_level_endpoints() {
        let curve = FadeCurve::Linear;
        assert_eq!(fade_level(FadeDirection::FadeIn, 0, 10, curve), 0.0);
        assert_eq!(fade_level(FadeDirection::FadeOut, 0, 10, curve), 1.0);
        assert_eq!(fade_level(FadeDirection::FadeIn, 10, 10, curve), 1.0);
        assert_eq!(fade_level(FadeDirection::FadeOut, 10, 10, curve), 0.0);
        assert_eq!(fade_level(FadeDirection::FadeIn, 15, 10, curve), 1.0);
    }

    #[test]
    fn test_fade_in_starts_silent() {
        let fader = crossfader(Arc::new(Completions::default()), 1000);
        let output = Arc::new(VolumeOutput::default());
        output.set_volume(1.0);

        fader.fade(PlayerId::new(), output.clone(), FadeDirection::FadeIn, 5000);
        assert_eq!(output.volume(), 0.0);
        assert_eq!(fader.active_fades(), 1);
    }

    #[test]
    fn test_fade_out_completes_and_notifies() {
        let listener = Arc::new(Completions::default());
        let fader = crossfader(listener.clone(), 5);
        let output = Arc::new(VolumeOutput::default());
        let player = PlayerId::new();

        fader.fade(player, output.clone(), FadeDirection::FadeOut, 20);
        let deadline = Instant::now() + Duration::from_secs(2);
        while fader.active_fades() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(fader.active_fades(), 0);
        assert_eq!(output.volume(), 0.0);
        assert_eq!(*listener.0.lock(), vec![player]);
    }

    #[test]
    fn test_cancel_and_contains() {
        let fader = crossfader(Arc::new(Completions::default()), 1000);
        let a = PlayerId::new();
        let b = PlayerId::new();
        fader.fade(a, Arc::new(VolumeOutput::default()), FadeDirection::FadeOut, 5000);
        fader.fade(b, Arc::new(VolumeOutput::default()), FadeDirection::FadeIn, 5000);

        assert!(fader.contains(a));
        assert!(!fader.cancel(a, FadeDirection::FadeIn));
        assert!(fader.cancel(a, FadeDirection::FadeOut));
        assert!(!fader.contains(a));
        assert_eq!(fader.cancel_player(b), 1);
        assert_eq!(fader.active_fades(), 0);
    }

    #[test]
    fn test_oldest_fade_completed_when_full() {
        let listener = Arc::new(Completions::default());
        let fader = crossfader(listener.clone(), 1000);
        let first = PlayerId::new();
        let first_output = Arc::new(VolumeOutput::default());
        fader.fade(first, first_output.clone(), FadeDirection::FadeOut, 5000);
        for _ in 0..MAX_FADES {
            fader.fade(PlayerId::new(), Arc::new(VolumeOutput::default()), FadeDirection::FadeIn, 5000);
        }

        assert_eq!(fader.active_fades(), MAX_FADES);
        assert!(!fader.contains(first));
        assert_eq!(first_output.volume(), 0.0);
        assert_eq!(*listener.0.lock(), vec![first]);
    }

    #[test]
    fn test_pause_freezes_and_stop_clears() {
        let fader = crossfader(Arc::new(Completions::default()), 5);
        let output = Arc::new(VolumeOutput::default());
        fader.pause();
        fader.fade(PlayerId::new(), output.clone(), FadeDirection::FadeIn, 50);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(output.volume(), 0.0);
        assert_eq!(fader.active_fades(), 1);

        fader.stop();
        assert_eq!(fader.active_fades(), 0);
    }

    #[test]
    fn test_muted_master_writes_zero() {
        let master = Arc::new(MasterVolume::default());
        master.set_muted(true);
        let fader = Crossfader::new(
            Arc::new(Completions::default()),
            master,
            Duration::from_millis(1000),
            FadeCurve::Linear,
        )
        .unwrap();
        let output = Arc::new(VolumeOutput::default());
        fader.fade(PlayerId::new(), output.clone(), FadeDirection::FadeOut, 5000);
        assert_eq!(output.volume(), 0.0);
    }
}
