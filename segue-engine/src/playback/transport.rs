//! Transport: the top-level playback state machine
//!
//! Owns the active players, the prepared next player, the crossfader and the
//! master volume. Player and crossfader notifications arrive on their own
//! threads and are forwarded to the transport's dispatcher thread, which
//! applies them under the transport lock.
//!
//! All state lives behind one reentrant lock. Events are raised while that
//! lock is held but after the state borrow is released, so a listener may
//! call straight back into the transport (for example to prepare the next
//! track from an `AlmostDone` event).
//!
//! # Hand-off
//!
//! - **Gapless**: the next player shares the current output and is started
//!   when the current stream reaches its end, so its first buffer queues
//!   directly behind the last one.
//! - **Crossfade**: the next player gets its own output and both play while
//!   the crossfader ramps them. The fade starts at the current player's mix
//!   point (`duration - crossfade`) and the outgoing player is retired when
//!   its fade-out completes.

use crate::audio::Output;
use crate::context::EngineContext;
use crate::error::Result;
use crate::playback::crossfader::{Crossfader, CrossfaderListener, FadeDirection};
use crate::playback::events::{EventBus, Subscription};
use crate::playback::player::{Gain, Player, PlayerId, PlayerListener};
use crate::playback::volume::MasterVolume;
use crate::playback::worker::{MessageQueue, Worker};
use parking_lot::{Mutex, ReentrantMutex};
use segue_common::{PlaybackState, StreamState, TransportEvent};
use std::cell::RefCell;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// How [`Transport::start`] treats current playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Stop current playback and start at once
    #[default]
    Immediate,
    /// Stop current playback and hold the new track paused until `resume`
    Wait,
    /// Overlap with current playback when crossfading is enabled
    Crossfade,
}

enum TransportMessage {
    Started(PlayerId),
    AlmostDone(PlayerId),
    MixPoint(PlayerId),
    EndOfStream(PlayerId),
    Finished(PlayerId),
    Error(PlayerId, String),
    OutputFailed(PlayerId, String),
    FadeOutComplete(PlayerId),
    FadesEmptied,
    Retire(Vec<Player>),
}

/// Forwards player and crossfader callbacks to the dispatcher
struct TransportLink {
    queue: Arc<MessageQueue<TransportMessage>>,
}

impl PlayerListener for TransportLink {
    fn on_player_started(&self, player: PlayerId) {
        self.queue.post(TransportMessage::Started(player));
    }

    fn on_player_almost_done(&self, player: PlayerId) {
        self.queue.post(TransportMessage::AlmostDone(player));
    }

    fn on_player_mix_point(&self, player: PlayerId) {
        self.queue.post(TransportMessage::MixPoint(player));
    }

    fn on_player_end_of_stream(&self, player: PlayerId) {
        self.queue.post(TransportMessage::EndOfStream(player));
    }

    fn on_player_finished(&self, player: PlayerId) {
        self.queue.post(TransportMessage::Finished(player));
    }

    fn on_player_error(&self, player: PlayerId, message: &str) {
        self.queue
            .post(TransportMessage::Error(player, message.to_string()));
    }

    fn on_output_failed(&self, player: PlayerId, reason: &str) {
        self.queue
            .post(TransportMessage::OutputFailed(player, reason.to_string()));
    }
}

impl CrossfaderListener for TransportLink {
    fn on_fade_out_complete(&self, player: PlayerId) {
        self.queue.post(TransportMessage::FadeOutComplete(player));
    }

    fn on_crossfader_emptied(&self) {
        self.queue.post(TransportMessage::FadesEmptied);
    }
}

struct Track {
    player: Player,
    /// Has its own output and may be crossfaded in
    crossfade: bool,
    end_of_stream: bool,
}

impl Track {
    fn id(&self) -> PlayerId {
        self.player.id()
    }

    fn output(&self) -> Arc<dyn Output> {
        Arc::clone(self.player.output())
    }
}

#[derive(Default)]
struct TransportState {
    /// Players feeding audio; the last one is dominant
    active: Vec<Track>,
    /// Gapless predecessors draining their final buffers
    finishing: Vec<Track>,
    next: Option<Track>,
    playback: PlaybackState,
}

impl TransportState {
    fn dominant(&self) -> Option<&Track> {
        self.active.last()
    }

    fn take_active(&mut self, id: PlayerId) -> Option<Track> {
        let index = self.active.iter().position(|t| t.id() == id)?;
        Some(self.active.remove(index))
    }

    fn take_finishing(&mut self, id: PlayerId) -> Option<Track> {
        let index = self.finishing.iter().position(|t| t.id() == id)?;
        Some(self.finishing.remove(index))
    }

    fn take_next(&mut self, id: PlayerId) -> Option<Track> {
        if self.next.as_ref().is_some_and(|t| t.id() == id) {
            self.next.take()
        } else {
            None
        }
    }

    fn take_any(&mut self, id: PlayerId) -> Option<Track> {
        self.take_active(id)
            .or_else(|| self.take_finishing(id))
            .or_else(|| self.take_next(id))
    }

    fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.active
            .iter()
            .chain(self.finishing.iter())
            .chain(self.next.iter())
    }

    /// Some remaining track plays through `output`
    fn output_in_use(&self, output: &Arc<dyn Output>) -> bool {
        self.tracks().any(|t| Arc::ptr_eq(t.player.output(), output))
    }
}

struct TransportInner {
    context: EngineContext,
    state: ReentrantMutex<RefCell<TransportState>>,
    master: Arc<MasterVolume>,
    crossfader: Crossfader,
    bus: EventBus,
    link: Arc<TransportLink>,
    queue: Arc<MessageQueue<TransportMessage>>,
    dispatcher: Mutex<Option<Worker<TransportMessage>>>,
}

/// Gapless/crossfading playback over a sequence of tracks
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    pub fn new(context: EngineContext) -> Result<Self> {
        let queue = Arc::new(MessageQueue::new());
        let link = Arc::new(TransportLink {
            queue: Arc::clone(&queue),
        });
        let master = Arc::new(MasterVolume::default());
        let config = context.config();
        let crossfader = Crossfader::new(
            Arc::clone(&link) as Arc<dyn CrossfaderListener>,
            Arc::clone(&master),
            config.crossfade_tick(),
            config.fade_curve,
        )?;

        let inner = Arc::new(TransportInner {
            context,
            state: ReentrantMutex::new(RefCell::new(TransportState::default())),
            master,
            crossfader,
            bus: EventBus::new(),
            link,
            queue: Arc::clone(&queue),
            dispatcher: Mutex::new(None),
        });

        let weak: Weak<TransportInner> = Arc::downgrade(&inner);
        let worker = Worker::spawn_with_queue("segue-transport", queue, move |queue| {
            while let Some(message) = queue.recv() {
                match weak.upgrade() {
                    Some(inner) => inner.dispatch(message),
                    None => drop(message),
                }
            }
        })?;
        *inner.dispatcher.lock() = Some(worker);

        info!(
            "Transport ready (crossfade {} ms, output {})",
            inner.context.config().crossfade_ms,
            inner.context.output_factory().name()
        );
        Ok(Self { inner })
    }

    pub fn context(&self) -> &EngineContext {
        &self.inner.context
    }

    /// Play `uri`, stopping current playback unless `mode` overlaps it
    pub fn start(&self, uri: &str, gain: Gain, mode: StartMode) -> Result<()> {
        self.inner.start(uri, gain, mode)
    }

    /// Open `uri` as the next track without touching current playback
    pub fn prepare_next_track(&self, uri: &str, gain: Gain) -> Result<()> {
        self.inner.prepare_next_track(uri, gain)
    }

    pub fn stop(&self) {
        self.inner.with_state(|state, events| {
            let tracks = self.inner.drain_tracks(state);
            self.inner.stop_tracks(state, tracks, events);
            self.inner.set_playback(state, PlaybackState::Stopped, events);
        });
    }

    pub fn pause(&self) {
        self.inner.pause();
    }

    pub fn resume(&self) {
        self.inner.resume();
    }

    /// Position of the dominant player in seconds
    pub fn position(&self) -> f64 {
        self.inner
            .read(|state| state.dominant().map_or(0.0, |t| t.player.position()))
    }

    /// Seek the dominant player, collapsing any crossfade onto it
    pub fn set_position(&self, seconds: f64) {
        self.inner.set_position(seconds);
    }

    pub fn duration(&self) -> Option<f64> {
        self.inner
            .read(|state| state.dominant().and_then(|t| t.player.duration()))
    }

    pub fn volume(&self) -> f64 {
        self.inner.master.volume()
    }

    /// Set the master volume (clamped to 0..=1); also unmutes
    pub fn set_volume(&self, volume: f64) {
        self.inner.with_state(|state, events| {
            let volume_changed = self.inner.master.set_volume(volume);
            let mute_changed = self.inner.master.set_muted(false);
            if volume_changed || mute_changed {
                self.inner.apply_volume(state);
                events.push(TransportEvent::volume_changed());
            }
        });
    }

    pub fn is_muted(&self) -> bool {
        self.inner.master.is_muted()
    }

    pub fn set_muted(&self, muted: bool) {
        self.inner.with_state(|state, events| {
            if self.inner.master.set_muted(muted) {
                self.inner.apply_volume(state);
                events.push(TransportEvent::volume_changed());
            }
        });
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.inner.read(|state| state.playback)
    }

    /// State of the dominant player, `Stopped` when there is none
    pub fn stream_state(&self) -> StreamState {
        self.inner.read(|state| {
            state
                .dominant()
                .map_or(StreamState::Stopped, |t| t.player.state())
        })
    }

    pub fn uri(&self) -> Option<String> {
        self.inner
            .read(|state| state.dominant().map(|t| t.player.uri().to_string()))
    }

    /// Players currently feeding audio, two during a crossfade
    pub fn active_count(&self) -> usize {
        self.inner.read(|state| state.active.len())
    }

    pub fn has_next(&self) -> bool {
        self.inner.read(|state| state.next.is_some())
    }

    /// Register a synchronous event listener
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(listener)
    }

    pub fn event_receiver(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.bus.receiver()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl TransportInner {
    /// Run `f` under the lock, then raise the events it produced
    fn with_state<R>(
        &self,
        f: impl FnOnce(&mut TransportState, &mut Vec<TransportEvent>) -> R,
    ) -> R {
        let guard = self.state.lock();
        let mut events = Vec::new();
        let result = {
            let mut state = guard.borrow_mut();
            f(&mut state, &mut events)
        };
        for event in events {
            self.bus.emit(event);
        }
        result
    }

    fn read<R>(&self, f: impl FnOnce(&TransportState) -> R) -> R {
        let guard = self.state.lock();
        let state = guard.borrow();
        f(&state)
    }

    fn crossfade_ms(&self) -> u64 {
        self.context.config().crossfade_ms
    }

    /// Crossfading out of `track` is allowed if it outlasts two fades
    fn can_crossfade_from(&self, track: Option<&Track>) -> bool {
        if !self.context.config().crossfade_enabled() {
            return false;
        }
        let fade_seconds = self.crossfade_ms() as f64 / 1000.0;
        track
            .and_then(|t| t.player.duration())
            .is_some_and(|d| d > 2.0 * fade_seconds)
    }

    fn create_track(
        &self,
        uri: &str,
        gain: Gain,
        output: Arc<dyn Output>,
        crossfade: bool,
    ) -> Result<Track> {
        let listener = Arc::clone(&self.link) as Arc<dyn PlayerListener>;
        let player = Player::spawn(&self.context, uri, gain, output, listener)?;
        Ok(Track {
            player,
            crossfade,
            end_of_stream: false,
        })
    }

    fn new_output(&self) -> Result<Arc<dyn Output>> {
        self.context.output_factory().create()
    }

    fn set_playback(
        &self,
        state: &mut TransportState,
        playback: PlaybackState,
        events: &mut Vec<TransportEvent>,
    ) {
        if state.playback != playback {
            info!("Playback {} -> {}", state.playback, playback);
            state.playback = playback;
            events.push(TransportEvent::playback(playback));
        }
    }

    fn apply_volume(&self, state: &TransportState) {
        let volume = self.master.effective();
        for track in state.tracks() {
            if !self.crossfader.contains(track.id()) {
                track.player.set_volume(volume);
            }
        }
    }

    fn drain_tracks(&self, state: &mut TransportState) -> Vec<Track> {
        let mut tracks: Vec<Track> = state.active.drain(..).collect();
        tracks.append(&mut state.finishing);
        tracks.extend(state.next.take());
        tracks
    }

    /// Cancel and hand off to the dispatcher for joining
    ///
    /// `tracks` must already be out of `state`. Outputs still used by a track
    /// left in `state` keep their queued audio.
    fn stop_tracks(
        &self,
        state: &TransportState,
        tracks: Vec<Track>,
        events: &mut Vec<TransportEvent>,
    ) {
        if tracks.is_empty() {
            return;
        }
        for track in &tracks {
            self.crossfader.cancel_player(track.id());
            if track.player.stop() {
                events.push(TransportEvent::stream(
                    StreamState::Stopped,
                    track.player.uri(),
                ));
            }
            if !state.output_in_use(track.player.output()) {
                track.player.output().clear_buffers();
            }
        }
        self.retire(tracks.into_iter().map(|t| t.player).collect());
    }

    fn retire(&self, players: Vec<Player>) {
        if !players.is_empty() {
            self.queue.post(TransportMessage::Retire(players));
        }
    }

    /// Start the prepared next track and make it dominant
    fn promote(&self, state: &mut TransportState, events: &mut Vec<TransportEvent>) -> bool {
        let Some(track) = state.next.take() else {
            return false;
        };
        if !self.crossfader.contains(track.id()) {
            track.player.set_volume(self.master.effective());
        }
        if state.playback == PlaybackState::Paused {
            track.player.output().pause();
        }
        if track.player.play() {
            debug!("Promoted player {} for {}", track.id(), track.player.uri());
            events.push(TransportEvent::stream(
                StreamState::Playing,
                track.player.uri(),
            ));
        }
        state.active.push(track);
        true
    }

    /// Gapless cut-over once the dominant stream has ended
    fn gapless_handoff(&self, state: &mut TransportState, events: &mut Vec<TransportEvent>) {
        let ended = state.dominant().is_some_and(|t| t.end_of_stream);
        if !ended || state.next.is_none() {
            return;
        }
        if let Some(outgoing) = state.active.pop() {
            debug!("Gapless hand-off from player {}", outgoing.id());
            state.finishing.push(outgoing);
        }
        self.promote(state, events);
    }

    /// Start a crossfade if the dominant player passed its mix point and the
    /// next track has its own output
    ///
    /// A next track prepared late fades over whatever is left of the current one.
    fn maybe_crossfade(&self, state: &mut TransportState, events: &mut Vec<TransportEvent>) {
        let Some(dominant) = state.dominant() else {
            return;
        };
        if !dominant.player.at_mix_point()
            || dominant.end_of_stream
            || self.crossfader.contains(dominant.id())
        {
            return;
        }
        let Some(next) = state.next.as_ref().filter(|t| t.crossfade) else {
            return;
        };

        let remaining_ms = dominant
            .player
            .duration()
            .map(|d| ((d - dominant.player.position()).max(0.0) * 1000.0) as u64);
        let duration_ms = remaining_ms.map_or(self.crossfade_ms(), |r| r.min(self.crossfade_ms()));
        info!(
            "Crossfading {} -> {} over {} ms",
            dominant.player.uri(),
            next.player.uri(),
            duration_ms
        );
        self.crossfader
            .fade(dominant.id(), dominant.output(), FadeDirection::FadeOut, duration_ms);
        self.crossfader
            .fade(next.id(), next.output(), FadeDirection::FadeIn, duration_ms);
        self.promote(state, events);
    }

    /// Fall back to the next track or stop once nothing is active
    fn settle(&self, state: &mut TransportState, events: &mut Vec<TransportEvent>) {
        if !state.active.is_empty() {
            return;
        }
        if state.playback == PlaybackState::Playing && self.promote(state, events) {
            return;
        }
        if state.finishing.is_empty() {
            self.set_playback(state, PlaybackState::Stopped, events);
        }
    }

    fn start(&self, uri: &str, gain: Gain, mode: StartMode) -> Result<()> {
        self.with_state(|state, events| {
            let overlap = mode == StartMode::Crossfade
                && self.context.config().crossfade_enabled()
                && !state.active.is_empty();

            let reusable = state.next.as_ref().is_some_and(|t| {
                t.player.uri() == uri
                    && t.player.state() == StreamState::Scheduled
                    && (!overlap || t.crossfade)
            });
            let reused = if reusable { state.next.take() } else { None };

            let stale: Vec<Track> = if overlap {
                state.finishing.drain(..).chain(state.next.take()).collect()
            } else {
                self.drain_tracks(state)
            };
            self.stop_tracks(state, stale, events);

            let track = match reused {
                Some(track) => track,
                None => {
                    let output = self.new_output()?;
                    self.create_track(uri, gain, output, overlap)?
                }
            };

            if overlap {
                let duration_ms = self.crossfade_ms();
                for outgoing in &state.active {
                    self.crossfader.cancel(outgoing.id(), FadeDirection::FadeIn);
                    self.crossfader.fade(
                        outgoing.id(),
                        outgoing.output(),
                        FadeDirection::FadeOut,
                        duration_ms,
                    );
                }
                self.crossfader
                    .fade(track.id(), track.output(), FadeDirection::FadeIn, duration_ms);
            } else {
                track.player.set_volume(self.master.effective());
            }

            info!("Starting {} ({:?})", uri, mode);
            if mode == StartMode::Wait {
                events.push(TransportEvent::stream(StreamState::Scheduled, uri));
                state.active.push(track);
                self.set_playback(state, PlaybackState::Paused, events);
            } else {
                if track.player.play() {
                    events.push(TransportEvent::stream(StreamState::Playing, uri));
                }
                state.active.push(track);
                self.crossfader.resume();
                self.set_playback(state, PlaybackState::Playing, events);
            }
            Ok(())
        })
    }

    fn prepare_next_track(&self, uri: &str, gain: Gain) -> Result<()> {
        self.with_state(|state, events| {
            if let Some(existing) = state.next.as_ref() {
                if existing.player.uri() == uri {
                    debug!("{} already prepared", uri);
                    return Ok(());
                }
                let stale: Vec<Track> = state.next.take().into_iter().collect();
                self.stop_tracks(state, stale, events);
            }

            let crossfade = self.can_crossfade_from(state.dominant());
            let output = match state.dominant() {
                Some(dominant) if !crossfade => dominant.output(),
                _ => self.new_output()?,
            };
            let track = self.create_track(uri, gain, output, crossfade)?;
            debug!(
                "Prepared {} as next track ({})",
                uri,
                if crossfade { "crossfade" } else { "gapless" }
            );
            events.push(TransportEvent::stream(StreamState::Scheduled, uri));
            state.next = Some(track);

            self.maybe_crossfade(state, events);
            self.gapless_handoff(state, events);
            self.settle(state, events);
            Ok(())
        })
    }

    fn pause(&self) {
        self.with_state(|state, events| {
            if state.playback != PlaybackState::Playing {
                return;
            }
            for track in state.active.iter().chain(state.finishing.iter()) {
                track.player.output().pause();
            }
            self.crossfader.pause();
            self.set_playback(state, PlaybackState::Paused, events);
        });
    }

    fn resume(&self) {
        self.with_state(|state, events| {
            if state.playback != PlaybackState::Paused {
                return;
            }
            for track in state.active.iter().chain(state.finishing.iter()) {
                track.player.output().resume();
                if track.player.play() {
                    events.push(TransportEvent::stream(
                        StreamState::Playing,
                        track.player.uri(),
                    ));
                }
            }
            self.crossfader.resume();
            self.set_playback(state, PlaybackState::Playing, events);
            self.settle(state, events);
        });
    }

    fn set_position(&self, seconds: f64) {
        self.with_state(|state, events| {
            let Some(dominant_id) = state.dominant().map(Track::id) else {
                return;
            };
            let outgoing = state.active.len() - 1;
            let mut others: Vec<Track> = state.active.drain(..outgoing).collect();
            others.append(&mut state.finishing);
            if !others.is_empty() {
                debug!("Collapsing transition onto player {}", dominant_id);
            }
            self.stop_tracks(state, others, events);

            self.crossfader.cancel_player(dominant_id);
            if let Some(dominant) = state.dominant() {
                dominant.player.set_volume(self.master.effective());
                dominant.player.set_position(seconds);
                events.push(TransportEvent::time_changed(dominant.player.position()));
            }
        });
    }

    fn dispatch(&self, message: TransportMessage) {
        match message {
            TransportMessage::Started(id) => debug!("Player {} started", id),
            TransportMessage::AlmostDone(id) => {
                self.with_state(|state, events| {
                    if let Some(track) = state.active.iter().find(|t| t.id() == id) {
                        events.push(TransportEvent::stream(
                            StreamState::AlmostDone,
                            track.player.uri(),
                        ));
                    }
                });
                self.with_state(|state, events| self.maybe_crossfade(state, events));
            }
            TransportMessage::MixPoint(id) => {
                self.with_state(|state, events| {
                    if state.dominant().is_some_and(|t| t.id() == id) {
                        self.maybe_crossfade(state, events);
                    }
                });
            }
            TransportMessage::EndOfStream(id) => {
                self.with_state(|state, events| {
                    let Some(track) = state.active.iter_mut().find(|t| t.id() == id) else {
                        return;
                    };
                    track.end_of_stream = true;
                    if state.dominant().is_some_and(|t| t.id() == id) {
                        self.gapless_handoff(state, events);
                    }
                });
            }
            TransportMessage::Finished(id) | TransportMessage::FadeOutComplete(id) => {
                self.with_state(|state, events| {
                    let Some(track) = state
                        .take_finishing(id)
                        .or_else(|| state.take_active(id))
                    else {
                        return;
                    };
                    self.crossfader.cancel_player(id);
                    track.player.stop();
                    if !state.output_in_use(track.player.output()) {
                        track.player.output().clear_buffers();
                    }
                    info!("Finished {}", track.player.uri());
                    events.push(TransportEvent::stream(
                        StreamState::Finished,
                        track.player.uri(),
                    ));
                    self.retire(vec![track.player]);
                    self.settle(state, events);
                });
            }
            TransportMessage::Error(id, message) => {
                self.with_state(|state, events| {
                    let Some(track) = state.take_any(id) else {
                        return;
                    };
                    warn!("Removing {} after error: {}", track.player.uri(), message);
                    self.crossfader.cancel_player(id);
                    events.push(TransportEvent::stream(StreamState::Error, track.player.uri()));
                    self.retire(vec![track.player]);
                    self.settle(state, events);
                });
            }
            TransportMessage::OutputFailed(id, reason) => {
                self.with_state(|state, events| {
                    error!("Output failed for player {}: {}", id, reason);
                    if let Some(track) = state.tracks().find(|t| t.id() == id) {
                        events.push(TransportEvent::stream(StreamState::Error, track.player.uri()));
                    }
                    let tracks = self.drain_tracks(state);
                    self.stop_tracks(state, tracks, events);
                    self.set_playback(state, PlaybackState::Stopped, events);
                });
            }
            TransportMessage::FadesEmptied => debug!("No fades active"),
            TransportMessage::Retire(players) => {
                for player in players {
                    let id = player.id();
                    drop(player);
                    debug!("Player {} retired", id);
                }
            }
        }
    }

    /// Stop everything and join every thread
    fn shutdown(&self) {
        let tracks = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            self.drain_tracks(&mut state)
        };
        self.crossfader.stop();
        for track in &tracks {
            track.player.stop();
            track.player.output().clear_buffers();
        }

        self.queue.close();
        if let Some(mut worker) = self.dispatcher.lock().take() {
            worker.shutdown();
        }
        let pending = self.queue.close_and_drain();
        drop(pending);
        drop(tracks);
        debug!("Transport shut down");
    }
}
