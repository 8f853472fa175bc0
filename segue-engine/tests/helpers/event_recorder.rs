//! Captures transport events for assertions

use super::wait_until;
use parking_lot::Mutex;
use segue_common::{PlaybackState, StreamState, TransportEvent};
use segue_engine::playback::Subscription;
use segue_engine::Transport;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<TransportEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every event `transport` raises while the subscription lives
    pub fn attach(&self, transport: &Transport) -> Subscription {
        let events = Arc::clone(&self.events);
        transport.subscribe(move |event| events.lock().push(event.clone()))
    }

    pub fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn stream_events(&self) -> Vec<(StreamState, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| e.as_stream().map(|(s, url)| (s, url.to_string())))
            .collect()
    }

    pub fn playback_events(&self) -> Vec<PlaybackState> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| e.as_playback())
            .collect()
    }

    pub fn count_stream(&self, state: StreamState, url: &str) -> usize {
        self.stream_events()
            .iter()
            .filter(|(s, u)| *s == state && u == url)
            .count()
    }

    pub fn count_type(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    pub fn wait_for_stream(&self, state: StreamState, url: &str, timeout: Duration) -> bool {
        wait_until(timeout, || self.count_stream(state, url) > 0)
    }

    pub fn wait_for_playback(&self, state: PlaybackState, timeout: Duration) -> bool {
        wait_until(timeout, || self.playback_events().contains(&state))
    }
}
