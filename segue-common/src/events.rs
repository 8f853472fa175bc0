//! Event types raised by the transport
//!
//! Variants are identified by name only. No numeric discriminants are part of
//! the contract, so serialized events never depend on enum ordering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a single track stream
///
/// Used both as a player's state and as the type of a `StreamEvent`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Created, stream opening or waiting to be started
    Scheduled,
    /// Feeding the output
    Playing,
    /// Remaining audio dropped below the configured threshold
    AlmostDone,
    /// Every buffer was consumed by the output
    Finished,
    /// Cancelled from outside
    Stopped,
    /// Open, decode or output failure
    Error,
}

impl StreamState {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamState::Finished | StreamState::Stopped | StreamState::Error
        )
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamState::Scheduled => write!(f, "Scheduled"),
            StreamState::Playing => write!(f, "Playing"),
            StreamState::AlmostDone => write!(f, "AlmostDone"),
            StreamState::Finished => write!(f, "Finished"),
            StreamState::Stopped => write!(f, "Stopped"),
            StreamState::Error => write!(f, "Error"),
        }
    }
}

/// Global transport state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Paused,
    Playing,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Stopped => write!(f, "Stopped"),
            PlaybackState::Paused => write!(f, "Paused"),
            PlaybackState::Playing => write!(f, "Playing"),
        }
    }
}

/// Events raised by the transport to application code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransportEvent {
    /// A track stream changed state
    StreamEvent {
        state: StreamState,
        url: String,
        timestamp: DateTime<Utc>,
    },

    /// The global playback state changed
    PlaybackEvent {
        state: PlaybackState,
        timestamp: DateTime<Utc>,
    },

    /// Volume or mute changed; re-query the transport
    VolumeChanged { timestamp: DateTime<Utc> },

    /// Position of the dominant player was moved
    TimeChanged {
        seconds: f64,
        timestamp: DateTime<Utc>,
    },
}

impl TransportEvent {
    pub fn stream(state: StreamState, url: impl Into<String>) -> Self {
        TransportEvent::StreamEvent {
            state,
            url: url.into(),
            timestamp: crate::time::now(),
        }
    }

    pub fn playback(state: PlaybackState) -> Self {
        TransportEvent::PlaybackEvent {
            state,
            timestamp: crate::time::now(),
        }
    }

    pub fn volume_changed() -> Self {
        TransportEvent::VolumeChanged {
            timestamp: crate::time::now(),
        }
    }

    pub fn time_changed(seconds: f64) -> Self {
        TransportEvent::TimeChanged {
            seconds,
            timestamp: crate::time::now(),
        }
    }

    /// Event type name, matches the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            TransportEvent::StreamEvent { .. } => "StreamEvent",
            TransportEvent::PlaybackEvent { .. } => "PlaybackEvent",
            TransportEvent::VolumeChanged { .. } => "VolumeChanged",
            TransportEvent::TimeChanged { .. } => "TimeChanged",
        }
    }

    /// `(state, url)` when this is a stream event
    pub fn as_stream(&self) -> Option<(StreamState, &str)> {
        match self {
            TransportEvent::StreamEvent { state, url, .. } => Some((*state, url.as_str())),
            _ => None,
        }
    }

    /// Playback state when this is a playback event
    pub fn as_playback(&self) -> Option<PlaybackState> {
        match self {
            TransportEvent::PlaybackEvent { state, .. } => Some(*state),
            _ => None,
        }
    }
}
