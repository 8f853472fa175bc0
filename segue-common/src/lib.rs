//! # Segue Common Library
//!
//! Shared code for the segue playback engine and its front ends:
//! - Error type
//! - Event types (StreamState, PlaybackState, TransportEvent)
//! - Engine configuration loading
//! - Fade curve definitions and calculations
//! - Time helpers

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod time;

pub use config::{EngineConfig, LoggingConfig, OutputBackend};
pub use error::{Error, Result};
pub use events::{PlaybackState, StreamState, TransportEvent};
pub use fade_curves::FadeCurve;
