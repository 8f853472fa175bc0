//! # Segue playback engine
//!
//! Turns a sequence of track uris into continuous audio with gapless or
//! crossfaded transitions.
//!
//! **Pipeline:** decoder → [`Packetizer`](audio::Packetizer) → DSP chain →
//! pooled [`Buffer`](audio::Buffer)s → [`Output`](audio::Output), one
//! [`Player`] thread per track, sequenced by the [`Transport`].
//!
//! Applications build an [`EngineContext`] once and pass it to
//! [`Transport::new`]; there is no global state.

pub mod audio;
pub mod context;
pub mod error;
pub mod playback;

pub use context::EngineContext;
pub use error::{Error, Result};
pub use playback::{Gain, Player, PlayerId, StartMode, Transport};
pub use segue_common::{EngineConfig, PlaybackState, StreamState, TransportEvent};
