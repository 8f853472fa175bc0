//! Playback pipeline
//!
//! Leaves first: the worker-task abstraction, [`Stream`] (decoder to
//! buffers), [`Player`] (one stream against one output), the
//! [`Crossfader`], and the [`Transport`] that sequences players.

pub mod crossfader;
pub mod events;
pub mod player;
pub mod stream;
pub mod transport;
pub mod volume;
pub mod worker;

pub use crossfader::{fade_level, Crossfader, CrossfaderListener, FadeDirection, MAX_FADES};
pub use events::{EventBus, Subscription};
pub use player::{Gain, Player, PlayerId, PlayerListener, PlayerOptions};
pub use stream::{Stream, StreamOptions};
pub use transport::{StartMode, Transport};
pub use volume::MasterVolume;
pub use worker::{MessageQueue, Received, Worker};
