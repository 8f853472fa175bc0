//! Shared infrastructure for segue-engine integration tests
//!
//! - `ToneDecoderFactory`: synthetic decoder with open/release counters
//! - `FailingOutput`, `RecordingOutput`: output doubles
//! - `EventRecorder`: captures transport events
//! - `generate_sine_wav`: real files for the symphonia decoder

#![allow(dead_code)]

pub mod audio_generator;
pub mod event_recorder;
pub mod outputs;
pub mod tone_decoder;

pub use audio_generator::generate_sine_wav;
pub use event_recorder::EventRecorder;
pub use outputs::{FailingOutput, FailingOutputFactory, RecordingOutput, RecordingOutputFactory};
pub use tone_decoder::{DecoderCounters, ToneDecoderFactory};

use segue_common::EngineConfig;
use std::time::{Duration, Instant};

/// Sample rate of the synthetic tone tracks
pub const TONE_RATE: u32 = 8000;

/// Small packets and short thresholds so tests run in a few seconds
pub fn test_config() -> EngineConfig {
    EngineConfig {
        packet_frames: 256,
        prefetch_seconds: 0.5,
        almost_done_seconds: 2.0,
        crossfade_tick_ms: 50,
        output_retry_ms: 5,
        output_queue_buffers: 8,
        ..EngineConfig::default()
    }
}

/// Poll `condition` every 5 ms until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
