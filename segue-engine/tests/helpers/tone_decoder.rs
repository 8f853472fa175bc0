//! Synthetic sine decoder
//!
//! Uris ending in `.tone` decode to a stereo sine at [`TONE_RATE`]. Track
//! lengths are registered per uri; unknown uris get the default length.
//! Every decoder drop is counted so tests can check release-exactly-once.

use super::TONE_RATE;
use parking_lot::Mutex;
use segue_engine::audio::{Buffer, Decoder, DecoderFactory};
use segue_engine::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::f32::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CHUNK_FRAMES: usize = 400;
const CHANNELS: u16 = 2;

#[derive(Debug, Default)]
pub struct DecoderCounters {
    pub opened: AtomicUsize,
    pub released: AtomicUsize,
    pub reads: AtomicUsize,
}

impl DecoderCounters {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

pub struct ToneDecoderFactory {
    default_seconds: f64,
    lengths: Mutex<HashMap<String, f64>>,
    failing: Mutex<HashSet<String>>,
    read_delay: Option<Duration>,
    counters: Arc<DecoderCounters>,
}

impl ToneDecoderFactory {
    pub fn new(default_seconds: f64) -> Self {
        Self {
            default_seconds,
            lengths: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            read_delay: None,
            counters: Arc::new(DecoderCounters::default()),
        }
    }

    /// Sleep this long inside every `get_buffer` call
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn with_track(self, uri: &str, seconds: f64) -> Self {
        self.lengths.lock().insert(uri.to_string(), seconds);
        self
    }

    /// Opening `uri` fails
    pub fn with_failure(self, uri: &str) -> Self {
        self.failing.lock().insert(uri.to_string());
        self
    }

    pub fn counters(&self) -> Arc<DecoderCounters> {
        Arc::clone(&self.counters)
    }
}

impl DecoderFactory for ToneDecoderFactory {
    fn can_read(&self, uri: &str) -> bool {
        uri.ends_with(".tone")
    }

    fn open(&self, uri: &str) -> Result<Box<dyn Decoder>> {
        if self.failing.lock().contains(uri) {
            return Err(Error::Open(format!("cannot open {}", uri)));
        }
        let seconds = self
            .lengths
            .lock()
            .get(uri)
            .copied()
            .unwrap_or(self.default_seconds);
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ToneDecoder {
            total_frames: (seconds * TONE_RATE as f64).round() as usize,
            cursor: 0,
            read_delay: self.read_delay,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn name(&self) -> &str {
        "tone"
    }
}

struct ToneDecoder {
    total_frames: usize,
    cursor: usize,
    read_delay: Option<Duration>,
    counters: Arc<DecoderCounters>,
}

impl Decoder for ToneDecoder {
    fn get_buffer(&mut self, buffer: &mut Buffer) -> Result<bool> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }
        if self.cursor >= self.total_frames {
            return Ok(false);
        }

        let frames = CHUNK_FRAMES.min(self.total_frames - self.cursor);
        let mut samples = Vec::with_capacity(frames * CHANNELS as usize);
        for frame in self.cursor..self.cursor + frames {
            let t = frame as f32 / TONE_RATE as f32;
            let value = 0.5 * (2.0 * PI * 440.0 * t).sin();
            samples.push(value);
            samples.push(value);
        }
        self.cursor += frames;

        buffer.set_format(TONE_RATE, CHANNELS);
        buffer.assign(&samples)?;
        Ok(true)
    }

    fn set_position(&mut self, seconds: f64) -> Result<f64> {
        let frame = (seconds.max(0.0) * TONE_RATE as f64).round() as usize;
        self.cursor = frame.min(self.total_frames);
        Ok(self.cursor as f64 / TONE_RATE as f64)
    }

    fn format(&self) -> Option<(u32, u16)> {
        Some((TONE_RATE, CHANNELS))
    }

    fn duration(&self) -> Option<f64> {
        Some(self.total_frames as f64 / TONE_RATE as f64)
    }
}

impl Drop for ToneDecoder {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}
