//! Decoder-to-buffer pipeline for one track
//!
//! A `Stream` binds the first decoder factory that accepts its uri, pulls
//! raw decoder chunks through the [`Packetizer`] into fixed-size pooled
//! buffers, runs each through the DSP chain and hands them out in order.
//! Consumed buffers come back through the shared [`BufferPool`].
//!
//! The stream is owned by its player's worker thread; only the pool is
//! shared with the output callback path.
//!
//! Positions are seconds as f64, derived from a u64 count of interleaved
//! samples emitted since the last seek or format change.

use crate::audio::{
    Buffer, BufferPool, Decoder, DecoderFactory, Dsp, DspFactory, Packetizer, PoolFormat, PoolStats,
};
use crate::error::{Error, Result};
use segue_common::time::samples_to_seconds;
use segue_common::EngineConfig;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lower bound on pooled buffers per stream
pub const MIN_BUFFER_COUNT: usize = 30;

/// Buffering parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamOptions {
    /// Packet size in frames; samples per packet = frames × channels
    pub packet_frames: usize,
    /// Seconds of audio the pool is sized for
    pub prefetch_seconds: f64,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            packet_frames: 2048,
            prefetch_seconds: 2.0,
        }
    }
}

impl From<&EngineConfig> for StreamOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            packet_frames: config.packet_frames,
            prefetch_seconds: config.prefetch_seconds,
        }
    }
}

pub struct Stream {
    uri: Option<String>,
    options: StreamOptions,
    factories: Vec<Arc<dyn DecoderFactory>>,
    decoder: Option<Box<dyn Decoder>>,
    dsps: Vec<Box<dyn Dsp>>,
    pool: Arc<BufferPool>,
    packetizer: Packetizer,
    /// Decoder scratch; `decode_offset` marks what was fed to the packetizer
    decode_buffer: Buffer,
    decode_offset: usize,
    filled: VecDeque<Buffer>,
    buffer_count: usize,
    sample_rate: u32,
    channels: u16,
    /// Format seen mid-stream; applied once old packets are drained
    pending_format: Option<(u32, u16)>,
    position_base: f64,
    emitted_samples: u64,
    duration: Option<f64>,
    decoder_exhausted: bool,
}

impl Stream {
    pub fn new(
        options: StreamOptions,
        factories: Vec<Arc<dyn DecoderFactory>>,
        dsp_factories: &[Arc<dyn DspFactory>],
    ) -> Self {
        Self {
            uri: None,
            options,
            factories,
            decoder: None,
            dsps: dsp_factories.iter().map(|f| f.create()).collect(),
            pool: Arc::new(BufferPool::new()),
            packetizer: Packetizer::default(),
            decode_buffer: Buffer::new(0),
            decode_offset: 0,
            filled: VecDeque::new(),
            buffer_count: MIN_BUFFER_COUNT,
            sample_rate: 0,
            channels: 0,
            pending_format: None,
            position_base: 0.0,
            emitted_samples: 0,
            duration: None,
            decoder_exhausted: false,
        }
    }

    /// Bind a decoder for `uri` and prime the first buffers
    ///
    /// Fails with [`Error::Open`] when no factory accepts the uri or the
    /// chosen factory cannot open it. No other factory is tried.
    pub fn open(&mut self, uri: &str) -> Result<()> {
        if self.decoder.is_some() {
            return Err(Error::InvalidState(format!(
                "stream already open for {}",
                self.uri.as_deref().unwrap_or_default()
            )));
        }

        let factory = self
            .factories
            .iter()
            .find(|f| f.can_read(uri))
            .ok_or_else(|| Error::Open(format!("No decoder accepts {}", uri)))?;

        let decoder = factory.open(uri).map_err(|e| match e {
            Error::Open(msg) => Error::Open(msg),
            other => Error::Open(format!("{} failed to open {}: {}", factory.name(), uri, other)),
        })?;

        debug!("Stream {} bound to decoder {}", uri, factory.name());

        self.duration = decoder.duration();
        if let Some((rate, channels)) = decoder.format() {
            self.apply_format(rate, channels);
        }
        self.decoder = Some(decoder);
        self.uri = Some(uri.to_string());

        self.refill()
    }

    /// Next processed buffer, or `None` at end of stream
    pub fn next_buffer(&mut self) -> Result<Option<Buffer>> {
        if self.filled.is_empty() {
            if let Some(buffer) = self.produce(true)? {
                self.filled.push_back(buffer);
            }
        }
        let Some(mut buffer) = self.filled.pop_front() else {
            return Ok(None);
        };
        for dsp in &mut self.dsps {
            dsp.process(&mut buffer);
        }
        self.refill()?;
        Ok(Some(buffer))
    }

    /// Return a consumed buffer to the pool
    pub fn on_buffer_processed(&self, buffer: Buffer) {
        self.pool.release(buffer);
    }

    /// Pool shared with the output hand-off path
    pub fn pool(&self) -> Arc<BufferPool> {
        Arc::clone(&self.pool)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Seek the decoder and drop everything buffered
    ///
    /// Returns the position the decoder actually reached.
    pub fn set_position(&mut self, seconds: f64) -> Result<f64> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| Error::InvalidState("stream is not open".to_string()))?;

        let mut target = seconds.max(0.0);
        if let Some(duration) = self.duration {
            target = target.min(duration);
        }
        let actual = decoder.set_position(target)?;

        for buffer in self.filled.drain(..) {
            self.pool.release(buffer);
        }
        if let Some((rate, channels)) = self.pending_format.take() {
            self.apply_format(rate, channels);
        }
        self.packetizer.reset();
        self.decode_offset = self.decode_buffer.len();
        self.decoder_exhausted = false;
        self.position_base = actual;
        self.emitted_samples = 0;

        debug!(
            "Stream {} seek: requested {:.3}s, actual {:.3}s",
            self.uri.as_deref().unwrap_or_default(),
            seconds,
            actual
        );

        self.refill()?;
        Ok(actual)
    }

    /// Position of the next buffer to be emitted, seconds
    pub fn decode_position(&self) -> f64 {
        self.position_base
            + samples_to_seconds(self.emitted_samples, self.sample_rate, self.channels)
    }

    /// Fraction of the track decoded so far, 0.0 when the duration is unknown
    pub fn decoder_progress(&self) -> f64 {
        match self.duration {
            Some(duration) if duration > 0.0 => (self.decode_position() / duration).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// `(sample_rate, channels)` once known
    pub fn format(&self) -> Option<(u32, u16)> {
        (self.sample_rate > 0).then_some((self.sample_rate, self.channels))
    }

    /// Pooled buffer count for the current format
    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    /// Buffers decoded ahead of the player
    pub fn prefetched(&self) -> usize {
        self.filled.len()
    }

    /// No buffer will ever be produced again
    pub fn is_eof(&self) -> bool {
        let drained = self.packetizer.is_drained()
            || (self.decoder_exhausted && self.packetizer.packet_size() == 0);
        self.filled.is_empty() && self.pending_format.is_none() && drained
    }

    /// Top up the prefetch queue from free pool buffers only
    fn refill(&mut self) -> Result<()> {
        let target = (self.buffer_count / 4).max(1);
        while self.filled.len() < target {
            match self.produce(false)? {
                Some(buffer) => self.filled.push_back(buffer),
                None => break,
            }
        }
        Ok(())
    }

    fn apply_format(&mut self, sample_rate: u32, channels: u16) {
        if sample_rate == 0 || channels == 0 {
            return;
        }
        if self.sample_rate > 0 {
            self.position_base +=
                samples_to_seconds(self.emitted_samples, self.sample_rate, self.channels);
            self.emitted_samples = 0;
        }
        self.sample_rate = sample_rate;
        self.channels = channels;
        self.pending_format = None;

        let packet_frames = self.options.packet_frames.max(1);
        let packet_size = packet_frames * channels as usize;
        self.packetizer.set_packet_size(packet_size);

        let wanted = (self.options.prefetch_seconds * sample_rate as f64 / packet_frames as f64)
            .ceil() as usize;
        self.buffer_count = wanted.max(MIN_BUFFER_COUNT);
        self.pool.configure(
            PoolFormat {
                sample_rate,
                channels,
                capacity: packet_size,
            },
            self.buffer_count,
        );

        debug!(
            "Stream {} format {} Hz x{}: packet {} samples, {} buffers",
            self.uri.as_deref().unwrap_or("<opening>"),
            sample_rate,
            channels,
            packet_size,
            self.buffer_count
        );
    }

    /// Produce one packet-sized buffer
    ///
    /// With `allow_alloc` false, returns `None` as soon as the pool is empty.
    fn produce(&mut self, allow_alloc: bool) -> Result<Option<Buffer>> {
        loop {
            if self.packetizer.is_buffer_available() {
                let acquired = if allow_alloc {
                    self.pool.acquire()
                } else {
                    self.pool.try_acquire()
                };
                let Some(mut buffer) = acquired else {
                    return Ok(None);
                };
                let count = self.packetizer.get_buffer(buffer.storage_mut());
                self.packetizer.advance(1);
                buffer.set_len(count)?;
                buffer.set_format(self.sample_rate, self.channels);
                buffer.set_position(self.decode_position());
                self.emitted_samples += count as u64;
                if count == 0 {
                    self.pool.release(buffer);
                    continue;
                }
                return Ok(Some(buffer));
            }

            if self.packetizer.is_finished() {
                match self.pending_format {
                    Some((rate, channels)) => {
                        self.apply_format(rate, channels);
                        continue;
                    }
                    None => return Ok(None),
                }
            }

            if self.decode_offset < self.decode_buffer.len() {
                let remaining = self.decode_buffer.len() - self.decode_offset;
                let count = remaining
                    .min(self.packetizer.free_samples())
                    .min(self.packetizer.ring_capacity().saturating_sub(1));
                if count == 0 {
                    return Err(Error::Internal("packetizer has no room to write".to_string()));
                }
                let end = self.decode_offset + count;
                self.packetizer
                    .write_data(&self.decode_buffer.samples()[self.decode_offset..end])?;
                self.decode_offset = end;
                continue;
            }

            if self.decoder_exhausted {
                if self.packetizer.packet_size() == 0 {
                    return Ok(None);
                }
                self.packetizer.finished();
                continue;
            }

            let decoder = self
                .decoder
                .as_mut()
                .ok_or_else(|| Error::InvalidState("stream is not open".to_string()))?;
            if !decoder.get_buffer(&mut self.decode_buffer)? {
                self.decoder_exhausted = true;
                continue;
            }
            self.decode_offset = 0;
            if self.decode_buffer.is_empty() {
                continue;
            }

            let format = (self.decode_buffer.sample_rate(), self.decode_buffer.channels());
            if format.0 == 0 || format.1 == 0 {
                return Err(Error::Decode(format!(
                    "decoder produced samples without a format for {}",
                    self.uri.as_deref().unwrap_or_default()
                )));
            }
            if self.sample_rate == 0 {
                self.apply_format(format.0, format.1);
            } else if format != (self.sample_rate, self.channels) {
                warn!(
                    "Stream {} format changed {} Hz x{} -> {} Hz x{}",
                    self.uri.as_deref().unwrap_or_default(),
                    self.sample_rate,
                    self.channels,
                    format.0,
                    format.1
                );
                self.pending_format = Some(format);
                self.packetizer.finished();
            }
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if let Some(uri) = &self.uri {
            debug!("Stream {} released", uri);
        }
    }
}
