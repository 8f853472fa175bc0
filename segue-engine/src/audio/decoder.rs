//! Decoder contract and the symphonia-backed implementation
//!
//! The engine is format-agnostic: a stream asks its factories, in order,
//! whether they can read a uri and binds the first that accepts. Decoders
//! fill one growable scratch [`Buffer`] per call with interleaved f32
//! samples and set its format. Dropping a decoder releases it.

use super::buffer::Buffer;
use super::data_stream::{open_data_stream, uri_extension, DataStream};
use crate::error::{Error, Result};
use std::io::{Read, Seek, SeekFrom};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use tracing::{debug, warn};

/// Format-specific decoder bound to one uri
pub trait Decoder: Send {
    /// Decode the next chunk into `buffer`
    ///
    /// Returns `Ok(false)` at end of stream.
    fn get_buffer(&mut self, buffer: &mut Buffer) -> Result<bool>;

    /// Seek and return the position actually reached, in seconds
    fn set_position(&mut self, seconds: f64) -> Result<f64>;

    /// `(sample_rate, channels)` when known before decoding
    fn format(&self) -> Option<(u32, u16)>;

    /// Track duration in seconds, if known
    fn duration(&self) -> Option<f64>;
}

/// Creates decoders for the uris it understands
pub trait DecoderFactory: Send + Sync {
    fn can_read(&self, uri: &str) -> bool;

    fn open(&self, uri: &str) -> Result<Box<dyn Decoder>>;

    fn name(&self) -> &str;
}

/// Decodes MP3, FLAC, AAC/MP4, Vorbis and WAV via symphonia
#[derive(Debug, Clone)]
pub struct SymphoniaDecoderFactory {
    extensions: Vec<String>,
}

impl Default for SymphoniaDecoderFactory {
    fn default() -> Self {
        let extensions = ["mp3", "flac", "ogg", "oga", "wav", "m4a", "mp4", "aac"];
        Self {
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl SymphoniaDecoderFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DecoderFactory for SymphoniaDecoderFactory {
    fn can_read(&self, uri: &str) -> bool {
        uri_extension(uri).is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }

    fn open(&self, uri: &str) -> Result<Box<dyn Decoder>> {
        let source = open_data_stream(uri)?;
        Ok(Box::new(SymphoniaDecoder::open(source)?))
    }

    fn name(&self) -> &str {
        "symphonia"
    }
}

/// Adapts a [`DataStream`] to symphonia's media source
struct DataStreamSource(Box<dyn DataStream>);

impl Read for DataStreamSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl Seek for DataStreamSource {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.0.seek(pos)
    }
}

impl MediaSource for DataStreamSource {
    fn is_seekable(&self) -> bool {
        self.0.is_seekable()
    }

    fn byte_len(&self) -> Option<u64> {
        self.0.length()
    }
}

/// Streaming symphonia decoder for the first audio track of a source
pub struct SymphoniaDecoder {
    uri: String,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    sample_rate: Option<u32>,
    channels: Option<u16>,
    time_base: Option<TimeBase>,
    duration: Option<f64>,
    samples: Option<SampleBuffer<f32>>,
}

impl SymphoniaDecoder {
    pub fn open(source: Box<dyn DataStream>) -> Result<Self> {
        let uri = source.uri().to_string();
        let mss = MediaSourceStream::new(Box::new(DataStreamSource(source)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = uri_extension(&uri) {
            hint.with_extension(&ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::Open(format!("Failed to probe {}: {}", uri, e)))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Open(format!("No audio track found in {}", uri)))?;

        let params = &track.codec_params;
        let track_id = track.id;
        let sample_rate = params.sample_rate;
        let channels = params.channels.map(|c| c.count() as u16);
        let time_base = params.time_base;
        let duration = match (params.n_frames, sample_rate) {
            (Some(frames), Some(rate)) if rate > 0 => Some(frames as f64 / rate as f64),
            _ => None,
        };

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| Error::Open(format!("Failed to create decoder for {}: {}", uri, e)))?;

        debug!(
            "Opened {}: sample_rate={:?}, channels={:?}, duration={:?}",
            uri, sample_rate, channels, duration
        );

        Ok(Self {
            uri,
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            time_base,
            duration,
            samples: None,
        })
    }

    fn ts_to_seconds(&self, ts: u64) -> Option<f64> {
        if let Some(tb) = self.time_base {
            let time = tb.calc_time(ts);
            return Some(time.seconds as f64 + time.frac);
        }
        self.sample_rate
            .filter(|r| *r > 0)
            .map(|rate| ts as f64 / rate as f64)
    }
}

fn is_end_of_stream(error: &SymphoniaError) -> bool {
    matches!(error, SymphoniaError::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
}

impl Decoder for SymphoniaDecoder {
    fn get_buffer(&mut self, buffer: &mut Buffer) -> Result<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(ref e) if is_end_of_stream(e) => {
                    debug!("Reached end of {}", self.uri);
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    debug!("Track list changed in {}, ending stream", self.uri);
                    return Ok(false);
                }
                Err(e) => {
                    return Err(Error::Decode(format!("Reading {} failed: {}", self.uri, e)))
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if decoded.frames() == 0 {
                        continue;
                    }
                    let spec = *decoded.spec();
                    let frames = decoded.capacity() as u64;
                    let needed = decoded.capacity() * spec.channels.count();
                    let fits = self
                        .samples
                        .as_ref()
                        .is_some_and(|s| s.capacity() >= needed);
                    if !fits {
                        self.samples = Some(SampleBuffer::new(frames, spec));
                    }
                    let Some(samples) = self.samples.as_mut() else {
                        continue;
                    };
                    samples.copy_interleaved_ref(decoded);

                    buffer.set_format(spec.rate, spec.channels.count() as u16);
                    buffer.assign(samples.samples())?;
                    return Ok(true);
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping corrupt packet in {}: {}", self.uri, e);
                    continue;
                }
                Err(ref e) if is_end_of_stream(e) => return Ok(false),
                Err(e) => {
                    return Err(Error::Decode(format!("Decoding {} failed: {}", self.uri, e)))
                }
            }
        }
    }

    fn set_position(&mut self, seconds: f64) -> Result<f64> {
        let target = seconds.max(0.0);
        let time = Time::new(target.trunc() as u64, target.fract());
        let seeked = self
            .format
            .seek(
                SeekMode::Coarse,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| Error::Decode(format!("Seek in {} failed: {}", self.uri, e)))?;
        self.decoder.reset();

        let actual = self.ts_to_seconds(seeked.actual_ts).unwrap_or(target);
        debug!("Seek in {}: requested {:.3}s, landed {:.3}s", self.uri, seconds, actual);
        Ok(actual)
    }

    fn format(&self) -> Option<(u32, u16)> {
        Some((self.sample_rate?, self.channels?))
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_matches_extensions() {
        let factory = SymphoniaDecoderFactory::new();
        assert!(factory.can_read("/music/a.mp3"));
        assert!(factory.can_read("file:///music/b.FLAC"));
        assert!(factory.can_read("c.wav"));
        assert!(!factory.can_read("notes.txt"));
        assert!(!factory.can_read("no_extension"));
    }

    #[test]
    fn test_open_missing_file_fails() {
        let factory = SymphoniaDecoderFactory::new();
        assert!(matches!(factory.open("/no/such/file.mp3"), Err(Error::Open(_))));
    }
}
