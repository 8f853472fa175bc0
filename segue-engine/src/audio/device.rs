//! Audio device output using cpal
//!
//! Samples are copied into a ring buffer drained by the cpal callback, and
//! each buffer goes back to its provider as soon as it is copied. The cpal
//! stream is not `Send` on every platform, so it lives on a dedicated worker
//! thread that builds, pauses and drops it on command. A new stream is opened
//! whenever the incoming buffer format changes.

use super::buffer::Buffer;
use super::output::{BufferProvider, Output, OutputFactory, PlayError};
use crate::error::{Error, Result};
use crate::playback::worker::Worker;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

enum DeviceCommand {
    Open {
        sample_rate: u32,
        channels: u16,
        consumer: HeapCons<f32>,
    },
    Pause,
    Resume,
}

struct DeviceShared {
    volume_bits: AtomicU64,
    /// Set by the cpal error callback
    failed: AtomicBool,
    /// Asks the callback to drop everything queued
    flush: AtomicBool,
}

#[derive(Default)]
struct Sink {
    producer: Option<HeapProd<f32>>,
    format: Option<(u32, u16)>,
}

/// Default output device sink
pub struct DeviceOutput {
    shared: Arc<DeviceShared>,
    sink: Mutex<Sink>,
    buffer_seconds: f64,
    worker: Worker<DeviceCommand>,
}

impl DeviceOutput {
    /// # Arguments
    /// * `buffer_seconds` - Ring buffer length; bounds how far ahead players may write
    pub fn new(buffer_seconds: f64) -> Result<Self> {
        let shared = Arc::new(DeviceShared {
            volume_bits: AtomicU64::new(1.0f64.to_bits()),
            failed: AtomicBool::new(false),
            flush: AtomicBool::new(false),
        });

        let thread_shared = Arc::clone(&shared);
        let worker = Worker::spawn("segue-device-output", move |queue| {
            let mut stream: Option<cpal::Stream> = None;
            while let Some(command) = queue.recv() {
                match command {
                    DeviceCommand::Open {
                        sample_rate,
                        channels,
                        consumer,
                    } => {
                        stream = None;
                        match open_stream(&thread_shared, sample_rate, channels, consumer) {
                            Ok(s) => stream = Some(s),
                            Err(e) => {
                                error!("Failed to open audio device: {}", e);
                                thread_shared.failed.store(true, Ordering::SeqCst);
                            }
                        }
                    }
                    DeviceCommand::Pause => {
                        if let Some(Err(e)) = stream.as_ref().map(|s| s.pause()) {
                            warn!("Failed to pause audio stream: {}", e);
                        }
                    }
                    DeviceCommand::Resume => {
                        if let Some(Err(e)) = stream.as_ref().map(|s| s.play()) {
                            warn!("Failed to resume audio stream: {}", e);
                        }
                    }
                }
            }
            debug!("Audio device stream closed");
        })?;

        Ok(Self {
            shared,
            sink: Mutex::new(Sink::default()),
            buffer_seconds: buffer_seconds.max(0.05),
            worker,
        })
    }
}

fn open_stream(
    shared: &Arc<DeviceShared>,
    sample_rate: u32,
    channels: u16,
    mut consumer: HeapCons<f32>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioOutput("No default output device".to_string()))?;

    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let callback_shared = Arc::clone(shared);
    let error_shared = Arc::clone(shared);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if callback_shared.flush.swap(false, Ordering::SeqCst) {
                    consumer.clear();
                }
                let volume =
                    f64::from_bits(callback_shared.volume_bits.load(Ordering::Relaxed)) as f32;
                let read = consumer.pop_slice(data);
                for sample in &mut data[..read] {
                    *sample *= volume;
                }
                data[read..].fill(0.0);
            },
            move |err| {
                error!("Audio stream error: {}", err);
                error_shared.failed.store(true, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;

    info!(
        "Audio device '{}' opened: {} Hz, {} channels",
        name, sample_rate, channels
    );
    Ok(stream)
}

impl Output for DeviceOutput {
    fn play_buffer(
        &self,
        buffer: Buffer,
        provider: Arc<dyn BufferProvider>,
    ) -> std::result::Result<(), PlayError> {
        if self.shared.failed.load(Ordering::SeqCst) {
            return Err(PlayError::Failed {
                buffer,
                reason: "audio device stream failed".to_string(),
            });
        }

        let mut sink = self.sink.lock();
        let format = (buffer.sample_rate(), buffer.channels());
        if sink.format != Some(format) {
            let per_second = format.0 as f64 * format.1 as f64;
            let capacity = ((per_second * self.buffer_seconds) as usize).max(buffer.len() * 2);
            let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
            sink.producer = Some(producer);
            sink.format = Some(format);
            self.worker.post(DeviceCommand::Open {
                sample_rate: format.0,
                channels: format.1,
                consumer,
            });
        }

        let Some(producer) = sink.producer.as_mut() else {
            return Err(PlayError::Failed {
                buffer,
                reason: "audio device not open".to_string(),
            });
        };
        if producer.vacant_len() < buffer.len() {
            return Err(PlayError::Full(buffer));
        }
        producer.push_slice(buffer.samples());
        drop(sink);

        provider.on_buffer_processed(buffer);
        Ok(())
    }

    fn pause(&self) {
        self.worker.post(DeviceCommand::Pause);
    }

    fn resume(&self) {
        self.worker.post(DeviceCommand::Resume);
    }

    fn set_volume(&self, volume: f64) {
        self.shared
            .volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn volume(&self) -> f64 {
        f64::from_bits(self.shared.volume_bits.load(Ordering::Relaxed))
    }

    fn clear_buffers(&self) {
        self.shared.flush.store(true, Ordering::SeqCst);
    }

    fn release_buffers(&self) {
        self.shared.flush.store(true, Ordering::SeqCst);
        self.worker.post(DeviceCommand::Resume);
    }

    fn latency(&self) -> f64 {
        let sink = self.sink.lock();
        match (&sink.producer, sink.format) {
            (Some(producer), Some((rate, channels))) => segue_common::time::samples_to_seconds(
                producer.occupied_len() as u64,
                rate,
                channels,
            ),
            _ => 0.0,
        }
    }

    fn name(&self) -> &str {
        "device"
    }
}

/// Creates [`DeviceOutput`]s on the default device
#[derive(Debug, Clone)]
pub struct DeviceOutputFactory {
    pub buffer_seconds: f64,
}

impl Default for DeviceOutputFactory {
    fn default() -> Self {
        Self {
            buffer_seconds: 0.5,
        }
    }
}

impl OutputFactory for DeviceOutputFactory {
    fn create(&self) -> Result<Arc<dyn Output>> {
        Ok(Arc::new(DeviceOutput::new(self.buffer_seconds)?))
    }

    fn name(&self) -> &str {
        "device"
    }
}
