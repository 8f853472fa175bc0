//! Audio building blocks
//!
//! Sample containers, packet framing, the recycle pool, and the contracts
//! for the collaborators the engine drives (decoders, DSP stages, data
//! streams and output sinks) with their default implementations.

pub mod buffer;
pub mod data_stream;
pub mod decoder;
#[cfg(feature = "device-output")]
pub mod device;
pub mod dsp;
pub mod null_output;
pub mod output;
pub mod packetizer;
pub mod pool;

pub use buffer::{Buffer, BufferFlags};
pub use data_stream::{open_data_stream, DataStream, FileDataStream};
pub use decoder::{Decoder, DecoderFactory, SymphoniaDecoder, SymphoniaDecoderFactory};
#[cfg(feature = "device-output")]
pub use device::{DeviceOutput, DeviceOutputFactory};
pub use dsp::{ClipDsp, ClipDspFactory, Dsp, DspFactory, PreampDsp, PreampDspFactory};
pub use null_output::{NullOutput, NullOutputFactory};
pub use output::{BufferProvider, Output, OutputFactory, PlayError};
pub use packetizer::{Packetizer, PacketizerError, PACKET_SLOTS};
pub use pool::{BufferPool, PoolFormat, PoolStats};
