//! Engine context
//!
//! Everything a transport needs from its environment, built once by the
//! application and handed to [`Transport::new`](crate::Transport::new).

use crate::audio::{
    ClipDspFactory, DecoderFactory, DspFactory, NullOutputFactory, OutputFactory,
    PreampDspFactory, SymphoniaDecoderFactory,
};
use crate::error::{Error, Result};
use segue_common::{EngineConfig, OutputBackend};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct EngineContext {
    config: Arc<EngineConfig>,
    decoders: Vec<Arc<dyn DecoderFactory>>,
    dsps: Vec<Arc<dyn DspFactory>>,
    output: Arc<dyn OutputFactory>,
}

impl EngineContext {
    /// Context with no decoders or DSP stages
    pub fn new(config: EngineConfig, output: Arc<dyn OutputFactory>) -> Self {
        Self {
            config: Arc::new(config),
            decoders: Vec::new(),
            dsps: Vec::new(),
            output,
        }
    }

    /// Default wiring for `config`
    ///
    /// Symphonia decoding, a preamp stage (plus clipping when it boosts) if
    /// `preamp_db` is non-zero, and the output backend `config.output` names.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let output: Arc<dyn OutputFactory> = match config.output {
            OutputBackend::Null => Arc::new(NullOutputFactory::new(config.output_queue_buffers)),
            #[cfg(feature = "device-output")]
            OutputBackend::Device => Arc::new(crate::audio::DeviceOutputFactory::default()),
            #[cfg(not(feature = "device-output"))]
            OutputBackend::Device => {
                return Err(Error::AudioOutput(
                    "device output requires the `device-output` feature".to_string(),
                ))
            }
        };

        let preamp_db = config.preamp_db;
        let mut context =
            Self::new(config, output).with_decoder(Arc::new(SymphoniaDecoderFactory::new()));
        if preamp_db != 0.0 {
            context = context.with_dsp(Arc::new(PreampDspFactory { db: preamp_db }));
            if preamp_db > 0.0 {
                context = context.with_dsp(Arc::new(ClipDspFactory));
            }
        }

        debug!(
            "Engine context: decoders [{}], dsp [{}], output {}",
            context.decoder_names().join(", "),
            context.dsp_names().join(", "),
            context.output.name()
        );
        Ok(context)
    }

    /// Append a decoder factory; earlier factories win
    pub fn with_decoder(mut self, factory: Arc<dyn DecoderFactory>) -> Self {
        self.decoders.push(factory);
        self
    }

    /// Append a DSP stage to the end of the chain
    pub fn with_dsp(mut self, factory: Arc<dyn DspFactory>) -> Self {
        self.dsps.push(factory);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn decoders(&self) -> Vec<Arc<dyn DecoderFactory>> {
        self.decoders.clone()
    }

    pub fn dsps(&self) -> &[Arc<dyn DspFactory>] {
        &self.dsps
    }

    pub fn output_factory(&self) -> &Arc<dyn OutputFactory> {
        &self.output
    }

    pub fn decoder_names(&self) -> Vec<&str> {
        self.decoders.iter().map(|d| d.name()).collect()
    }

    pub fn dsp_names(&self) -> Vec<&str> {
        self.dsps.iter().map(|d| d.name()).collect()
    }
}
