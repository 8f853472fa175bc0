//! Engine configuration loading
//!
//! Settings come from a TOML file resolved in priority order:
//! 1. Explicit path (command-line `--config`)
//! 2. `SEGUE_CONFIG` environment variable
//! 3. `<user config dir>/segue/config.toml`
//! 4. Built-in defaults
//!
//! A missing file at the default location is not an error: the engine logs a
//! warning and starts with defaults. An explicit path that does not exist is.

use crate::{Error, FadeCurve, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "SEGUE_CONFIG";

/// Output backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputBackend {
    /// Clock-driven sink that discards samples
    #[default]
    Null,
    /// Default system audio device (requires the `device-output` feature)
    Device,
}

impl std::str::FromStr for OutputBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "null" | "none" => Ok(OutputBackend::Null),
            "device" => Ok(OutputBackend::Device),
            other => Err(format!("unknown output backend '{}'", other)),
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Crossfade duration in milliseconds; 0 forces a hard gapless cut-over
    #[serde(default)]
    pub crossfade_ms: u64,

    /// Buffer prefetch/cache length in seconds
    #[serde(default = "default_prefetch_seconds")]
    pub prefetch_seconds: f64,

    /// Preferred packet size in frames (samples per channel)
    #[serde(default = "default_packet_frames")]
    pub packet_frames: usize,

    /// Seconds remaining at which a player reports AlmostDone
    #[serde(default = "default_almost_done_seconds")]
    pub almost_done_seconds: f64,

    /// Crossfader tick interval in milliseconds
    #[serde(default = "default_crossfade_tick_ms")]
    pub crossfade_tick_ms: u64,

    #[serde(default)]
    pub fade_curve: FadeCurve,

    /// Player back-off when the output reports a full queue
    #[serde(default = "default_output_retry_ms")]
    pub output_retry_ms: u64,

    /// Preamp applied by the default DSP chain, in dB
    #[serde(default)]
    pub preamp_db: f64,

    #[serde(default)]
    pub output: OutputBackend,

    /// Buffers the null output accepts before reporting full
    #[serde(default = "default_output_queue_buffers")]
    pub output_queue_buffers: usize,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_prefetch_seconds() -> f64 {
    2.0
}

fn default_packet_frames() -> usize {
    2048
}

fn default_almost_done_seconds() -> f64 {
    2.0
}

fn default_crossfade_tick_ms() -> u64 {
    50
}

fn default_output_retry_ms() -> u64 {
    10
}

fn default_output_queue_buffers() -> usize {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            crossfade_ms: 0,
            prefetch_seconds: default_prefetch_seconds(),
            packet_frames: default_packet_frames(),
            almost_done_seconds: default_almost_done_seconds(),
            crossfade_tick_ms: default_crossfade_tick_ms(),
            fade_curve: FadeCurve::default(),
            output_retry_ms: default_output_retry_ms(),
            preamp_db: 0.0,
            output: OutputBackend::default(),
            output_queue_buffers: default_output_queue_buffers(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Resolve and load configuration following the priority order
    ///
    /// # Arguments
    /// * `cli_path` - Path given on the command line, if any
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            info!("Loading config from {}", path.display());
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(path);
            info!("Loading config from {} ({})", path.display(), CONFIG_ENV_VAR);
            return Self::from_file(&path);
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                info!("Loading config from {}", path.display());
                Self::from_file(&path)
            }
            Some(path) => {
                warn!(
                    "No config file at {}, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("Could not determine config directory, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.packet_frames == 0 {
            return Err(Error::Config("packet_frames must be greater than 0".into()));
        }
        if self.crossfade_tick_ms == 0 {
            return Err(Error::Config("crossfade_tick_ms must be greater than 0".into()));
        }
        if !(self.prefetch_seconds > 0.0) || !self.prefetch_seconds.is_finite() {
            return Err(Error::Config(format!(
                "prefetch_seconds must be positive, got {}",
                self.prefetch_seconds
            )));
        }
        if self.almost_done_seconds < 0.0 || !self.almost_done_seconds.is_finite() {
            return Err(Error::Config(format!(
                "almost_done_seconds must not be negative, got {}",
                self.almost_done_seconds
            )));
        }
        if self.output_queue_buffers == 0 {
            return Err(Error::Config("output_queue_buffers must be greater than 0".into()));
        }
        if !self.preamp_db.is_finite() {
            return Err(Error::Config("preamp_db must be finite".into()));
        }
        Ok(())
    }

    pub fn crossfade_enabled(&self) -> bool {
        self.crossfade_ms > 0
    }

    pub fn crossfade_tick(&self) -> Duration {
        Duration::from_millis(self.crossfade_tick_ms)
    }

    pub fn output_retry(&self) -> Duration {
        Duration::from_millis(self.output_retry_ms)
    }
}

/// Default config file location for the platform
///
/// `~/.config/segue/config.toml` on Linux, the platform equivalent elsewhere.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("segue").join("config.toml"))
}
