//! segue-play - play files back to back through the segue engine
//!
//! Starts the first file, prepares each following file when the current one
//! reports `AlmostDone`, and exits once playback stops after the last file
//! (or on Ctrl+C).

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use segue_common::{EngineConfig, OutputBackend, PlaybackState, StreamState, TransportEvent};
use segue_engine::{EngineContext, Gain, StartMode, Transport};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for segue-play
#[derive(Parser, Debug)]
#[command(name = "segue-play")]
#[command(about = "Gapless/crossfading audio player")]
#[command(version)]
struct Args {
    /// Audio files or file:// uris, played in order
    #[arg(required = true)]
    files: Vec<String>,

    /// Config file (overrides SEGUE_CONFIG and the default location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Crossfade duration in milliseconds; 0 for gapless
    #[arg(short = 'x', long)]
    crossfade_ms: Option<u64>,

    /// Master volume, 0.0 to 1.0
    #[arg(short, long)]
    volume: Option<f64>,

    /// Output backend: null or device
    #[arg(short, long, env = "SEGUE_OUTPUT")]
    output: Option<OutputBackend>,

    /// Print events as JSON lines on stdout
    #[arg(long)]
    json_events: bool,
}

fn init_tracing(config: &EngineConfig) -> Result<()> {
    let level = &config.logging.level;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "segue_engine={level},segue_common={level},segue_play={level}"
        ))
    });

    let (file_layer, stderr_layer) = match &config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (Some(layer), None)
        }
        None => (
            None,
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(())
}

fn print_event(event: &TransportEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        TransportEvent::StreamEvent { state, url, .. } => println!("[{}] {}", state, url),
        TransportEvent::PlaybackEvent { state, .. } => println!("[playback {}]", state),
        TransportEvent::VolumeChanged { .. } => println!("[volume changed]"),
        TransportEvent::TimeChanged { seconds, .. } => println!("[time {:.1}s]", seconds),
    }
    Ok(())
}

/// Tracks which file is playing and which one has been prepared
struct Playlist {
    files: Vec<String>,
    current: usize,
    prepared: Option<usize>,
}

impl Playlist {
    fn next_index(&self) -> Option<usize> {
        let next = self.current + 1;
        (next < self.files.len()).then_some(next)
    }

    fn on_playing(&mut self, url: &str) {
        if let Some(offset) = self.files[self.current..].iter().position(|f| f == url) {
            self.current += offset;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = EngineConfig::load(args.config.as_deref()).context("Failed to load config")?;
    if let Some(crossfade_ms) = args.crossfade_ms {
        config.crossfade_ms = crossfade_ms;
    }
    if let Some(output) = args.output {
        config.output = output;
    }
    config.validate().context("Invalid configuration")?;

    init_tracing(&config)?;
    info!(
        "segue-play {} ({}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("SEGUE_GIT_HASH"),
        env!("SEGUE_BUILD_TIMESTAMP"),
        env!("SEGUE_BUILD_PROFILE")
    );

    let context = EngineContext::from_config(config).context("Failed to set up engine")?;
    let transport = Transport::new(context).context("Failed to start transport")?;
    if let Some(volume) = args.volume {
        transport.set_volume(volume);
    }

    let mut events = transport.event_receiver();
    let mut playlist = Playlist {
        files: args.files,
        current: 0,
        prepared: None,
    };
    transport
        .start(&playlist.files[0], Gain::default(), StartMode::Immediate)
        .with_context(|| format!("Failed to start {}", playlist.files[0]))?;

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping");
                transport.stop();
                break;
            }
        };

        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                warn!("Event feed lagged, {} events missed", missed);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        print_event(&event, args.json_events)?;

        match &event {
            TransportEvent::StreamEvent { state, url, .. } => match state {
                StreamState::Playing => playlist.on_playing(url),
                StreamState::AlmostDone if *url == playlist.files[playlist.current] => {
                    if let Some(next) = playlist.next_index() {
                        if playlist.prepared != Some(next) {
                            playlist.prepared = Some(next);
                            if let Err(e) =
                                transport.prepare_next_track(&playlist.files[next], Gain::default())
                            {
                                warn!("Failed to prepare {}: {}", playlist.files[next], e);
                            }
                        }
                    }
                }
                StreamState::Error => warn!("Playback of {} failed", url),
                _ => {}
            },
            TransportEvent::PlaybackEvent {
                state: PlaybackState::Stopped,
                ..
            } => match playlist.next_index() {
                Some(next) => {
                    playlist.current = next;
                    playlist.prepared = None;
                    transport
                        .start(&playlist.files[next], Gain::default(), StartMode::Immediate)
                        .with_context(|| format!("Failed to start {}", playlist.files[next]))?;
                }
                None => break,
            },
            _ => {}
        }
    }

    info!("Playback complete");
    Ok(())
}
