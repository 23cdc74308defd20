//! # Chroma
//!
//! A local music player for the terminal. Plays audio files, directories or a
//! JSON catalog through the default output device, driven by typed commands.

mod config;
mod console;
mod library;

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chroma_audio::LocalFileSink;
use chroma_core::RepeatMode;
use chroma_playback::{AudioEngine, Notice, SessionSnapshot, UnmanagedFocus};
use clap::{Parser, ValueEnum};
use config::AppConfig;
use console::{ConsoleCommand, Flow};
use parking_lot::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "chroma")]
#[command(about = "Play local music from the terminal")]
#[command(version)]
struct Args {
    /// Audio files, directories, or a single catalog `.json`
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "CHROMA_CONFIG")]
    config: Option<PathBuf>,

    /// 1-based queue position to start from
    #[arg(short, long, default_value_t = 1)]
    start: usize,

    /// Load the first track without starting playback
    #[arg(long)]
    paused: bool,

    /// Shuffle the queue before playing
    #[arg(long)]
    shuffle: bool,

    /// Initial repeat mode
    #[arg(long, value_enum, default_value_t = RepeatArg::Off)]
    repeat: RepeatArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RepeatArg {
    Off,
    All,
    One,
}

impl From<RepeatArg> for RepeatMode {
    fn from(arg: RepeatArg) -> Self {
        match arg {
            RepeatArg::Off => Self::Off,
            RepeatArg::All => Self::All,
            RepeatArg::One => Self::One,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chroma_app=info,chroma_playback=debug,chroma_audio=info".into()),
        )
        .init();

    let args = Args::parse();
    info!("Starting Chroma v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(args.config.as_deref())?;
    let catalog = library::open_catalog(&args.inputs)?;
    let tracks = library::load_tracks(catalog.as_ref())?;
    info!("{} tracks queued", tracks.len());

    match chroma_audio::default_device_name() {
        Some(name) => info!("Default output device: {name}"),
        None => warn!("No default output device found"),
    }
    let sink = LocalFileSink::new(config.audio).context("Failed to create audio sink")?;
    let engine = AudioEngine::new(config.engine, sink, UnmanagedFocus)
        .context("Failed to start playback engine")?;
    engine.subscribe(log_observer())?;

    let handle = engine.handle();
    if args.repeat != RepeatArg::Off {
        handle.set_repeat_mode(args.repeat.into())?;
    }
    let start = args.start.saturating_sub(1).min(tracks.len() - 1);
    handle.set_queue(tracks, start, !args.paused)?;
    if args.shuffle {
        handle.toggle_shuffle()?;
    }

    println!("{}", console::HELP);
    run_console(&engine)?;

    info!("Shutting down");
    engine.shutdown()?;
    Ok(())
}

/// Read commands from stdin until `quit` or end of input.
fn run_console(engine: &AudioEngine) -> Result<()> {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let command = match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        match console::execute(engine, command) {
            Ok((flow, output)) => {
                if let Some(output) = output {
                    println!("{output}");
                }
                if flow == Flow::Quit {
                    break;
                }
            }
            Err(e) => {
                error!("Command failed: {e:#}");
                break;
            }
        }
    }
    Ok(())
}

/// Observer that logs transitions and notices, skipping position-only updates.
fn log_observer() -> impl Fn(&SessionSnapshot) + Send + 'static {
    let last = Mutex::new(None::<SessionSnapshot>);
    move |snapshot: &SessionSnapshot| {
        match &snapshot.notice {
            Some(Notice::FocusDenied) => warn!("Playback refused: audio focus denied"),
            Some(Notice::DecodeFailed { track_id, reason }) => {
                warn!("Skipping {track_id}: {reason}");
            }
            None => {}
        }

        let mut last = last.lock();
        let changed = last
            .as_ref()
            .map_or(true, |previous| snapshot.differs_beyond_position(previous));
        if changed {
            info!("{snapshot}");
        }
        *last = Some(snapshot.clone());
    }
}
