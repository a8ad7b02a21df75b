use drive_groove::adaptation::TempoStrategy;
use drive_groove::config::PipelineConfig;
use drive_groove::coordinator::Coordinator;
use drive_groove::library::{demo_library, TrackLibrary};
use drive_groove::mode::ModeController;
use drive_groove::pipeline::Pipeline;
use drive_groove::playback::PlaybackCommand;
use drive_groove::sensors::{ReplayProvider, SensorProvider, UnavailableProvider};
use drive_groove::types::*;
use drive_groove::{console_display, data_logger, osc_sender, random};

use clap::{Parser, ValueEnum};
use crossbeam_channel::{bounded, unbounded, Sender};
use log::{error, info, warn};
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;

#[derive(Clone, Copy, ValueEnum)]
enum StartMode {
    Manual,
    Auto,
    Live,
}

impl From<StartMode> for Mode {
    fn from(m: StartMode) -> Self {
        match m {
            StartMode::Manual => Mode::ManualSim,
            StartMode::Auto => Mode::AutoSim,
            StartMode::Live => Mode::LiveSensors,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TempoArg {
    Speed,
    Energy,
}

#[derive(Parser)]
#[command(name = "drive-groove")]
#[command(about = "Speed-adaptive music playback driven by vehicle motion")]
struct Cli {
    /// Pipeline tunables (JSON). Missing fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sample source to start in
    #[arg(long, value_enum, default_value = "manual")]
    mode: StartMode,

    /// Initial manual-simulation speed (km/h)
    #[arg(long, default_value_t = 0.0)]
    speed: f64,

    /// Initial manual-simulation acceleration (km/h/s)
    #[arg(long, default_value_t = 0.0)]
    accel: f64,

    /// Track library (JSON array). Defaults to the built-in synth playlist.
    #[arg(long)]
    library: Option<PathBuf>,

    /// Drive log replayed as the live sensor source
    #[arg(long)]
    drive_log: Option<PathBuf>,

    /// Start playback immediately
    #[arg(long)]
    play: bool,

    /// Enable OSC output
    #[arg(long)]
    osc: bool,

    /// OSC target address
    #[arg(long, default_value = "127.0.0.1:9000")]
    osc_target: String,

    /// Enable data logging
    #[arg(long)]
    log_data: bool,

    /// Output directory for logged sessions
    #[arg(long, default_value = "./sessions")]
    output_dir: PathBuf,

    /// Enable console display (terminal TUI)
    #[arg(long)]
    console: bool,

    /// Console display refresh rate (Hz)
    #[arg(long, default_value_t = 10)]
    display_hz: u32,

    /// Fixed seed for track and drive-profile randomness
    #[arg(long)]
    seed: Option<u64>,

    /// Override the tempo strategy from the config
    #[arg(long, value_enum)]
    tempo_strategy: Option<TempoArg>,

    /// Write the effective config to this file before starting
    #[arg(long)]
    save_config: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    let cli = Cli::parse();
    let clock = SessionClock::new();

    let mut config = cli
        .config
        .as_deref()
        .and_then(PipelineConfig::load)
        .unwrap_or_default();
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    match cli.tempo_strategy {
        Some(TempoArg::Speed) => config.tempo_strategy = TempoStrategy::SpeedPiecewise,
        Some(TempoArg::Energy) => config.tempo_strategy = TempoStrategy::EnergyScore,
        None => {}
    }

    if let Some(path) = &cli.save_config {
        if let Err(e) = config.save(path) {
            error!("Failed to save config to {:?}: {}", path, e);
        }
    }

    let library = match &cli.library {
        Some(path) => TrackLibrary::load(path).unwrap_or_else(|e| {
            error!("Track library {:?}: {}. Using the built-in playlist.", path, e);
            demo_library()
        }),
        None => demo_library(),
    };

    let sensors: Box<dyn SensorProvider> = match &cli.drive_log {
        Some(path) => Box::new(ReplayProvider::new(path)),
        None => Box::new(UnavailableProvider::new(
            "no live sensor configured (use --drive-log)",
        )),
    };

    info!("═══════════════════════════════════════════════");
    info!("  DRIVE GROOVE v{}", env!("CARGO_PKG_VERSION"));
    info!("  Library: {} tracks", library.len());
    info!("  Start mode: {}", Mode::from(cli.mode));
    info!("  Live source: {}", sensors.describe());
    info!("  Tempo: {:?}", config.tempo_strategy);
    if cli.osc { info!("  Output: OSC → {}", cli.osc_target); }
    if cli.console { info!("  UI: Console TUI"); }
    info!("  Commands: mode | manual <kmh> [accel] | start | stop | play <id> | ended <id> | quit");
    info!("═══════════════════════════════════════════════");

    // Channel: sample sources → coordinator
    let (sample_tx, sample_rx) = bounded::<SourceEvent>(4096);
    // Channel: console input → coordinator
    let (control_tx, control_rx) = unbounded::<Command>();
    // Channel: pipeline → playback collaborator
    let (playback_tx, playback_rx) = unbounded::<PlaybackCommand>();

    let mut event_txs: Vec<Sender<PipelineEvent>> = Vec::new();
    let mut handles = Vec::new();

    // ─── Console display ────────────────────────────────────────────
    if cli.console {
        let (tx, rx) = bounded::<PipelineEvent>(256);
        event_txs.push(tx);
        let hz = cli.display_hz;
        handles.push(thread::Builder::new().name("display".into()).spawn(move || {
            console_display::ConsoleDisplay::new(rx, hz).run();
        }).unwrap());
    }

    // ─── OSC sender ─────────────────────────────────────────────────
    if cli.osc {
        let target = cli.osc_target.clone();
        handles.push(thread::Builder::new().name("osc".into()).spawn(move || {
            osc_sender::OscSender::new(playback_rx, target).run();
        }).unwrap());
    } else {
        // no playback collaborator attached; commands are dropped
        drop(playback_rx);
    }

    // ─── Data logger ────────────────────────────────────────────────
    if cli.log_data {
        let (tx, rx) = bounded::<PipelineEvent>(4096);
        match data_logger::DataLogger::new(
            rx,
            clock.clone(),
            &cli.output_dir,
            &config,
            library.tracks(),
        ) {
            Ok(logger) => {
                event_txs.push(tx);
                handles.push(thread::Builder::new().name("logger".into()).spawn(move || {
                    logger.run();
                }).unwrap());
            }
            Err(e) => error!("Data logging disabled: {}", e),
        }
    }

    // ─── Coordinator ────────────────────────────────────────────────
    let rng = random::from_seed(config.seed);
    let mut modes = ModeController::new(&config, clock.clone(), sample_tx, sensors);
    modes.set_manual(cli.speed, cli.accel);

    let mut pipeline = Pipeline::new(config, library, playback_tx, rng);
    for tx in event_txs {
        pipeline.subscribe(tx);
    }

    let initial = Mode::from(cli.mode);
    let coord = Coordinator::new(pipeline, modes, clock, control_rx, sample_rx);
    handles.push(thread::Builder::new().name("coordinator".into()).spawn(move || {
        let pipeline = coord.run(initial);
        if let Some(b) = pipeline.behavior() {
            info!("Final behavior: {}", b);
        }
    }).unwrap());

    if cli.play {
        let _ = control_tx.send(Command::StartPlayback);
    }

    // ─── Console input (main thread) ────────────────────────────────
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "q" {
            break;
        }
        match Command::parse(line) {
            Ok(cmd) => {
                if control_tx.send(cmd).is_err() {
                    break;
                }
            }
            Err(e) => warn!("{}", e),
        }
    }

    info!("Shutting down...");
    drop(control_tx);
    for h in handles {
        let _ = h.join();
    }
}
