use crate::error::{ErrorKind, PipelineError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

// ─── Raw readings from sample sources ───────────────────────────────────────

/// Where a raw reading came from. Simulated readings are already clean and
/// skip the moving average; sensor readings are smoothed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleOrigin {
    Simulation,
    Sensor,
}

/// One raw `(speed, acceleration, timestamp)` reading as pushed by a source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    /// Microseconds since session start
    pub timestamp_us: u64,
    /// km/h. `None` means the source could not measure speed this tick.
    pub speed: Option<f64>,
    /// km/h/s. `None` means "derive it from consecutive speeds".
    pub acceleration: Option<f64>,
    pub origin: SampleOrigin,
}

impl RawReading {
    pub fn simulated(timestamp_us: u64, speed: f64, acceleration: f64) -> Self {
        Self {
            timestamp_us,
            speed: Some(speed),
            acceleration: Some(acceleration),
            origin: SampleOrigin::Simulation,
        }
    }

    pub fn sensor(timestamp_us: u64, speed: Option<f64>) -> Self {
        Self {
            timestamp_us,
            speed,
            acceleration: None,
            origin: SampleOrigin::Sensor,
        }
    }

    /// A sensor tick with no usable speed (drives the decay rule).
    pub fn unknown(timestamp_us: u64) -> Self {
        Self::sensor(timestamp_us, None)
    }
}

/// A GPS position update. Converted to a speed reading by the smoother.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub timestamp_us: u64,
    pub latitude: f64,
    pub longitude: f64,
    /// Device-reported ground speed in m/s, if the receiver provides one
    pub speed_mps: Option<f64>,
    /// Horizontal accuracy radius in metres
    pub accuracy_m: f64,
}

// ─── Smoothed samples ───────────────────────────────────────────────────────

/// A smoothed, validated sample. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp_us: u64,
    /// km/h, always >= 0
    pub speed: f64,
    /// km/h/s, magnitude clamped to the configured ceiling
    pub acceleration: f64,
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={:>10}µs  v={:>6.1} km/h  a={:>+6.1} km/h/s",
            self.timestamp_us, self.speed, self.acceleration
        )
    }
}

// ─── Behavior ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedCategory {
    VeryLow,
    Low,
    Medium,
    High,
}

impl SpeedCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            SpeedCategory::VeryLow => "very_low",
            SpeedCategory::Low => "low",
            SpeedCategory::Medium => "medium",
            SpeedCategory::High => "high",
        }
    }
}

impl fmt::Display for SpeedCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified driving state, recomputed on every published sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Behavior {
    pub timestamp_us: u64,
    pub speed_category: SpeedCategory,
    pub is_accelerating: bool,
    pub is_stabilized: bool,
    /// Desired musical intensity, 0–100
    pub energy_score: u8,
    pub speed: f64,
    pub acceleration: f64,
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v={:.1} a={:+.1} cat={} acc={} stab={} energy={}",
            self.speed,
            self.acceleration,
            self.speed_category,
            self.is_accelerating,
            self.is_stabilized,
            self.energy_score,
        )
    }
}

// ─── Tracks ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyCategory {
    Low,
    Medium,
    High,
}

impl fmt::Display for EnergyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EnergyCategory::Low => "low",
            EnergyCategory::Medium => "medium",
            EnergyCategory::High => "high",
        })
    }
}

/// Track metadata. Read-only to the pipeline; `handle` is opaque and
/// only meaningful to the playback collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub energy: EnergyCategory,
    pub duration_secs: f64,
    #[serde(default)]
    pub handle: String,
}

// ─── Audio parameters ───────────────────────────────────────────────────────

/// Continuous audio controls derived from the current behavior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioParams {
    /// Playback-rate multiplier
    pub tempo_factor: f64,
    pub filter_cutoff_hz: f64,
    /// 0.0–1.0 wet ratio
    pub reverb_mix: f64,
    pub compressor_threshold_db: f64,
    pub compressor_ratio: f64,
    /// 0.0–0.5 wet ratio
    pub distortion_mix: f64,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            tempo_factor: 1.0,
            filter_cutoff_hz: MAX_FILTER_CUTOFF_HZ,
            reverb_mix: 0.0,
            compressor_threshold_db: DEFAULT_COMPRESSOR_THRESHOLD_DB,
            compressor_ratio: DEFAULT_COMPRESSOR_RATIO,
            distortion_mix: 0.0,
        }
    }
}

impl fmt::Display for AudioParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tempo={:.3} lp={:.0}Hz rev={:.2} comp={:.1}dB@{:.1}:1 dist={:.2}",
            self.tempo_factor,
            self.filter_cutoff_hz,
            self.reverb_mix,
            self.compressor_threshold_db,
            self.compressor_ratio,
            self.distortion_mix,
        )
    }
}

// ─── Modes ──────────────────────────────────────────────────────────────────

/// Which raw-sample source feeds the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    ManualSim,
    AutoSim,
    LiveSensors,
}

impl Mode {
    /// Fixed toggle cycle: ManualSim → AutoSim → LiveSensors → ManualSim.
    pub fn next(self) -> Self {
        match self {
            Mode::ManualSim => Mode::AutoSim,
            Mode::AutoSim => Mode::LiveSensors,
            Mode::LiveSensors => Mode::ManualSim,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::ManualSim => "manual-simulation",
            Mode::AutoSim => "auto-simulation",
            Mode::LiveSensors => "live-sensors",
        })
    }
}

// ─── Inter-thread messages ──────────────────────────────────────────────────

/// Payload pushed by a sample source thread.
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePayload {
    Reading(RawReading),
    Fix(GpsFix),
    /// The source gave up (device lost, log exhausted, ...).
    Lost(PipelineError),
}

/// A source payload tagged with the epoch of the source that produced it.
/// The coordinator drops events from sources that have since been stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEvent {
    pub epoch: u64,
    pub payload: SourcePayload,
}

/// Control actions from the UI / orchestration side.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Cycle to the next mode.
    ToggleMode,
    /// Move the manual-simulation "sliders".
    SetManual { speed: f64, acceleration: f64 },
    StartPlayback,
    StopPlayback,
    /// Hard-switch to a specific track.
    PlayTrack(String),
    /// The playback collaborator reports a track reached its natural end.
    TrackEnded(String),
}

impl Command {
    /// Parse one line of the interactive console:
    /// `mode`, `manual <kmh> <accel>`, `start`, `stop`, `play <id>`, `ended <id>`.
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or("empty command")?;
        let mut arg = |name: &str| -> Result<String, String> {
            words
                .next()
                .map(str::to_string)
                .ok_or_else(|| format!("{} requires <{}>", verb, name))
        };
        let number = |s: String| s.parse::<f64>().map_err(|e| format!("bad number {:?}: {}", s, e));

        match verb {
            "mode" | "m" => Ok(Command::ToggleMode),
            "manual" | "v" => {
                let speed = number(arg("kmh")?)?;
                let acceleration = match arg("accel") {
                    Ok(a) => number(a)?,
                    Err(_) => 0.0,
                };
                Ok(Command::SetManual { speed, acceleration })
            }
            "start" | "s" => Ok(Command::StartPlayback),
            "stop" | "x" => Ok(Command::StopPlayback),
            "play" | "p" => Ok(Command::PlayTrack(arg("track")?)),
            "ended" => Ok(Command::TrackEnded(arg("track")?)),
            other => Err(format!("unknown command: {}", other)),
        }
    }
}

/// Notifications the pipeline exposes to UI / orchestration consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PipelineEvent {
    BehaviorChanged(Behavior),
    ParamsChanged(AudioParams),
    TrackSwitch { from: Option<String>, to: String },
    ModeChanged(Mode),
    Error { kind: ErrorKind, message: String },
}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic clock for the drive session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Constants ──────────────────────────────────────────────────────────────

pub const MAX_FILTER_CUTOFF_HZ: f64 = 22050.0;
pub const DEFAULT_COMPRESSOR_THRESHOLD_DB: f64 = -24.0;
pub const DEFAULT_COMPRESSOR_RATIO: f64 = 4.0;
pub const KMH_PER_MPS: f64 = 3.6;

pub fn secs_to_us(secs: f64) -> u64 {
    (secs.max(0.0) * 1_000_000.0) as u64
}

pub fn us_to_secs(us: u64) -> f64 {
    us as f64 / 1_000_000.0
}
