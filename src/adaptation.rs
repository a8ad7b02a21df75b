use crate::types::*;
use serde::{Deserialize, Serialize};

/// How the tempo factor is derived from the behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TempoStrategy {
    /// Piecewise-linear in raw speed, clamped to [0.7, 1.5].
    SpeedPiecewise,
    /// Linear in energy score between 0.8 and 1.3.
    EnergyScore,
}

pub const TEMPO_MIN: f64 = 0.7;
pub const TEMPO_MAX: f64 = 1.5;
pub const ENERGY_TEMPO_MIN: f64 = 0.8;
pub const ENERGY_TEMPO_MAX: f64 = 1.3;

/// |acceleration| (km/h/s) above which the dynamics section engages
const DYNAMICS_ACCEL_THRESHOLD: f64 = 10.0;

/// Maps a behavior onto continuous audio controls. Stateless: the output
/// depends only on the behavior handed in.
#[derive(Debug, Clone, Copy)]
pub struct AdaptationEngine {
    strategy: TempoStrategy,
}

impl AdaptationEngine {
    pub fn new(strategy: TempoStrategy) -> Self {
        Self { strategy }
    }

    pub fn adapt(&self, behavior: &Behavior) -> AudioParams {
        let speed = behavior.speed.max(0.0);
        let tempo_factor = match self.strategy {
            TempoStrategy::SpeedPiecewise => tempo_from_speed(speed),
            TempoStrategy::EnergyScore => tempo_from_energy(behavior.energy_score),
        };
        let (compressor_threshold_db, compressor_ratio, distortion_mix) =
            dynamics(behavior.acceleration);

        AudioParams {
            tempo_factor,
            filter_cutoff_hz: filter_cutoff(speed),
            reverb_mix: reverb_mix(speed),
            compressor_threshold_db,
            compressor_ratio,
            distortion_mix,
        }
    }
}

impl Default for AdaptationEngine {
    fn default() -> Self {
        Self::new(TempoStrategy::SpeedPiecewise)
    }
}

/// Slow crawl 0.85–1.1, town 1.0–1.25, open road 1.25 upward.
pub fn tempo_from_speed(speed: f64) -> f64 {
    let tempo = if speed < 5.0 {
        0.85 + speed / 20.0
    } else if speed < 30.0 {
        1.0 + (speed - 5.0) / 100.0
    } else {
        1.25 + (speed - 30.0) / 200.0
    };
    tempo.clamp(TEMPO_MIN, TEMPO_MAX)
}

pub fn tempo_from_energy(energy_score: u8) -> f64 {
    let range = ENERGY_TEMPO_MAX - ENERGY_TEMPO_MIN;
    (ENERGY_TEMPO_MIN + f64::from(energy_score) / 100.0 * range)
        .clamp(ENERGY_TEMPO_MIN, ENERGY_TEMPO_MAX)
}

/// Low-pass cutoff opens up with speed.
pub fn filter_cutoff(speed: f64) -> f64 {
    let hz = if speed < 5.0 {
        1000.0 + speed * 200.0
    } else if speed < 30.0 {
        2000.0 + (speed - 5.0) * 400.0
    } else {
        12000.0 + (speed - 30.0) * 300.0
    };
    hz.min(MAX_FILTER_CUTOFF_HZ)
}

/// Reverb only while crawling.
pub fn reverb_mix(speed: f64) -> f64 {
    if speed < 5.0 {
        (0.3 - speed / 50.0).max(0.0)
    } else {
        0.0
    }
}

/// (threshold dB, ratio, distortion mix) for a given acceleration.
pub fn dynamics(acceleration: f64) -> (f64, f64, f64) {
    let a = acceleration.abs();
    if a > DYNAMICS_ACCEL_THRESHOLD {
        let threshold = (DEFAULT_COMPRESSOR_THRESHOLD_DB - (a - DYNAMICS_ACCEL_THRESHOLD)).max(-50.0);
        let ratio = (DEFAULT_COMPRESSOR_RATIO + a / 5.0).min(20.0);
        let distortion = a.min(50.0) / 100.0;
        (threshold, ratio, distortion)
    } else {
        (DEFAULT_COMPRESSOR_THRESHOLD_DB, DEFAULT_COMPRESSOR_RATIO, 0.0)
    }
}
