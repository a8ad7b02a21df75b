//! Pipeline tunables for smoothing, classification and playback.
//!
//! Every field has a default, so a config file only needs the values it
//! overrides. Loaded from JSON with `--config`.

use crate::adaptation::TempoStrategy;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // ── Classification ──
    /// km/h/s above which the driver counts as accelerating
    pub acceleration_threshold: f64,
    /// Max speed spread (km/h) for the stabilized state
    pub stabilization_threshold: f64,
    /// Window (s) the stabilized check looks back over
    pub stabilization_duration_s: f64,

    // ── Smoothing ──
    pub history_capacity: usize,
    /// Raw readings in the trailing moving average
    pub smoothing_window: usize,
    /// Minimum published-speed change (km/h) that is not noise
    pub noise_threshold: f64,
    /// Speed (km/h) separating "stopped" from "moving"
    pub moving_threshold: f64,
    /// Acceleration magnitude ceiling (km/h/s)
    pub acceleration_ceiling: f64,
    /// Multiplier applied to a stale speed once per decay interval
    pub decay_factor: f64,
    pub decay_interval_s: f64,
    /// Position-derived speeds above this (km/h) are treated as spikes
    pub spike_limit: f64,
    /// Spikes are capped at `spike_ratio ×` the previous smoothed speed
    pub spike_ratio: f64,
    /// Fixes further apart than this (s) are not used for position-delta speed
    pub gps_max_gap_s: f64,
    /// Live mode: seconds without a reading before the speed starts decaying
    pub stale_after_s: f64,

    // ── Track selection & playback ──
    pub track_cooldown_s: f64,
    pub crossfade_ms: u64,
    pub default_volume: f64,
    pub tempo_strategy: TempoStrategy,

    // ── Simulation ──
    pub sim_tick_ms: u64,
    /// Fixed seed for track/profile randomness. `None` = entropy.
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            acceleration_threshold: 10.0,
            stabilization_threshold: 5.0,
            stabilization_duration_s: 5.0,
            history_capacity: 20,
            smoothing_window: 5,
            noise_threshold: 0.5,
            moving_threshold: 1.0,
            acceleration_ceiling: 30.0,
            decay_factor: 0.9,
            decay_interval_s: 5.0,
            spike_limit: 150.0,
            spike_ratio: 1.5,
            gps_max_gap_s: 10.0,
            stale_after_s: 5.0,
            track_cooldown_s: 10.0,
            crossfade_ms: 3000,
            default_volume: 0.8,
            tempo_strategy: TempoStrategy::SpeedPiecewise,
            sim_tick_ms: 1000,
            seed: None,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file. Returns None if the file is absent or malformed.
    pub fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&data) {
            Ok(c) => {
                info!("Loaded pipeline config from {:?}", path);
                Some(c)
            }
            Err(e) => {
                warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, json)?;
        info!("Pipeline config saved to {:?}", path);
        Ok(())
    }
}
