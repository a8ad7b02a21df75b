use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::geo::haversine_m;
use crate::types::*;
use log::{debug, trace};
use std::collections::VecDeque;

/// Bounded FIFO of recent samples. Oldest entries are evicted once the
/// capacity is reached.
#[derive(Debug, Clone)]
pub struct SpeedHistory {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl SpeedHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl FromIterator<Sample> for SpeedHistory {
    /// Builds a history sized to the default capacity; mostly for tests
    /// and replays.
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        let mut h = SpeedHistory::new(PipelineConfig::default().history_capacity);
        for s in iter {
            h.push(s);
        }
        h
    }
}

/// Result of feeding one raw reading through the smoother.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ingest {
    /// Speed moved enough to matter; propagate downstream.
    Published(Sample),
    /// Noise-level change. Recorded in history with the previously
    /// published speed, but nothing is emitted this tick.
    Suppressed(Sample),
}

impl Ingest {
    pub fn sample(&self) -> &Sample {
        match self {
            Ingest::Published(s) | Ingest::Suppressed(s) => s,
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, Ingest::Published(_))
    }
}

/// How a measured speed is smoothed before publication.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Smoothing {
    /// Simulated or decayed values: used as-is.
    Raw,
    /// Trailing moving average over the last `smoothing_window` readings.
    MovingAverage,
    /// Moving average, then averaged with the previous smoothed value.
    /// Used for speeds derived from position deltas.
    TwoPoint,
}

/// Turns raw speed readings and GPS fixes into validated, smoothed samples
/// and appends them to the speed history.
///
/// Per reading:
///   1. Reject non-finite / negative / out-of-order input (history untouched)
///   2. Smooth the speed, or decay the last known speed when unavailable
///   3. Use the supplied acceleration, or derive it from the previous
///      smoothed speed, clamped to the configured ceiling
///   4. Gate noise: publish only on a real change or a moving/stopped flip.
///      Simulated readings are exact and always publish.
pub struct SampleSmoother {
    smoothing_window: usize,
    noise_threshold: f64,
    moving_threshold: f64,
    acceleration_ceiling: f64,
    decay_factor: f64,
    decay_interval_s: f64,
    spike_limit: f64,
    spike_ratio: f64,
    gps_max_gap_s: f64,

    history: SpeedHistory,
    /// Raw sensor speeds feeding the moving average
    window: VecDeque<f64>,
    /// Previous smoothed speed and its timestamp (acceleration reference)
    last_smoothed: Option<(f64, u64)>,
    /// Last actually measured speed and when (decay reference)
    last_known: Option<(f64, u64)>,
    last_published: Option<f64>,
    published_count: u64,
    last_timestamp_us: Option<u64>,
    prev_fix: Option<GpsFix>,
}

impl SampleSmoother {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            smoothing_window: config.smoothing_window.max(1),
            noise_threshold: config.noise_threshold,
            moving_threshold: config.moving_threshold,
            acceleration_ceiling: config.acceleration_ceiling.abs(),
            decay_factor: config.decay_factor.clamp(0.0, 1.0),
            decay_interval_s: config.decay_interval_s,
            spike_limit: config.spike_limit,
            spike_ratio: config.spike_ratio,
            gps_max_gap_s: config.gps_max_gap_s,
            history: SpeedHistory::new(config.history_capacity),
            window: VecDeque::with_capacity(config.smoothing_window.max(1)),
            last_smoothed: None,
            last_known: None,
            last_published: None,
            published_count: 0,
            last_timestamp_us: None,
            prev_fix: None,
        }
    }

    pub fn history(&self) -> &SpeedHistory {
        &self.history
    }

    /// Timestamp of the most recent accepted reading.
    pub fn last_timestamp_us(&self) -> Option<u64> {
        self.last_timestamp_us
    }

    /// Forget everything learned from the current source.
    pub fn reset(&mut self) {
        self.history.clear();
        self.window.clear();
        self.last_smoothed = None;
        self.last_known = None;
        self.last_published = None;
        self.published_count = 0;
        self.last_timestamp_us = None;
        self.prev_fix = None;
    }

    /// Feed a raw `(speed, acceleration, timestamp)` reading.
    pub fn ingest(&mut self, reading: &RawReading) -> Result<Ingest, PipelineError> {
        if let Some(speed) = reading.speed {
            if !speed.is_finite() || speed < 0.0 {
                return Err(PipelineError::InvalidSample(format!("speed {}", speed)));
            }
        }
        if let Some(accel) = reading.acceleration {
            if !accel.is_finite() {
                return Err(PipelineError::InvalidSample(format!("acceleration {}", accel)));
            }
        }
        self.check_timestamp(reading.timestamp_us)?;

        let (smoothing, gated) = match reading.origin {
            SampleOrigin::Simulation => (Smoothing::Raw, false),
            SampleOrigin::Sensor => (Smoothing::MovingAverage, true),
        };
        Ok(self.accept(
            reading.timestamp_us,
            reading.speed,
            reading.acceleration,
            smoothing,
            gated,
        ))
    }

    /// Feed a GPS position update. Speed comes from the receiver when it
    /// reports a plausible value, otherwise from the haversine distance to
    /// the previous fix.
    pub fn ingest_fix(&mut self, fix: &GpsFix) -> Result<Ingest, PipelineError> {
        if !fix.latitude.is_finite() || !fix.longitude.is_finite() {
            return Err(PipelineError::InvalidSample(format!(
                "position ({}, {})",
                fix.latitude, fix.longitude
            )));
        }
        if let Some(s) = fix.speed_mps {
            if !s.is_finite() {
                return Err(PipelineError::InvalidSample(format!("gps speed {}", s)));
            }
        }
        self.check_timestamp(fix.timestamp_us)?;

        let device_kmh = fix.speed_mps.filter(|s| *s >= 0.0).map(|s| s * KMH_PER_MPS);
        let derived_kmh = self.prev_fix.and_then(|prev| {
            let dt = us_to_secs(fix.timestamp_us.saturating_sub(prev.timestamp_us));
            if dt > 0.0 && dt < self.gps_max_gap_s {
                let d = haversine_m(prev.latitude, prev.longitude, fix.latitude, fix.longitude);
                Some(d / dt * KMH_PER_MPS)
            } else {
                None
            }
        });
        self.prev_fix = Some(*fix);

        let (speed, smoothing) = match (device_kmh, derived_kmh) {
            (device, Some(calc)) if device.is_none() || (device < Some(3.0) && calc > 5.0) => {
                let mut calc = calc;
                if calc > self.spike_limit {
                    let prev = self.last_smoothed.map(|(v, _)| v).unwrap_or(0.0);
                    calc = calc.min(prev * self.spike_ratio);
                    debug!("gps: capped speed spike to {:.1} km/h", calc);
                }
                (Some(calc), Smoothing::TwoPoint)
            }
            (device, _) => (device, Smoothing::MovingAverage),
        };

        Ok(self.accept(fix.timestamp_us, speed, None, smoothing, true))
    }

    /// Speed estimate while no measurement is available: the last known
    /// speed loses `1 - decay_factor` of its value per whole decay interval.
    pub fn decayed_speed(&self, now_us: u64) -> f64 {
        match self.last_known {
            Some((speed, at)) => {
                let elapsed = us_to_secs(now_us.saturating_sub(at));
                let steps = if self.decay_interval_s > 0.0 {
                    (elapsed / self.decay_interval_s).floor()
                } else {
                    0.0
                };
                (speed * self.decay_factor.powf(steps)).max(0.0)
            }
            None => 0.0,
        }
    }

    fn check_timestamp(&self, ts: u64) -> Result<(), PipelineError> {
        match self.last_timestamp_us {
            Some(last) if ts < last => Err(PipelineError::InvalidSample(format!(
                "timestamp {}µs before previous {}µs",
                ts, last
            ))),
            _ => Ok(()),
        }
    }

    fn accept(
        &mut self,
        ts: u64,
        measured: Option<f64>,
        supplied_accel: Option<f64>,
        smoothing: Smoothing,
        gated: bool,
    ) -> Ingest {
        let speed = match measured {
            Some(raw) => {
                let smoothed = self.smooth(raw, smoothing);
                self.last_known = Some((smoothed, ts));
                smoothed
            }
            None => {
                let decayed = self.decayed_speed(ts);
                trace!("speed unavailable, decayed estimate {:.1} km/h", decayed);
                decayed
            }
        };

        let acceleration = supplied_accel
            .unwrap_or_else(|| self.derive_acceleration(speed, ts))
            .clamp(-self.acceleration_ceiling, self.acceleration_ceiling);

        self.last_smoothed = Some((speed, ts));
        self.last_timestamp_us = Some(ts);

        let result = if !gated || self.should_publish(speed) {
            self.last_published = Some(speed);
            self.published_count += 1;
            Ingest::Published(Sample {
                timestamp_us: ts,
                speed,
                acceleration,
            })
        } else {
            let retained = self.last_published.unwrap_or(speed);
            debug!("suppressed noise: {:.2} km/h (published {:.2})", speed, retained);
            Ingest::Suppressed(Sample {
                timestamp_us: ts,
                speed: retained,
                acceleration,
            })
        };

        self.history.push(*result.sample());
        result
    }

    fn smooth(&mut self, raw: f64, smoothing: Smoothing) -> f64 {
        if smoothing == Smoothing::Raw {
            return raw;
        }

        self.window.push_back(raw);
        while self.window.len() > self.smoothing_window {
            self.window.pop_front();
        }
        let avg = self.window.iter().sum::<f64>() / self.window.len() as f64;

        match (smoothing, self.last_smoothed) {
            (Smoothing::TwoPoint, Some((prev, _))) if prev > 0.0 => (avg + prev) / 2.0,
            _ => avg,
        }
    }

    fn derive_acceleration(&self, speed: f64, ts: u64) -> f64 {
        match self.last_smoothed {
            Some((prev_speed, prev_ts)) if ts > prev_ts => {
                (speed - prev_speed) / us_to_secs(ts - prev_ts)
            }
            // Duplicate timestamp or first sample
            _ => 0.0,
        }
    }

    fn should_publish(&self, speed: f64) -> bool {
        if self.published_count < 2 {
            return true;
        }
        match self.last_published {
            Some(prev) => {
                let moved = (speed >= self.moving_threshold) != (prev >= self.moving_threshold);
                (speed - prev).abs() > self.noise_threshold || moved
            }
            None => true,
        }
    }
}
