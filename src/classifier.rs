//! Driving-behavior classification.
//!
//! Pure functions of the speed history and config: identical inputs always
//! give identical behavior, so everything here is table-testable.

use crate::config::PipelineConfig;
use crate::smoother::SpeedHistory;
use crate::types::*;

/// Speed bins: `<20 very_low, <50 low, <80 medium, else high`.
///
/// No hysteresis, so the category can flicker when speed hovers on a
/// boundary.
pub fn speed_category(speed: f64) -> SpeedCategory {
    if speed < 20.0 {
        SpeedCategory::VeryLow
    } else if speed < 50.0 {
        SpeedCategory::Low
    } else if speed < 80.0 {
        SpeedCategory::Medium
    } else {
        SpeedCategory::High
    }
}

/// 0–100 intensity: up to 70 points from speed (saturating at 120 km/h)
/// plus up to 30 from positive acceleration.
pub fn energy_score(speed: f64, acceleration: f64) -> u8 {
    let speed_score = (speed / 120.0 * 70.0).min(70.0);
    let accel_bonus = (acceleration.max(0.0) * 3.0).min(30.0);
    let score = (speed_score + accel_bonus).round();
    if score.is_nan() {
        return 0;
    }
    score.clamp(0.0, 100.0) as u8
}

/// At least 3 samples inside the trailing stabilization window, all within
/// `stabilization_threshold` km/h of each other. The window is measured
/// back from the newest sample, not the wall clock.
pub fn is_stabilized(history: &SpeedHistory, config: &PipelineConfig) -> bool {
    let Some(latest) = history.latest() else {
        return false;
    };
    let window_us = secs_to_us(config.stabilization_duration_s);
    let cutoff = latest.timestamp_us.saturating_sub(window_us);

    let mut count = 0usize;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for s in history.iter().rev().take_while(|s| s.timestamp_us >= cutoff) {
        count += 1;
        min = min.min(s.speed);
        max = max.max(s.speed);
    }

    count >= 3 && max - min <= config.stabilization_threshold
}

/// Classify the newest sample in `history`. `None` for an empty history.
pub fn classify(history: &SpeedHistory, config: &PipelineConfig) -> Option<Behavior> {
    let latest = history.latest()?;
    Some(Behavior {
        timestamp_us: latest.timestamp_us,
        speed_category: speed_category(latest.speed),
        is_accelerating: latest.acceleration > config.acceleration_threshold,
        is_stabilized: is_stabilized(history, config),
        energy_score: energy_score(latest.speed, latest.acceleration),
        speed: latest.speed,
        acceleration: latest.acceleration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SEC: u64 = 1_000_000;

    fn history(points: &[(u64, f64, f64)]) -> SpeedHistory {
        points
            .iter()
            .map(|&(t, speed, acceleration)| Sample {
                timestamp_us: t * SEC,
                speed,
                acceleration,
            })
            .collect()
    }

    #[test]
    fn test_speed_category_table() {
        let cases = [
            (0.0, SpeedCategory::VeryLow),
            (19.99, SpeedCategory::VeryLow),
            (20.0, SpeedCategory::Low),
            (48.0, SpeedCategory::Low),
            (50.0, SpeedCategory::Medium),
            (79.9, SpeedCategory::Medium),
            (80.0, SpeedCategory::High),
            (250.0, SpeedCategory::High),
        ];
        for (speed, expected) in cases {
            assert_eq!(speed_category(speed), expected, "speed={}", speed);
        }
    }

    #[test]
    fn test_energy_score_table() {
        let cases = [
            (100.0, 5.0, 73),
            (0.0, 0.0, 0),
            (120.0, 0.0, 70),
            (200.0, 50.0, 100),
            (60.0, -20.0, 35),
            (0.0, 10.0, 30),
        ];
        for (speed, accel, expected) in cases {
            assert_eq!(energy_score(speed, accel), expected, "v={} a={}", speed, accel);
        }
    }

    #[test]
    fn test_stabilized_needs_three_samples() {
        let cfg = PipelineConfig::default();
        assert!(!is_stabilized(&history(&[(0, 60.0, 0.0), (1, 60.0, 0.0)]), &cfg));
        assert!(is_stabilized(
            &history(&[(0, 60.0, 0.0), (1, 61.0, 0.0), (2, 63.0, 0.0)]),
            &cfg
        ));
    }

    #[test]
    fn test_stabilized_ignores_old_samples() {
        let cfg = PipelineConfig::default();
        // the 20 km/h sample is 8s old, outside the 5s window
        let h = history(&[(0, 20.0, 0.0), (8, 60.0, 0.0), (9, 62.0, 0.0), (10, 64.0, 0.0)]);
        assert!(is_stabilized(&h, &cfg));
        // only two samples in the window
        let h = history(&[(0, 60.0, 0.0), (1, 60.0, 0.0), (9, 60.0, 0.0), (10, 60.0, 0.0)]);
        assert!(!is_stabilized(&h, &cfg));
    }

    #[test]
    fn test_stabilized_rejects_wide_spread() {
        let cfg = PipelineConfig::default();
        let h = history(&[(0, 60.0, 0.0), (1, 63.0, 0.0), (2, 65.1, 0.0)]);
        assert!(!is_stabilized(&h, &cfg));
    }

    #[test]
    fn test_classify_scenario() {
        let cfg = PipelineConfig::default();
        let h = history(&[
            (0, 0.0, 0.0),
            (1, 0.0, 0.0),
            (2, 0.0, 0.0),
            (3, 40.0, 30.0),
            (4, 45.0, 5.0),
            (5, 48.0, 3.0),
        ]);
        let b = classify(&h, &cfg).unwrap();
        assert!(!b.is_accelerating);
        assert_eq!(b.speed_category, SpeedCategory::Low);
        assert!(!b.is_stabilized);
        assert_eq!(b.timestamp_us, 5 * SEC);
    }

    #[test]
    fn test_classify_empty() {
        assert!(classify(&SpeedHistory::new(20), &PipelineConfig::default()).is_none());
    }

    proptest! {
        #[test]
        fn prop_energy_score_bounded(speed in 0.0f64..1000.0, accel in -100.0f64..100.0) {
            let e = energy_score(speed, accel);
            prop_assert!(e <= 100);
        }

        #[test]
        fn prop_speed_category_monotonic(a in 0.0f64..300.0, b in 0.0f64..300.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(speed_category(lo) as u8 <= speed_category(hi) as u8);
        }

        #[test]
        fn prop_classify_is_reproducible(speeds in proptest::collection::vec(0.0f64..150.0, 1..30)) {
            let cfg = PipelineConfig::default();
            let h: SpeedHistory = speeds
                .iter()
                .enumerate()
                .map(|(i, &v)| Sample { timestamp_us: i as u64 * SEC, speed: v, acceleration: 0.0 })
                .collect();
            prop_assert_eq!(classify(&h, &cfg), classify(&h, &cfg));
            prop_assert!(h.len() <= 20);
        }
    }
}
