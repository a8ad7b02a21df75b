use crate::config::PipelineConfig;
use crate::crossfade::PlaybackSession;
use crate::random::RandomSource;
use crate::types::*;
use log::debug;

/// Multiple of the acceleration threshold that forces a switch on its own
const HARD_ACCEL_FACTOR: f64 = 1.5;

/// Decides when the music should change track, and to what.
///
/// Switching is rate-limited by a cooldown measured from the session's last
/// track change. Once the cooldown has passed, a switch fires on hard
/// acceleration or on a speed-category change into or out of `high`.
pub struct TrackSelector {
    acceleration_threshold: f64,
    cooldown_us: u64,
    /// Category seen at the last evaluation past cooldown
    last_category: Option<SpeedCategory>,
}

impl TrackSelector {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            acceleration_threshold: config.acceleration_threshold,
            cooldown_us: secs_to_us(config.track_cooldown_s),
            last_category: None,
        }
    }

    /// Forget the remembered category (new playback session).
    pub fn reset(&mut self) {
        self.last_category = None;
    }

    pub fn should_switch(
        &mut self,
        behavior: &Behavior,
        session: &mut PlaybackSession,
        now_us: u64,
    ) -> bool {
        let category = behavior.speed_category;
        let Some(last_change) = session.last_track_change_us else {
            // first observation only arms the cooldown
            session.mark_track_change(now_us);
            self.last_category = Some(category);
            return false;
        };

        if now_us.saturating_sub(last_change) < self.cooldown_us {
            debug!(
                "Track switch held: {:.1}s since last change",
                us_to_secs(now_us.saturating_sub(last_change))
            );
            return false;
        }

        let hard_accel = behavior.acceleration > HARD_ACCEL_FACTOR * self.acceleration_threshold;
        let crossed_high = match self.last_category {
            Some(prev) => {
                prev != category && (prev == SpeedCategory::High || category == SpeedCategory::High)
            }
            None => false,
        };
        self.last_category = Some(category);

        if hard_accel || crossed_high {
            debug!(
                "Track switch triggered (hard_accel={}, crossed_high={})",
                hard_accel, crossed_high
            );
            session.mark_track_change(now_us);
            true
        } else {
            false
        }
    }

    /// Uniform pick among tracks of the target energy, excluding the active
    /// track; any other track if none match. `None` if the library has no
    /// other track.
    pub fn pick_next<'a>(
        &self,
        behavior: &Behavior,
        tracks: &'a [Track],
        session: &PlaybackSession,
        rng: &mut dyn RandomSource,
    ) -> Option<&'a Track> {
        let target = target_energy(behavior);
        let others: Vec<&Track> = tracks
            .iter()
            .filter(|t| t.id != session.active_track_id)
            .collect();
        let matching: Vec<&Track> = others.iter().copied().filter(|t| t.energy == target).collect();

        let candidates = if matching.is_empty() { others } else { matching };
        if candidates.is_empty() {
            return None;
        }
        Some(candidates[rng.pick_index(candidates.len())])
    }
}

pub fn target_energy(behavior: &Behavior) -> EnergyCategory {
    if behavior.is_accelerating {
        EnergyCategory::High
    } else if behavior.is_stabilized && behavior.speed_category == SpeedCategory::High {
        EnergyCategory::Medium
    } else if matches!(
        behavior.speed_category,
        SpeedCategory::Low | SpeedCategory::VeryLow
    ) {
        EnergyCategory::Low
    } else {
        EnergyCategory::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{energy_score, speed_category};
    use crate::random::ScriptedRandom;
    use proptest::prelude::*;

    const SEC: u64 = 1_000_000;

    fn behavior(speed: f64, acceleration: f64) -> Behavior {
        Behavior {
            timestamp_us: 0,
            speed_category: speed_category(speed),
            is_accelerating: acceleration > 10.0,
            is_stabilized: false,
            energy_score: energy_score(speed, acceleration),
            speed,
            acceleration,
        }
    }

    fn track(id: &str, energy: EnergyCategory) -> Track {
        Track {
            id: id.into(),
            name: id.into(),
            energy,
            duration_secs: 30.0,
            handle: String::new(),
        }
    }

    #[test]
    fn test_first_observation_arms_cooldown() {
        let mut sel = TrackSelector::new(&PipelineConfig::default());
        let mut session = PlaybackSession::new("a");
        assert!(!sel.should_switch(&behavior(100.0, 40.0), &mut session, 3 * SEC));
        assert_eq!(session.last_track_change_us, Some(3 * SEC));
    }

    #[test]
    fn test_cooldown_blocks_hard_acceleration() {
        let mut sel = TrackSelector::new(&PipelineConfig::default());
        let mut session = PlaybackSession::new("a");
        sel.should_switch(&behavior(30.0, 0.0), &mut session, 0);
        assert!(!sel.should_switch(&behavior(30.0, 20.0), &mut session, 9 * SEC));
        assert!(sel.should_switch(&behavior(30.0, 20.0), &mut session, 10 * SEC));
        assert_eq!(session.last_track_change_us, Some(10 * SEC));
    }

    #[test]
    fn test_hard_accel_threshold_is_strict() {
        let mut sel = TrackSelector::new(&PipelineConfig::default());
        let mut session = PlaybackSession::new("a");
        sel.should_switch(&behavior(30.0, 0.0), &mut session, 0);
        assert!(!sel.should_switch(&behavior(30.0, 15.0), &mut session, 20 * SEC));
        assert!(sel.should_switch(&behavior(30.0, 15.1), &mut session, 21 * SEC));
    }

    #[test]
    fn test_category_change_must_involve_high() {
        let mut sel = TrackSelector::new(&PipelineConfig::default());
        let mut session = PlaybackSession::new("a");
        sel.should_switch(&behavior(10.0, 0.0), &mut session, 0);
        // very_low → low: no
        assert!(!sel.should_switch(&behavior(30.0, 0.0), &mut session, 11 * SEC));
        // low → medium: no
        assert!(!sel.should_switch(&behavior(60.0, 0.0), &mut session, 12 * SEC));
        // medium → high: yes
        assert!(sel.should_switch(&behavior(90.0, 0.0), &mut session, 13 * SEC));
        // high → medium after cooldown: yes
        assert!(sel.should_switch(&behavior(70.0, 0.0), &mut session, 23 * SEC));
    }

    #[test]
    fn test_target_energy_mapping() {
        assert_eq!(target_energy(&behavior(30.0, 12.0)), EnergyCategory::High);
        let mut cruising = behavior(100.0, 0.0);
        cruising.is_stabilized = true;
        assert_eq!(target_energy(&cruising), EnergyCategory::Medium);
        assert_eq!(target_energy(&behavior(100.0, 0.0)), EnergyCategory::Medium);
        assert_eq!(target_energy(&behavior(10.0, 0.0)), EnergyCategory::Low);
        assert_eq!(target_energy(&behavior(45.0, 0.0)), EnergyCategory::Low);
        assert_eq!(target_energy(&behavior(60.0, 0.0)), EnergyCategory::Medium);
    }

    #[test]
    fn test_pick_prefers_matching_energy_excluding_active() {
        let sel = TrackSelector::new(&PipelineConfig::default());
        let tracks = vec![
            track("a", EnergyCategory::Low),
            track("b", EnergyCategory::High),
            track("c", EnergyCategory::Low),
        ];
        let session = PlaybackSession::new("a");
        let mut rng = ScriptedRandom::new(vec![0.0, 0.99]);
        let b = behavior(10.0, 0.0);
        assert_eq!(sel.pick_next(&b, &tracks, &session, &mut rng).unwrap().id, "c");
        assert_eq!(sel.pick_next(&b, &tracks, &session, &mut rng).unwrap().id, "c");
    }

    #[test]
    fn test_pick_falls_back_to_any_other_track() {
        let sel = TrackSelector::new(&PipelineConfig::default());
        let tracks = vec![
            track("a", EnergyCategory::Low),
            track("b", EnergyCategory::Low),
            track("c", EnergyCategory::Medium),
        ];
        let session = PlaybackSession::new("a");
        let mut rng = ScriptedRandom::new(vec![0.99]);
        // wants high; none exist
        let picked = sel.pick_next(&behavior(30.0, 20.0), &tracks, &session, &mut rng);
        assert_eq!(picked.unwrap().id, "c");
    }

    #[test]
    fn test_pick_single_track_library() {
        let sel = TrackSelector::new(&PipelineConfig::default());
        let tracks = vec![track("a", EnergyCategory::High)];
        let session = PlaybackSession::new("a");
        let mut rng = ScriptedRandom::new(vec![0.5]);
        assert!(sel.pick_next(&behavior(30.0, 20.0), &tracks, &session, &mut rng).is_none());
    }

    proptest! {
        #[test]
        fn prop_never_two_switches_within_cooldown(
            steps in proptest::collection::vec((0.0f64..160.0, -30.0f64..40.0, 0u64..4_000_000), 1..80)
        ) {
            let mut sel = TrackSelector::new(&PipelineConfig::default());
            let mut session = PlaybackSession::new("a");
            let mut now = 0u64;
            let mut last_switch: Option<u64> = None;
            for (speed, accel, dt) in steps {
                now += dt;
                if sel.should_switch(&behavior(speed, accel), &mut session, now) {
                    if let Some(prev) = last_switch {
                        prop_assert!(now - prev >= 10 * SEC);
                    }
                    last_switch = Some(now);
                }
            }
        }
    }
}
