use crate::mode::{SampleSource, SourceContext};
use crate::random::RandomSource;
use crate::types::*;
use crossbeam_channel::{select, Receiver};
use log::{debug, info};
use std::time::Duration;

// ─── Manual simulation ──────────────────────────────────────────────────────

/// Re-emits the manual speed/acceleration "sliders" every tick, and
/// immediately whenever they move.
pub struct ManualSource {
    values: (f64, f64),
    updates: Receiver<(f64, f64)>,
    tick: Duration,
}

impl ManualSource {
    pub fn new(initial: (f64, f64), updates: Receiver<(f64, f64)>, tick: Duration) -> Self {
        Self {
            values: initial,
            updates,
            tick,
        }
    }

    fn emit(&self, ctx: &SourceContext) -> bool {
        let (speed, acceleration) = self.values;
        ctx.send(SourcePayload::Reading(RawReading::simulated(
            ctx.now_us(),
            speed,
            acceleration,
        )))
    }
}

impl SampleSource for ManualSource {
    fn name(&self) -> &str {
        "manual"
    }

    fn run(&mut self, ctx: SourceContext) {
        info!(
            "Manual simulation at {:.0} km/h, {:+.1} km/h/s",
            self.values.0, self.values.1
        );
        if !self.emit(&ctx) {
            return;
        }
        loop {
            select! {
                recv(ctx.stop_signal()) -> _ => break,
                recv(self.updates) -> msg => match msg {
                    Ok(values) => {
                        debug!("Manual sliders → {:.0} km/h, {:+.1} km/h/s", values.0, values.1);
                        self.values = values;
                    }
                    Err(_) => break,
                },
                default(self.tick) => {}
            }
            if !self.emit(&ctx) {
                break;
            }
        }
        debug!("Manual simulation stopped");
    }
}

// ─── Drive profiles ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveProfile {
    pub name: &'static str,
    /// km/h
    pub max_speed: f64,
    /// km/h/s, positive
    pub acceleration: f64,
    /// km/h/s, negative
    pub deceleration: f64,
    pub stable_ms: f64,
    /// 0 = drive straight off again without stopping
    pub stop_ms: f64,
}

pub const CITY: DriveProfile = DriveProfile {
    name: "city",
    max_speed: 50.0,
    acceleration: 10.0,
    deceleration: -8.0,
    stable_ms: 5000.0,
    stop_ms: 2000.0,
};

pub const HIGHWAY: DriveProfile = DriveProfile {
    name: "highway",
    max_speed: 90.0,
    acceleration: 4.0,
    deceleration: -5.0,
    stable_ms: 15000.0,
    stop_ms: 0.0,
};

/// Probability that a re-acceleration picks the highway profile
const HIGHWAY_BIAS: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrivePhase {
    Accelerating,
    Stable,
    Decelerating,
    Stopped,
}

/// Scripted drive: accelerate to the profile's top speed, cruise, brake,
/// optionally wait, and go again with a freshly drawn profile.
pub struct DriveSimulator {
    profile: DriveProfile,
    phase: DrivePhase,
    phase_ms: f64,
    phase_elapsed_ms: f64,
    speed: f64,
    acceleration: f64,
    rng: Box<dyn RandomSource>,
}

impl DriveSimulator {
    pub fn new(mut rng: Box<dyn RandomSource>) -> Self {
        let profile = pick_profile(rng.as_mut());
        info!("Drive profile: {}", profile.name);
        Self {
            profile,
            phase: DrivePhase::Accelerating,
            phase_ms: ramp_ms(&profile),
            phase_elapsed_ms: 0.0,
            speed: 0.0,
            acceleration: 0.0,
            rng,
        }
    }

    pub fn profile(&self) -> &DriveProfile {
        &self.profile
    }

    pub fn phase(&self) -> DrivePhase {
        self.phase
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Advance by `dt_ms`. Returns the new `(speed, acceleration)`.
    pub fn step(&mut self, dt_ms: f64) -> (f64, f64) {
        self.phase_elapsed_ms += dt_ms;
        let halted = self.phase == DrivePhase::Decelerating && self.speed <= 1.0;
        if self.phase_elapsed_ms >= self.phase_ms || halted {
            self.phase_elapsed_ms = 0.0;
            self.advance_phase();
        }

        let dt_s = dt_ms / 1000.0;
        let p = self.profile;
        match self.phase {
            DrivePhase::Accelerating => {
                self.acceleration = p.acceleration;
                self.speed = (self.speed + p.acceleration * dt_s).min(p.max_speed);
            }
            DrivePhase::Stable => {
                self.acceleration = 0.0;
                let jitter = (self.rng.next_f64() - 0.5) * 2.0;
                self.speed = (self.speed + jitter).clamp(p.max_speed * 0.9, p.max_speed);
            }
            DrivePhase::Decelerating => {
                self.acceleration = p.deceleration;
                self.speed = (self.speed + p.deceleration * dt_s).max(0.0);
            }
            DrivePhase::Stopped => {
                self.acceleration = 0.0;
                self.speed = 0.0;
            }
        }
        (self.speed, self.acceleration)
    }

    fn advance_phase(&mut self) {
        match self.phase {
            DrivePhase::Accelerating => {
                self.phase = DrivePhase::Stable;
                self.phase_ms = self.profile.stable_ms;
            }
            DrivePhase::Stable => {
                self.phase = DrivePhase::Decelerating;
                self.phase_ms = self.speed / self.profile.deceleration.abs() * 1000.0;
            }
            // keep braking until actually (nearly) stopped
            DrivePhase::Decelerating if self.speed > 1.0 => {}
            DrivePhase::Decelerating if self.profile.stop_ms > 0.0 => {
                self.phase = DrivePhase::Stopped;
                self.phase_ms = self.profile.stop_ms;
                self.speed = 0.0;
            }
            DrivePhase::Decelerating | DrivePhase::Stopped => self.reaccelerate(),
        }
        debug!(
            "Drive phase {:?} ({}) for {:.1}s",
            self.phase,
            self.profile.name,
            self.phase_ms / 1000.0
        );
    }

    fn reaccelerate(&mut self) {
        self.profile = pick_profile(self.rng.as_mut());
        self.phase = DrivePhase::Accelerating;
        self.phase_ms = ramp_ms(&self.profile);
        info!("Drive profile: {}", self.profile.name);
    }
}

fn pick_profile(rng: &mut dyn RandomSource) -> DriveProfile {
    if rng.next_f64() > 1.0 - HIGHWAY_BIAS {
        HIGHWAY
    } else {
        CITY
    }
}

/// Time to reach top speed from a standstill.
fn ramp_ms(p: &DriveProfile) -> f64 {
    p.max_speed / p.acceleration * 1000.0
}

// ─── Automatic simulation ───────────────────────────────────────────────────

pub struct AutoSimSource {
    sim: DriveSimulator,
    tick: Duration,
}

impl AutoSimSource {
    pub fn new(sim: DriveSimulator, tick: Duration) -> Self {
        Self { sim, tick }
    }
}

impl SampleSource for AutoSimSource {
    fn name(&self) -> &str {
        "auto"
    }

    fn run(&mut self, ctx: SourceContext) {
        info!("Auto simulation starting ({})", self.sim.profile().name);
        let dt_ms = self.tick.as_secs_f64() * 1000.0;
        while ctx.wait(self.tick) {
            let (speed, acceleration) = self.sim.step(dt_ms);
            let reading = RawReading::simulated(ctx.now_us(), speed, acceleration);
            if !ctx.send(SourcePayload::Reading(reading)) {
                break;
            }
        }
        debug!("Auto simulation stopped");
    }
}
