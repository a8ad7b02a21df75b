use crate::playback::PlaybackSink;
use crate::types::*;
use log::{debug, info};
use thiserror::Error;

/// What is playing right now. Created on playback start, dropped on stop.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSession {
    pub active_track_id: String,
    /// Outgoing track while a crossfade is in flight
    pub secondary_track_id: Option<String>,
    /// When the track last changed; `None` until the first behavior arrives
    pub last_track_change_us: Option<u64>,
}

impl PlaybackSession {
    pub fn new(active_track_id: impl Into<String>) -> Self {
        Self {
            active_track_id: active_track_id.into(),
            secondary_track_id: None,
            last_track_change_us: None,
        }
    }

    /// Record a track change. Never moves the timestamp backwards.
    pub fn mark_track_change(&mut self, now_us: u64) {
        let t = self.last_track_change_us.map_or(now_us, |prev| prev.max(now_us));
        self.last_track_change_us = Some(t);
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CrossfadeError {
    #[error("crossfade {from} → {to} already in flight")]
    InFlight { from: String, to: String },
    #[error("cannot crossfade track {0} into itself")]
    SameTrack(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Crossfade {
    pub from: String,
    pub to: String,
    pub started_us: u64,
    pub duration_us: u64,
}

impl Crossfade {
    pub fn deadline_us(&self) -> u64 {
        self.started_us + self.duration_us
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FadeState {
    Idle,
    Fading(Crossfade),
}

/// Runs `Idle → Fading → Idle` transitions between two tracks.
///
/// Starting a fade starts the incoming track at gain 0, ramps it to the
/// default volume while the outgoing track ramps to 0, and switches the
/// session's active track immediately. The outgoing track's release is the
/// one deferred operation: it fires from `poll` once the deadline passes,
/// or immediately from `cancel`. Either way it happens exactly once.
///
/// Only one fade may be in flight; overlapping requests are rejected.
pub struct CrossfadeScheduler {
    volume: f64,
    state: FadeState,
}

impl CrossfadeScheduler {
    pub fn new(volume: f64) -> Self {
        Self {
            volume,
            state: FadeState::Idle,
        }
    }

    pub fn is_fading(&self) -> bool {
        matches!(self.state, FadeState::Fading(_))
    }

    pub fn start<S: PlaybackSink + ?Sized>(
        &mut self,
        session: &mut PlaybackSession,
        from: &Track,
        to: &Track,
        duration_ms: u64,
        now_us: u64,
        sink: &mut S,
    ) -> Result<(), CrossfadeError> {
        if let FadeState::Fading(fade) = &self.state {
            return Err(CrossfadeError::InFlight {
                from: fade.from.clone(),
                to: fade.to.clone(),
            });
        }
        if from.id == to.id {
            return Err(CrossfadeError::SameTrack(to.id.clone()));
        }

        sink.start_track(to, 0.0);
        sink.ramp_gain(&to.id, self.volume, duration_ms);
        sink.ramp_gain(&from.id, 0.0, duration_ms);

        session.active_track_id = to.id.clone();
        session.secondary_track_id = Some(from.id.clone());

        self.state = FadeState::Fading(Crossfade {
            from: from.id.clone(),
            to: to.id.clone(),
            started_us: now_us,
            duration_us: duration_ms * 1000,
        });
        info!("Crossfade {} → {} over {}ms", from.id, to.id, duration_ms);
        Ok(())
    }

    /// Fire the deferred release if its deadline has passed. Returns the
    /// released track id.
    pub fn poll<S: PlaybackSink + ?Sized>(
        &mut self,
        now_us: u64,
        session: &mut PlaybackSession,
        sink: &mut S,
    ) -> Option<String> {
        match &self.state {
            FadeState::Fading(fade) if now_us >= fade.deadline_us() => {
                debug!("Crossfade complete, releasing {}", fade.from);
                self.finish(session, sink)
            }
            _ => None,
        }
    }

    /// Cancel a pending release: the stale outgoing source is released now.
    pub fn cancel<S: PlaybackSink + ?Sized>(
        &mut self,
        session: &mut PlaybackSession,
        sink: &mut S,
    ) -> Option<String> {
        if self.is_fading() {
            debug!("Crossfade cancelled");
        }
        self.finish(session, sink)
    }

    fn finish<S: PlaybackSink + ?Sized>(
        &mut self,
        session: &mut PlaybackSession,
        sink: &mut S,
    ) -> Option<String> {
        match std::mem::replace(&mut self.state, FadeState::Idle) {
            FadeState::Fading(fade) => {
                sink.release_track(&fade.from);
                if session.secondary_track_id.as_deref() == Some(fade.from.as_str()) {
                    session.secondary_track_id = None;
                }
                Some(fade.from)
            }
            FadeState::Idle => None,
        }
    }
}
