use crate::adaptation::AdaptationEngine;
use crate::classifier;
use crate::config::PipelineConfig;
use crate::crossfade::{CrossfadeScheduler, PlaybackSession};
use crate::error::PipelineError;
use crate::library::TrackLibrary;
use crate::playback::PlaybackSink;
use crate::random::RandomSource;
use crate::selector::TrackSelector;
use crate::smoother::{Ingest, SampleSmoother, SpeedHistory};
use crate::types::*;
use crossbeam_channel::Sender;
use log::{debug, info, trace, warn};

/// The pipeline context: every stage plus the playback session, owned in
/// one place and driven synchronously, one sample at a time.
///
/// ```text
/// RawReading / GpsFix ─▶ SampleSmoother ─▶ classify ─┬─▶ AdaptationEngine ─▶ sink
///                                                    └─▶ TrackSelector ─▶ CrossfadeScheduler ─▶ sink
/// ```
///
/// Classification always runs; adaptation and track switching only while a
/// playback session exists.
pub struct Pipeline<S: PlaybackSink> {
    config: PipelineConfig,
    smoother: SampleSmoother,
    selector: TrackSelector,
    engine: AdaptationEngine,
    crossfade: CrossfadeScheduler,
    library: TrackLibrary,
    session: Option<PlaybackSession>,
    rng: Box<dyn RandomSource>,
    sink: S,
    listeners: Vec<Sender<PipelineEvent>>,
    behavior: Option<Behavior>,
    params: AudioParams,
}

impl<S: PlaybackSink> Pipeline<S> {
    pub fn new(
        config: PipelineConfig,
        library: TrackLibrary,
        sink: S,
        rng: Box<dyn RandomSource>,
    ) -> Self {
        Self {
            smoother: SampleSmoother::new(&config),
            selector: TrackSelector::new(&config),
            engine: AdaptationEngine::new(config.tempo_strategy),
            crossfade: CrossfadeScheduler::new(config.default_volume),
            config,
            library,
            session: None,
            rng,
            sink,
            listeners: Vec::new(),
            behavior: None,
            params: AudioParams::default(),
        }
    }

    pub fn subscribe(&mut self, tx: Sender<PipelineEvent>) {
        self.listeners.push(tx);
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn history(&self) -> &SpeedHistory {
        self.smoother.history()
    }

    pub fn behavior(&self) -> Option<&Behavior> {
        self.behavior.as_ref()
    }

    pub fn params(&self) -> &AudioParams {
        &self.params
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_fading(&self) -> bool {
        self.crossfade.is_fading()
    }

    pub fn library(&self) -> &TrackLibrary {
        &self.library
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Timestamp of the last accepted reading.
    pub fn last_sample_us(&self) -> Option<u64> {
        self.smoother.last_timestamp_us()
    }

    // ─── Samples ────────────────────────────────────────────────────────

    /// Run one raw reading through the pipeline. Returns the new behavior
    /// when the sample was published, `None` when it was noise.
    pub fn ingest(&mut self, reading: &RawReading) -> Result<Option<Behavior>, PipelineError> {
        trace!("ingest {:?}", reading);
        let result = self.smoother.ingest(reading);
        self.handle_ingest(result)
    }

    pub fn ingest_fix(&mut self, fix: &GpsFix) -> Result<Option<Behavior>, PipelineError> {
        trace!("ingest fix {:?}", fix);
        let result = self.smoother.ingest_fix(fix);
        self.handle_ingest(result)
    }

    fn handle_ingest(
        &mut self,
        result: Result<Ingest, PipelineError>,
    ) -> Result<Option<Behavior>, PipelineError> {
        match result {
            Ok(Ingest::Published(sample)) => Ok(self.on_sample(sample.timestamp_us)),
            Ok(Ingest::Suppressed(_)) => Ok(None),
            Err(e) => {
                warn!("{}", e);
                self.report(&e);
                Err(e)
            }
        }
    }

    fn on_sample(&mut self, now_us: u64) -> Option<Behavior> {
        let behavior = classifier::classify(self.smoother.history(), &self.config)?;
        self.behavior = Some(behavior);
        self.emit(PipelineEvent::BehaviorChanged(behavior));

        if self.session.is_some() {
            self.adapt(&behavior);
            self.maybe_switch(&behavior, now_us);
        }
        Some(behavior)
    }

    fn adapt(&mut self, behavior: &Behavior) {
        let params = self.engine.adapt(behavior);
        self.sink.apply_params(&params);
        if params != self.params {
            self.params = params;
            self.emit(PipelineEvent::ParamsChanged(params));
        }
    }

    fn maybe_switch(&mut self, behavior: &Behavior, now_us: u64) {
        if self.crossfade.is_fading() {
            debug!("Crossfade in flight, skipping track evaluation");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !self.selector.should_switch(behavior, session, now_us) {
            return;
        }

        let picked = self
            .selector
            .pick_next(behavior, self.library.tracks(), session, self.rng.as_mut())
            .cloned();
        let Some(to) = picked else {
            debug!("No other track to switch to");
            return;
        };
        let Some(from) = self.library.get(&session.active_track_id).cloned() else {
            warn!("Active track {} missing from library", session.active_track_id);
            return;
        };

        match self.crossfade.start(
            session,
            &from,
            &to,
            self.config.crossfade_ms,
            now_us,
            &mut self.sink,
        ) {
            Ok(()) => {
                info!("Track switch {} → {} ({})", from.id, to.id, behavior);
                self.emit(PipelineEvent::TrackSwitch {
                    from: Some(from.id),
                    to: to.id,
                });
            }
            Err(e) => debug!("Crossfade rejected: {}", e),
        }
    }

    // ─── Time ───────────────────────────────────────────────────────────

    /// Fire any deferred crossfade release that is due.
    pub fn poll(&mut self, now_us: u64) -> Option<String> {
        let session = self.session.as_mut()?;
        self.crossfade.poll(now_us, session, &mut self.sink)
    }

    // ─── Playback lifecycle ─────────────────────────────────────────────

    /// Start playing the first library track. Returns false if there is
    /// nothing to play or playback is already running.
    pub fn start_playback(&mut self) -> bool {
        if self.session.is_some() {
            return false;
        }
        let Some(first) = self.library.first().cloned() else {
            warn!("Track library is empty, nothing to play");
            return false;
        };

        self.selector.reset();
        self.sink.start_track(&first, self.config.default_volume);
        if let Some(b) = self.behavior {
            self.adapt(&b);
        }
        self.session = Some(PlaybackSession::new(first.id.clone()));
        info!("Playback started with {} ({})", first.id, first.name);
        self.emit(PipelineEvent::TrackSwitch {
            from: None,
            to: first.id,
        });
        true
    }

    /// Stop everything and drop the session. A pending crossfade release
    /// fires now rather than later.
    pub fn stop_playback(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.crossfade.cancel(&mut session, &mut self.sink);
        self.sink.stop_all();
        self.params = AudioParams::default();
        info!("Playback stopped (was {})", session.active_track_id);
    }

    /// Hard-switch to a specific track, starting playback if needed.
    pub fn play_track(&mut self, id: &str, now_us: u64) -> bool {
        let Some(track) = self.library.get(id).cloned() else {
            warn!("Unknown track {}", id);
            return false;
        };

        let (session, from) = match self.session.take() {
            Some(mut session) => {
                self.crossfade.cancel(&mut session, &mut self.sink);
                self.sink.stop_all();
                let prev = std::mem::replace(&mut session.active_track_id, track.id.clone());
                (session, Some(prev))
            }
            None => {
                self.selector.reset();
                (PlaybackSession::new(track.id.clone()), None)
            }
        };
        let mut session = session;
        session.mark_track_change(now_us);
        self.session = Some(session);

        self.sink.start_track(&track, self.config.default_volume);
        if let Some(b) = self.behavior {
            self.adapt(&b);
        }
        info!("Playing {} ({})", track.id, track.name);
        self.emit(PipelineEvent::TrackSwitch { from, to: track.id });
        true
    }

    /// The playback collaborator reports a track ran out. Advances to the
    /// next library track when the active one ended. The outgoing track of
    /// a crossfade is already on its way out and its end is ignored.
    pub fn track_ended(&mut self, id: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.secondary_track_id.as_deref() == Some(id) {
            debug!("Outgoing track {} ended during crossfade, ignoring", id);
            return;
        }
        if session.active_track_id != id {
            debug!("Ended track {} is not active, ignoring", id);
            return;
        }
        let Some(next) = self.library.next_after(id).cloned() else {
            return;
        };

        // incoming track ended mid-fade: the outgoing one goes now
        self.crossfade.cancel(session, &mut self.sink);
        self.sink.start_track(&next, self.config.default_volume);
        session.active_track_id = next.id.clone();
        info!("Track {} ended, advancing to {}", id, next.id);
        self.emit(PipelineEvent::TrackSwitch {
            from: Some(id.to_string()),
            to: next.id,
        });
    }

    /// Forget the current source's history (mode change).
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.behavior = None;
    }

    // ─── Events ─────────────────────────────────────────────────────────

    pub fn report(&self, err: &PipelineError) {
        self.emit(PipelineEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    pub fn emit(&self, event: PipelineEvent) {
        for tx in &self.listeners {
            let _ = tx.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::demo_library;
    use crate::playback::PlaybackCommand;
    use crate::random::ScriptedRandom;
    use crossbeam_channel::unbounded;

    const SEC: u64 = 1_000_000;

    fn pipeline() -> Pipeline<Vec<PlaybackCommand>> {
        Pipeline::new(
            PipelineConfig::default(),
            demo_library(),
            Vec::new(),
            Box::new(ScriptedRandom::new(vec![0.0])),
        )
    }

    fn drive(p: &mut Pipeline<Vec<PlaybackCommand>>, t: u64, speed: f64, accel: f64) -> Option<Behavior> {
        p.ingest(&RawReading::simulated(t * SEC, speed, accel)).unwrap()
    }

    #[test]
    fn test_classifies_without_playback() {
        let mut p = pipeline();
        let b = drive(&mut p, 0, 30.0, 0.0).unwrap();
        assert_eq!(b.speed_category, SpeedCategory::Low);
        assert!(p.sink().is_empty(), "no audio commands while stopped");
    }

    #[test]
    fn test_start_playback_plays_first_track() {
        let mut p = pipeline();
        let (tx, rx) = unbounded();
        p.subscribe(tx);
        assert!(p.start_playback());
        assert!(!p.start_playback());
        assert_eq!(p.session().unwrap().active_track_id, "synth-drum-1");
        assert_eq!(
            rx.try_recv().unwrap(),
            PipelineEvent::TrackSwitch { from: None, to: "synth-drum-1".into() }
        );
    }

    #[test]
    fn test_hard_acceleration_switches_after_cooldown() {
        let mut p = pipeline();
        p.start_playback();
        drive(&mut p, 0, 30.0, 0.0);
        drive(&mut p, 5, 35.0, 20.0);
        assert_eq!(p.session().unwrap().active_track_id, "synth-drum-1");

        drive(&mut p, 11, 40.0, 20.0);
        // accelerating → high energy, excluding the active drum track
        let session = p.session().unwrap();
        assert_eq!(session.active_track_id, "synth-energetic-1");
        assert_eq!(session.secondary_track_id.as_deref(), Some("synth-drum-1"));
        assert!(p.is_fading());

        assert_eq!(p.poll(14 * SEC), Some("synth-drum-1".into()));
        assert!(!p.is_fading());
    }

    #[test]
    fn test_invalid_sample_reported_and_dropped() {
        let mut p = pipeline();
        let (tx, rx) = unbounded();
        p.subscribe(tx);
        drive(&mut p, 1, 30.0, 0.0);
        let err = p.ingest(&RawReading::simulated(2 * SEC, f64::NAN, 0.0)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidSample);
        assert_eq!(p.history().len(), 1);
        let events: Vec<_> = rx.try_iter().collect();
        assert!(matches!(events.last(), Some(PipelineEvent::Error { .. })));
    }

    #[test]
    fn test_stop_cancels_pending_release() {
        let mut p = pipeline();
        p.start_playback();
        drive(&mut p, 0, 30.0, 0.0);
        drive(&mut p, 11, 40.0, 20.0);
        assert!(p.is_fading());

        p.stop_playback();
        assert!(p.session().is_none());
        assert!(!p.is_fading());
        let cmds = p.sink();
        let releases = cmds
            .iter()
            .filter(|c| matches!(c, PlaybackCommand::ReleaseTrack { .. }))
            .count();
        assert_eq!(releases, 1);
        assert_eq!(cmds.last(), Some(&PlaybackCommand::StopAll));
        assert_eq!(p.poll(20 * SEC), None);
    }

    #[test]
    fn test_track_end_advances_cyclically() {
        let mut p = pipeline();
        p.start_playback();
        p.track_ended("synth-drum-1");
        assert_eq!(p.session().unwrap().active_track_id, "synth-bass-1");
        // stale report for a track no longer active
        p.track_ended("synth-drum-1");
        assert_eq!(p.session().unwrap().active_track_id, "synth-bass-1");

        p.play_track("synth-calm-1", 0);
        p.track_ended("synth-calm-1");
        assert_eq!(p.session().unwrap().active_track_id, "synth-drum-1");
    }

    #[test]
    fn test_outgoing_track_end_ignored_while_fading() {
        let mut p = pipeline();
        p.start_playback();
        drive(&mut p, 0, 30.0, 0.0);
        drive(&mut p, 11, 40.0, 20.0);
        assert!(p.is_fading());
        p.track_ended("synth-drum-1");
        let session = p.session().unwrap();
        assert_eq!(session.active_track_id, "synth-energetic-1");
        assert_eq!(session.secondary_track_id.as_deref(), Some("synth-drum-1"));
        assert!(p.is_fading());
    }

    #[test]
    fn test_incoming_track_end_advances_while_fading() {
        let mut p = pipeline();
        p.start_playback();
        drive(&mut p, 0, 30.0, 0.0);
        drive(&mut p, 11, 40.0, 20.0);
        assert!(p.is_fading());

        p.track_ended("synth-energetic-1");
        let session = p.session().unwrap();
        let next = p.library().next_after("synth-energetic-1").unwrap().id.clone();
        assert_eq!(session.active_track_id, next);
        assert!(session.secondary_track_id.is_none());
        assert!(!p.is_fading());

        let releases: Vec<_> = p
            .sink()
            .iter()
            .filter_map(|c| match c {
                PlaybackCommand::ReleaseTrack { track_id } => Some(track_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(releases, ["synth-drum-1"]);
        assert_eq!(p.poll(20 * SEC), None, "release already fired");
    }

    #[test]
    fn test_steady_cruise_is_stabilized() {
        let mut p = pipeline();
        let mut last = None;
        for t in 0..10 {
            last = drive(&mut p, t, 100.0, 0.0);
            assert!(last.is_some(), "t={} not published", t);
        }
        let b = last.unwrap();
        assert!(b.is_stabilized);
        assert_eq!(b.speed_category, SpeedCategory::High);
        assert_eq!(p.history().len(), 10);
    }

    #[test]
    fn test_play_track_counts_as_change() {
        let mut p = pipeline();
        assert!(p.play_track("synth-bass-1", 4 * SEC));
        assert!(!p.play_track("nope", 5 * SEC));
        let s = p.session().unwrap();
        assert_eq!(s.active_track_id, "synth-bass-1");
        assert_eq!(s.last_track_change_us, Some(4 * SEC));
        // within cooldown of the manual pick
        drive(&mut p, 10, 40.0, 25.0);
        assert_eq!(p.session().unwrap().active_track_id, "synth-bass-1");
    }

    #[test]
    fn test_params_follow_behavior_while_playing() {
        let mut p = pipeline();
        p.start_playback();
        drive(&mut p, 0, 20.0, 0.0);
        assert!((p.params().tempo_factor - 1.15).abs() < 1e-9);
        assert!((p.params().filter_cutoff_hz - 8000.0).abs() < 1e-9);
        p.stop_playback();
        assert_eq!(*p.params(), AudioParams::default());
    }
}
