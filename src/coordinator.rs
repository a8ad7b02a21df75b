use crate::error::PipelineError;
use crate::mode::{ModeController, Transition};
use crate::pipeline::Pipeline;
use crate::playback::PlaybackSink;
use crate::types::*;
use crossbeam_channel::{select, Receiver};
use log::{debug, info, trace, warn};
use std::time::Duration;

/// The coordinator owns the pipeline and the mode controller and is the
/// only thread that touches either. It multiplexes two inputs:
///
/// - `Command`s from the UI side (mode toggle, sliders, playback control).
///   The loop ends when this channel closes.
/// - `SourceEvent`s from whichever sample source is running. Events from a
///   source that has since been stopped are dropped by epoch.
///
/// Between inputs it wakes every `poll_interval` to fire due crossfade
/// releases and, in live mode, to notice when the sensor has gone quiet.
pub struct Coordinator<S: PlaybackSink> {
    pipeline: Pipeline<S>,
    modes: ModeController,
    clock: SessionClock,
    control_rx: Receiver<Command>,
    sample_rx: Receiver<SourceEvent>,
    poll_interval: Duration,
    stale_after_us: u64,
    /// Last real input or injected decay tick in live mode
    last_input_us: u64,
    stale_reported: bool,
}

impl<S: PlaybackSink> Coordinator<S> {
    pub fn new(
        pipeline: Pipeline<S>,
        modes: ModeController,
        clock: SessionClock,
        control_rx: Receiver<Command>,
        sample_rx: Receiver<SourceEvent>,
    ) -> Self {
        let stale_after_us = secs_to_us(pipeline.config().stale_after_s);
        Self {
            pipeline,
            modes,
            clock,
            control_rx,
            sample_rx,
            poll_interval: Duration::from_millis(100),
            stale_after_us,
            last_input_us: 0,
            stale_reported: false,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enter `initial` and process inputs until the control channel closes.
    /// Returns the pipeline so callers can inspect the final state.
    pub fn run(mut self, initial: Mode) -> Pipeline<S> {
        info!("Coordinator running");
        self.change_mode(|modes| Some(modes.enter(initial)));

        let mut events: u64 = 0;
        loop {
            select! {
                recv(self.control_rx) -> msg => match msg {
                    Ok(cmd) => self.handle_command(cmd),
                    Err(_) => break,
                },
                recv(self.sample_rx) -> msg => {
                    if let Ok(ev) = msg {
                        self.handle_source(ev);
                        events += 1;
                        if events % 100 == 0 {
                            debug!("Coordinator: {} source events processed", events);
                        }
                    }
                },
                default(self.poll_interval) => {}
            }
            let now = self.clock.now_us();
            self.pipeline.poll(now);
            self.check_stale(now);
        }

        self.modes.shutdown();
        self.pipeline.stop_playback();
        info!("Coordinator shutting down after {} source events", events);
        self.pipeline
    }

    fn handle_command(&mut self, cmd: Command) {
        debug!("Command: {:?}", cmd);
        let now = self.clock.now_us();
        match cmd {
            Command::ToggleMode => self.change_mode(|modes| Some(modes.toggle())),
            Command::SetManual { speed, acceleration } => {
                if !speed.is_finite() || speed < 0.0 || !acceleration.is_finite() {
                    let err = PipelineError::InvalidSample(format!(
                        "manual speed {} / acceleration {}",
                        speed, acceleration
                    ));
                    warn!("{}", err);
                    self.pipeline.report(&err);
                    return;
                }
                self.modes.set_manual(speed, acceleration);
            }
            Command::StartPlayback => {
                self.pipeline.start_playback();
            }
            Command::StopPlayback => self.pipeline.stop_playback(),
            Command::PlayTrack(id) => {
                self.pipeline.play_track(&id, now);
            }
            Command::TrackEnded(id) => self.pipeline.track_ended(&id),
        }
    }

    fn handle_source(&mut self, ev: SourceEvent) {
        if !self.modes.is_current(ev.epoch) {
            trace!("Dropping event from stopped source (epoch {})", ev.epoch);
            return;
        }
        self.last_input_us = self.clock.now_us();
        self.stale_reported = false;

        // bad samples are reported by the pipeline and otherwise ignored
        match ev.payload {
            SourcePayload::Reading(r) => {
                let _ = self.pipeline.ingest(&r);
            }
            SourcePayload::Fix(f) => {
                let _ = self.pipeline.ingest_fix(&f);
            }
            SourcePayload::Lost(err) => {
                let epoch = ev.epoch;
                self.change_mode(move |modes| modes.source_lost(epoch, err));
            }
        }
    }

    /// In live mode, a silent sensor degrades the speed estimate instead of
    /// freezing it: every `stale_after` without input injects an "unknown"
    /// reading so the decay rule runs.
    fn check_stale(&mut self, now: u64) {
        if self.modes.mode() != Mode::LiveSensors {
            return;
        }
        let silent_us = now.saturating_sub(self.last_input_us);
        if silent_us < self.stale_after_us {
            return;
        }
        if !self.stale_reported {
            let err = PipelineError::StaleData {
                seconds: us_to_secs(silent_us),
            };
            warn!("{}", err);
            self.pipeline.report(&err);
            self.stale_reported = true;
        }
        if self.pipeline.last_sample_us().is_some_and(|t| t > now) {
            return;
        }
        let _ = self.pipeline.ingest(&RawReading::unknown(now));
        self.last_input_us = now;
    }

    fn change_mode<F>(&mut self, f: F)
    where
        F: FnOnce(&mut ModeController) -> Option<Transition>,
    {
        let Some(t) = f(&mut self.modes) else {
            return;
        };
        self.pipeline.reset();
        self.last_input_us = self.clock.now_us();
        self.stale_reported = false;
        self.pipeline.emit(PipelineEvent::ModeChanged(t.mode));
        if let Some(err) = t.error {
            self.pipeline.report(&err);
        }
    }
}
