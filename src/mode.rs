//! Mode control: which raw-sample source feeds the pipeline.
//!
//! Each source runs on its own thread and pushes `SourceEvent`s tagged with
//! the epoch it was started under. Switching modes stops and joins the old
//! thread before the next one starts, and bumps the epoch so anything the
//! old source left in the channel is ignored.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::random;
use crate::sensors::{Access, SensorProvider};
use crate::simulator::{AutoSimSource, DriveSimulator, ManualSource};
use crate::types::*;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use log::{info, warn};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A raw-sample source. `run` blocks until the context reports a stop.
pub trait SampleSource: Send {
    fn name(&self) -> &str;
    fn run(&mut self, ctx: SourceContext);
}

/// What a running source needs: a clock, an output, and a stop signal.
pub struct SourceContext {
    epoch: u64,
    clock: SessionClock,
    tx: Sender<SourceEvent>,
    stop_rx: Receiver<()>,
}

impl SourceContext {
    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Fires (disconnects) when the source must stop.
    pub fn stop_signal(&self) -> &Receiver<()> {
        &self.stop_rx
    }

    /// Push a payload. Returns false once stopped, never blocks past a stop.
    pub fn send(&self, payload: SourcePayload) -> bool {
        let event = SourceEvent {
            epoch: self.epoch,
            payload,
        };
        select! {
            send(self.tx, event) -> res => res.is_ok(),
            recv(self.stop_rx) -> _ => false,
        }
    }

    /// Sleep for `timeout`. Returns false if a stop arrived meanwhile.
    pub fn wait(&self, timeout: Duration) -> bool {
        matches!(
            self.stop_rx.recv_timeout(timeout),
            Err(crossbeam_channel::RecvTimeoutError::Timeout)
        )
    }
}

/// A running source thread.
pub struct SourceHandle {
    name: String,
    stop_tx: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl SourceHandle {
    pub fn spawn(
        mut source: Box<dyn SampleSource>,
        epoch: u64,
        clock: SessionClock,
        tx: Sender<SourceEvent>,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = unbounded::<()>();
        let name = source.name().to_string();
        let ctx = SourceContext {
            epoch,
            clock,
            tx,
            stop_rx,
        };
        let join = thread::Builder::new()
            .name(format!("source-{}", name))
            .spawn(move || source.run(ctx))?;
        Ok(Self {
            name,
            stop_tx: Some(stop_tx),
            join: Some(join),
        })
    }

    /// Signal the thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("Source {} panicked", self.name);
            }
        }
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Result of a mode change.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub mode: Mode,
    /// Set when the requested mode could not be entered and the controller
    /// fell back to manual simulation.
    pub error: Option<PipelineError>,
}

/// Cycles `ManualSim → AutoSim → LiveSensors → ManualSim` and owns the
/// source thread of the active mode.
pub struct ModeController {
    mode: Mode,
    epoch: u64,
    active: Option<SourceHandle>,
    tx: Sender<SourceEvent>,
    clock: SessionClock,
    sensors: Box<dyn SensorProvider>,
    tick: Duration,
    seed: Option<u64>,
    manual: (f64, f64),
    manual_tx: Option<Sender<(f64, f64)>>,
}

impl ModeController {
    pub fn new(
        config: &PipelineConfig,
        clock: SessionClock,
        tx: Sender<SourceEvent>,
        sensors: Box<dyn SensorProvider>,
    ) -> Self {
        Self {
            mode: Mode::ManualSim,
            epoch: 0,
            active: None,
            tx,
            clock,
            sensors,
            tick: Duration::from_millis(config.sim_tick_ms.max(1)),
            seed: config.seed,
            manual: (0.0, 0.0),
            manual_tx: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// True if `epoch` belongs to the source that is running now.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.active.is_some() && epoch == self.epoch
    }

    pub fn toggle(&mut self) -> Transition {
        self.enter(self.mode.next())
    }

    /// Tear down the current source, then start the one for `target`.
    /// Live sensors that cannot be opened fall back to manual simulation.
    pub fn enter(&mut self, target: Mode) -> Transition {
        self.stop_source();

        let error = match target {
            Mode::ManualSim => self.start_manual().err(),
            Mode::AutoSim => self.start_auto().err(),
            Mode::LiveSensors => self.start_live().err(),
        };

        let mode = match &error {
            Some(e) if target == Mode::LiveSensors => {
                warn!("{}; falling back to {}", e, Mode::ManualSim);
                self.stop_source();
                // manual simulation has no failure mode worth surfacing twice
                let _ = self.start_manual();
                Mode::ManualSim
            }
            Some(e) => {
                warn!("Could not start {}: {}", target, e);
                target
            }
            None => target,
        };
        self.mode = mode;
        info!("Mode: {}", mode);
        Transition { mode, error }
    }

    /// The live source reported it is gone. Falls back to manual
    /// simulation if that source is still the active one.
    pub fn source_lost(&mut self, epoch: u64, err: PipelineError) -> Option<Transition> {
        if !self.is_current(epoch) || self.mode != Mode::LiveSensors {
            return None;
        }
        warn!("Live source lost: {}", err);
        let mut t = self.enter(Mode::ManualSim);
        t.error = Some(err);
        Some(t)
    }

    /// Move the manual-simulation sliders. Takes effect immediately when
    /// manual simulation is running, and is remembered otherwise.
    pub fn set_manual(&mut self, speed: f64, acceleration: f64) {
        self.manual = (speed, acceleration);
        if let Some(tx) = &self.manual_tx {
            let _ = tx.send(self.manual);
        }
    }

    pub fn shutdown(&mut self) {
        self.stop_source();
    }

    fn stop_source(&mut self) {
        self.manual_tx = None;
        if let Some(mut handle) = self.active.take() {
            handle.stop();
        }
    }

    fn start(&mut self, source: Box<dyn SampleSource>) -> Result<(), PipelineError> {
        self.epoch += 1;
        let handle = SourceHandle::spawn(source, self.epoch, self.clock.clone(), self.tx.clone())
            .map_err(|e| PipelineError::SensorUnavailable(format!("spawn source: {}", e)))?;
        self.active = Some(handle);
        Ok(())
    }

    fn start_manual(&mut self) -> Result<(), PipelineError> {
        let (tx, rx) = unbounded();
        self.start(Box::new(ManualSource::new(self.manual, rx, self.tick)))?;
        self.manual_tx = Some(tx);
        Ok(())
    }

    fn start_auto(&mut self) -> Result<(), PipelineError> {
        let rng = random::from_seed(self.seed.map(|s| s.wrapping_add(self.epoch)));
        let sim = DriveSimulator::new(rng);
        self.start(Box::new(AutoSimSource::new(sim, self.tick)))
    }

    fn start_live(&mut self) -> Result<(), PipelineError> {
        info!("Requesting sensor access from {}", self.sensors.describe());
        match self.sensors.request_access() {
            Access::Granted(source) => self.start(source),
            Access::Denied(msg) => Err(PipelineError::PermissionDenied(msg)),
            Access::Unavailable(msg) => Err(PipelineError::SensorUnavailable(msg)),
        }
    }
}

impl Drop for ModeController {
    fn drop(&mut self) {
        self.stop_source();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::UnavailableProvider;
    use crossbeam_channel::bounded;

    fn controller() -> (ModeController, Receiver<SourceEvent>) {
        let (tx, rx) = bounded(64);
        let config = PipelineConfig {
            sim_tick_ms: 10,
            seed: Some(3),
            ..Default::default()
        };
        let mc = ModeController::new(
            &config,
            SessionClock::new(),
            tx,
            Box::new(UnavailableProvider::new("no gps in tests")),
        );
        (mc, rx)
    }

    #[test]
    fn test_toggle_cycles_and_bumps_epoch() {
        let (mut mc, _rx) = controller();
        assert_eq!(mc.enter(Mode::ManualSim).mode, Mode::ManualSim);
        let e1 = mc.epoch();
        assert_eq!(mc.toggle().mode, Mode::AutoSim);
        assert!(mc.epoch() > e1);
        assert!(!mc.is_current(e1));
        mc.shutdown();
    }

    #[test]
    fn test_live_unavailable_falls_back_to_manual() {
        let (mut mc, _rx) = controller();
        mc.enter(Mode::AutoSim);
        let t = mc.toggle();
        assert_eq!(t.mode, Mode::ManualSim);
        assert!(matches!(t.error, Some(PipelineError::SensorUnavailable(_))));
        assert_eq!(mc.mode(), Mode::ManualSim);
        mc.shutdown();
    }

    #[test]
    fn test_manual_source_emits_slider_values() {
        let (mut mc, rx) = controller();
        mc.set_manual(42.0, 1.5);
        mc.enter(Mode::ManualSim);
        let epoch = mc.epoch();
        let ev = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(ev.epoch, epoch);
        match ev.payload {
            SourcePayload::Reading(r) => {
                assert_eq!(r.speed, Some(42.0));
                assert_eq!(r.acceleration, Some(1.5));
            }
            other => panic!("unexpected payload {:?}", other),
        }

        mc.set_manual(70.0, 0.0);
        let got_update = (0..500).any(|_| {
            matches!(
                rx.recv_timeout(Duration::from_secs(1)).map(|e| e.payload),
                Ok(SourcePayload::Reading(r)) if r.speed == Some(70.0)
            )
        });
        assert!(got_update);
        mc.shutdown();
    }

    #[test]
    fn test_stopped_source_stays_silent() {
        let (mut mc, rx) = controller();
        mc.enter(Mode::AutoSim);
        mc.shutdown();
        while rx.try_recv().is_ok() {}
        std::thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_source_lost_ignored_outside_live_mode() {
        let (mut mc, _rx) = controller();
        mc.enter(Mode::AutoSim);
        let epoch = mc.epoch();
        assert!(mc
            .source_lost(epoch, PipelineError::SensorUnavailable("x".into()))
            .is_none());
        mc.shutdown();
    }
}
