use crate::types::*;
use crossbeam_channel::Receiver;
use std::io::{self, Write};
use std::time::{Duration, Instant};

const INNER: usize = 58;

/// Latest view of the pipeline, folded from its event stream.
#[derive(Debug, Clone, Default)]
pub struct Dashboard {
    pub mode: Option<Mode>,
    pub behavior: Option<Behavior>,
    pub params: AudioParams,
    pub track: Option<String>,
    pub previous_track: Option<String>,
    pub switches: u32,
    pub last_error: Option<String>,
}

impl Dashboard {
    pub fn apply(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::BehaviorChanged(b) => self.behavior = Some(*b),
            PipelineEvent::ParamsChanged(p) => self.params = *p,
            PipelineEvent::TrackSwitch { from, to } => {
                self.previous_track = from.clone();
                self.track = Some(to.clone());
                self.switches += 1;
            }
            PipelineEvent::ModeChanged(m) => {
                self.mode = Some(*m);
                self.behavior = None;
            }
            PipelineEvent::Error { kind, message } => {
                self.last_error = Some(format!("{:?}: {}", kind, message));
            }
        }
    }
}

/// Renders a live ASCII dashboard of the drive and the music it drives.
pub struct ConsoleDisplay {
    rx: Receiver<PipelineEvent>,
    update_hz: u32,
}

impl ConsoleDisplay {
    pub fn new(rx: Receiver<PipelineEvent>, update_hz: u32) -> Self {
        Self { rx, update_hz }
    }

    pub fn run(&self) {
        let period = Duration::from_millis(1000 / u64::from(self.update_hz.max(1)));
        let mut state = Dashboard::default();
        let mut last_draw: Option<Instant> = None;
        let mut stdout = io::stdout();

        for event in self.rx.iter() {
            state.apply(&event);
            if last_draw.is_some_and(|t| t.elapsed() < period) {
                continue;
            }
            last_draw = Some(Instant::now());

            // Clear screen and move cursor home
            print!("\x1b[2J\x1b[H{}", render(&state));
            let _ = stdout.flush();
        }
    }
}

pub fn render(state: &Dashboard) -> String {
    let mut out = String::new();
    let border = "═".repeat(INNER);
    out.push_str(&format!("╔{}╗\n", border));
    row(&mut out, "DRIVE GROOVE  Live Monitor");
    out.push_str(&format!("╠{}╣\n", border));

    let mode = state.mode.map_or("---".to_string(), |m| m.to_string());
    row(&mut out, &format!("Mode: {}", mode));
    row(&mut out, "");

    match &state.behavior {
        Some(b) => {
            row(&mut out, &format!("Speed: {:>6.1} km/h   Accel: {:>+6.1} km/h/s", b.speed, b.acceleration));
            row(&mut out, &format!("Energy: {} {:>3}", make_bar(f64::from(b.energy_score) / 100.0, 30), b.energy_score));
            let flags = [
                (b.is_accelerating, "ACCEL"),
                (b.is_stabilized, "STABLE"),
            ]
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(" ");
            row(&mut out, &format!("Category: {:<9} {}", b.speed_category, flags));
        }
        None => {
            row(&mut out, "Speed: --- (waiting for samples)");
            row(&mut out, "");
            row(&mut out, "");
        }
    }

    row(&mut out, "");
    row(&mut out, "Audio:");
    let p = &state.params;
    row(&mut out, &format!("  Tempo:  x{:.3}", p.tempo_factor));
    row(&mut out, &format!("  Filter: {} {:>5.0} Hz", make_bar(p.filter_cutoff_hz / MAX_FILTER_CUTOFF_HZ, 24), p.filter_cutoff_hz));
    row(&mut out, &format!("  Reverb: {} {:>3.0}%", make_bar(p.reverb_mix, 24), p.reverb_mix * 100.0));
    row(&mut out, &format!("  Comp:   {:.1} dB @ {:.1}:1   Dist: {:.0}%", p.compressor_threshold_db, p.compressor_ratio, p.distortion_mix * 100.0));

    row(&mut out, "");
    match &state.track {
        Some(id) => row(&mut out, &format!("Track: {}  ({} switches)", id, state.switches)),
        None => row(&mut out, "Track: --- (stopped)"),
    }
    if let Some(prev) = &state.previous_track {
        row(&mut out, &format!("  from: {}", prev));
    }
    if let Some(err) = &state.last_error {
        row(&mut out, "");
        row(&mut out, &format!("! {}", err));
    }

    out.push_str(&format!("╚{}╝\n", border));
    out
}

/// One boxed line, padded or truncated by char count.
fn row(out: &mut String, text: &str) {
    let width = INNER - 2;
    let mut line: String = text.chars().take(width).collect();
    let pad = width - line.chars().count();
    line.push_str(&" ".repeat(pad));
    out.push_str(&format!("║  {}║\n", line));
}

fn make_bar(val: f64, width: usize) -> String {
    let filled = ((val.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
    let empty = width - filled;
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}
