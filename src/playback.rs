//! The seam between the pipeline and whatever actually makes sound.
//!
//! The pipeline never touches audio buffers or gain nodes. It issues
//! `PlaybackCommand`s; a sink forwards them (over a channel to the OSC
//! bridge, or into a Vec in tests).

use crate::types::{AudioParams, Track};
use crossbeam_channel::Sender;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum PlaybackCommand {
    SetTempo { factor: f64 },
    SetFilterCutoff { hz: f64 },
    SetReverbMix { mix: f64 },
    SetCompressor { threshold_db: f64, ratio: f64 },
    SetDistortion { mix: f64 },
    /// Begin playing a track at the given gain.
    StartTrack { track_id: String, handle: String, gain: f64 },
    /// Linear gain ramp from the current value to `target`.
    RampGain { track_id: String, target: f64, duration_ms: u64 },
    /// Stop the track and free its playback resource.
    ReleaseTrack { track_id: String },
    StopAll,
}

pub trait PlaybackSink {
    fn send_command(&mut self, cmd: PlaybackCommand);

    fn set_tempo(&mut self, factor: f64) {
        self.send_command(PlaybackCommand::SetTempo { factor });
    }

    fn set_filter_cutoff(&mut self, hz: f64) {
        self.send_command(PlaybackCommand::SetFilterCutoff { hz });
    }

    fn set_reverb_mix(&mut self, mix: f64) {
        self.send_command(PlaybackCommand::SetReverbMix { mix });
    }

    fn set_compressor(&mut self, threshold_db: f64, ratio: f64) {
        self.send_command(PlaybackCommand::SetCompressor { threshold_db, ratio });
    }

    fn set_distortion(&mut self, mix: f64) {
        self.send_command(PlaybackCommand::SetDistortion { mix });
    }

    fn start_track(&mut self, track: &Track, gain: f64) {
        self.send_command(PlaybackCommand::StartTrack {
            track_id: track.id.clone(),
            handle: track.handle.clone(),
            gain,
        });
    }

    fn ramp_gain(&mut self, track_id: &str, target: f64, duration_ms: u64) {
        self.send_command(PlaybackCommand::RampGain {
            track_id: track_id.to_string(),
            target,
            duration_ms,
        });
    }

    fn release_track(&mut self, track_id: &str) {
        self.send_command(PlaybackCommand::ReleaseTrack {
            track_id: track_id.to_string(),
        });
    }

    fn stop_all(&mut self) {
        self.send_command(PlaybackCommand::StopAll);
    }

    fn apply_params(&mut self, params: &AudioParams) {
        self.set_tempo(params.tempo_factor);
        self.set_filter_cutoff(params.filter_cutoff_hz);
        self.set_reverb_mix(params.reverb_mix);
        self.set_compressor(params.compressor_threshold_db, params.compressor_ratio);
        self.set_distortion(params.distortion_mix);
    }
}

impl PlaybackSink for Sender<PlaybackCommand> {
    fn send_command(&mut self, cmd: PlaybackCommand) {
        // Receiver gone means playback output was shut down; nothing to do.
        let _ = self.send(cmd);
    }
}

/// In-memory sink: records every command in order.
impl PlaybackSink for Vec<PlaybackCommand> {
    fn send_command(&mut self, cmd: PlaybackCommand) {
        self.push(cmd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_params_emits_every_control() {
        let mut sink: Vec<PlaybackCommand> = Vec::new();
        sink.apply_params(&AudioParams::default());
        assert_eq!(sink.len(), 5);
        assert_eq!(sink[0], PlaybackCommand::SetTempo { factor: 1.0 });
        assert_eq!(
            sink[3],
            PlaybackCommand::SetCompressor { threshold_db: -24.0, ratio: 4.0 }
        );
    }

    #[test]
    fn test_channel_sink_survives_closed_receiver() {
        let (mut tx, rx) = crossbeam_channel::unbounded::<PlaybackCommand>();
        drop(rx);
        tx.stop_all();
    }

    #[test]
    fn test_command_json_shape() {
        let json = serde_json::to_string(&PlaybackCommand::ReleaseTrack {
            track_id: "a".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"cmd":"release_track","track_id":"a"}"#);
    }
}
