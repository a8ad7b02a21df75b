use crate::playback::PlaybackCommand;
use crossbeam_channel::Receiver;
use log::{debug, error, info};
use rosc::{OscMessage, OscPacket, OscType};
use std::net::UdpSocket;

/// Bridges playback commands to an external audio engine over OSC/UDP.
///
/// | Address                 | Args                                  |
/// |-------------------------|---------------------------------------|
/// | `/groove/tempo`         | factor                                |
/// | `/groove/filter`        | cutoff Hz                             |
/// | `/groove/reverb`        | mix                                   |
/// | `/groove/compressor`    | threshold dB, ratio                   |
/// | `/groove/distortion`    | mix                                   |
/// | `/groove/track/start`   | track id, handle, gain                |
/// | `/groove/track/ramp`    | track id, target gain, duration ms    |
/// | `/groove/track/release` | track id                              |
/// | `/groove/stop`          | (none)                                |
pub struct OscSender {
    rx: Receiver<PlaybackCommand>,
    target: String,
}

impl OscSender {
    pub fn new(rx: Receiver<PlaybackCommand>, target: String) -> Self {
        Self { rx, target }
    }

    /// Run the OSC sender loop. Blocks the calling thread.
    pub fn run(&self) {
        let socket = match UdpSocket::bind("0.0.0.0:0") {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to bind UDP socket: {}", e);
                return;
            }
        };
        info!("OSC sender → {}", self.target);

        for cmd in self.rx.iter() {
            if let Err(e) = self.send(&socket, &to_message(&cmd)) {
                debug!("OSC send error: {}", e);
            }
        }
        info!("OSC sender shutting down");
    }

    fn send(&self, socket: &UdpSocket, msg: &OscMessage) -> Result<(), Box<dyn std::error::Error>> {
        let buf = rosc::encoder::encode(&OscPacket::Message(msg.clone()))?;
        socket.send_to(&buf, &self.target)?;
        Ok(())
    }
}

pub fn to_message(cmd: &PlaybackCommand) -> OscMessage {
    let (addr, args) = match cmd {
        PlaybackCommand::SetTempo { factor } => ("/groove/tempo", vec![float(*factor)]),
        PlaybackCommand::SetFilterCutoff { hz } => ("/groove/filter", vec![float(*hz)]),
        PlaybackCommand::SetReverbMix { mix } => ("/groove/reverb", vec![float(*mix)]),
        PlaybackCommand::SetCompressor {
            threshold_db,
            ratio,
        } => (
            "/groove/compressor",
            vec![float(*threshold_db), float(*ratio)],
        ),
        PlaybackCommand::SetDistortion { mix } => ("/groove/distortion", vec![float(*mix)]),
        PlaybackCommand::StartTrack {
            track_id,
            handle,
            gain,
        } => (
            "/groove/track/start",
            vec![
                OscType::String(track_id.clone()),
                OscType::String(handle.clone()),
                float(*gain),
            ],
        ),
        PlaybackCommand::RampGain {
            track_id,
            target,
            duration_ms,
        } => (
            "/groove/track/ramp",
            vec![
                OscType::String(track_id.clone()),
                float(*target),
                OscType::Int(i32::try_from(*duration_ms).unwrap_or(i32::MAX)),
            ],
        ),
        PlaybackCommand::ReleaseTrack { track_id } => (
            "/groove/track/release",
            vec![OscType::String(track_id.clone())],
        ),
        PlaybackCommand::StopAll => ("/groove/stop", vec![]),
    };
    OscMessage {
        addr: addr.to_string(),
        args,
    }
}

fn float(v: f64) -> OscType {
    OscType::Float(v as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressor_message() {
        let msg = to_message(&PlaybackCommand::SetCompressor {
            threshold_db: -34.0,
            ratio: 8.0,
        });
        assert_eq!(msg.addr, "/groove/compressor");
        assert_eq!(msg.args, vec![OscType::Float(-34.0), OscType::Float(8.0)]);
    }

    #[test]
    fn test_ramp_message() {
        let msg = to_message(&PlaybackCommand::RampGain {
            track_id: "b".into(),
            target: 0.8,
            duration_ms: 3000,
        });
        assert_eq!(msg.addr, "/groove/track/ramp");
        assert_eq!(msg.args[0], OscType::String("b".into()));
        assert_eq!(msg.args[2], OscType::Int(3000));
    }

    #[test]
    fn test_messages_encode() {
        let msg = to_message(&PlaybackCommand::StopAll);
        assert_eq!(msg.addr, "/groove/stop");
        assert!(rosc::encoder::encode(&OscPacket::Message(msg)).is_ok());
    }
}
