//! Inbound command envelopes.
//!
//! The control plane sends one object per command with the payload in a
//! field named after its kind. Several payload fields may be present; the
//! first match in dispatch order wins, mirroring how the control plane has
//! always been interpreted.

use crate::ProtocolError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rover_core::{Command, CorrelationId, Envelope, ServoAction, SongNote, TtsRequest};
use serde::Deserialize;

/// Raw drive payload (mm/s).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawDriveDirect {
    #[serde(default)]
    pub left: i64,
    #[serde(default)]
    pub right: i64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawMotorPwm {
    #[serde(default)]
    pub main: i64,
    #[serde(default)]
    pub side: i64,
    #[serde(default)]
    pub vacuum: i64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawSensorStream {
    #[serde(default)]
    pub enable: bool,
}

/// Shared shape of `media` and `nightVision` payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAction {
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawServo {
    pub angle: Option<f64>,
    pub nudge: Option<f64>,
    pub pulse_us: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTts {
    #[serde(default)]
    pub text: String,
    pub engine: Option<String>,
    pub voice: Option<String>,
    pub pitch: Option<i32>,
    #[serde(default)]
    pub speak: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSong {
    pub slot: Option<i64>,
    #[serde(default)]
    pub notes: Vec<SongNote>,
    #[serde(default, rename = "loop")]
    pub repeat: bool,
}

/// A command envelope as it arrives on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub id: CorrelationId,
    pub drive_direct: Option<RawDriveDirect>,
    pub motor_pwm: Option<RawMotorPwm>,
    #[serde(default)]
    pub raw: String,
    pub sensor_stream: Option<RawSensorStream>,
    pub media: Option<RawAction>,
    pub servo: Option<RawServo>,
    pub tts: Option<RawTts>,
    pub night_vision: Option<RawAction>,
    pub song: Option<RawSong>,
}

impl InboundMessage {
    /// Parses one text frame.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The id to acknowledge, or `None` if this message must not be acknowledged.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        if self.id.is_empty() {
            None
        } else {
            Some(&self.id)
        }
    }

    /// Picks the payload to act on.
    ///
    /// # Errors
    ///
    /// Returns an error for an undecodable `raw` field or a servo payload
    /// with no recognised field. Messages with no payload at all become
    /// [`Command::Unsupported`].
    pub fn into_command(self) -> Result<Command, ProtocolError> {
        if let Some(drive) = self.drive_direct {
            return Ok(Command::DriveDirect {
                left: drive.left,
                right: drive.right,
            });
        }
        if let Some(pwm) = self.motor_pwm {
            return Ok(Command::MotorPwm {
                main: pwm.main,
                side: pwm.side,
                vacuum: pwm.vacuum,
            });
        }
        if let Some(stream) = self.sensor_stream {
            return Ok(Command::SensorStream {
                enable: stream.enable,
            });
        }
        if !self.raw.is_empty() {
            return Ok(Command::Raw(BASE64.decode(self.raw.as_bytes())?));
        }
        if let Some(media) = self.media {
            return Ok(Command::Media {
                action: media.action,
            });
        }
        if let Some(servo) = self.servo {
            let action = match (servo.angle, servo.nudge, servo.pulse_us) {
                (Some(angle), _, _) => ServoAction::Angle(angle),
                (None, Some(delta), _) => ServoAction::Nudge(delta),
                (None, None, Some(pulse)) => ServoAction::PulseWidth(pulse),
                (None, None, None) => {
                    return Err(ProtocolError::InvalidPayload(
                        "servo command requires angle, nudge, or pulseUs".to_string(),
                    ))
                }
            };
            return Ok(Command::Servo(action));
        }
        if let Some(tts) = self.tts {
            return Ok(Command::Tts(TtsRequest {
                text: tts.text,
                engine: tts.engine,
                voice: tts.voice,
                pitch: tts.pitch,
                speak: tts.speak,
            }));
        }
        if let Some(nv) = self.night_vision {
            return Ok(Command::NightVision { action: nv.action });
        }
        if let Some(song) = self.song {
            return Ok(Command::Song {
                slot: song.slot.unwrap_or(0),
                notes: song.notes,
                repeat: song.repeat,
            });
        }
        Ok(Command::Unsupported { kind: self.kind })
    }

    /// Converts into an envelope, keeping the id for the ack.
    pub fn into_envelope(self) -> Result<Envelope, (CorrelationId, ProtocolError)> {
        let id = self.id.clone();
        match self.into_command() {
            Ok(command) => Ok(Envelope { id, command }),
            Err(e) => Err((id, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(json: &str) -> Command {
        InboundMessage::from_json(json).unwrap().into_command().unwrap()
    }

    #[test]
    fn test_parse_drive_direct() {
        let cmd = command(r#"{"type":"drive","id":"a","driveDirect":{"left":600,"right":-50}}"#);
        assert_eq!(
            cmd,
            Command::DriveDirect {
                left: 600,
                right: -50
            }
        );
    }

    #[test]
    fn test_parse_raw_base64() {
        let cmd = command(r#"{"type":"raw","id":"1","raw":"gA=="}"#);
        assert_eq!(cmd, Command::Raw(vec![128]));
    }

    #[test]
    fn test_parse_raw_invalid_base64() {
        let msg = InboundMessage::from_json(r#"{"type":"raw","id":"1","raw":"!!"}"#).unwrap();
        let err = msg.into_command().unwrap_err();
        assert!(err.to_string().starts_with("raw decode:"));
    }

    #[test]
    fn test_missing_id_not_acknowledged() {
        let msg = InboundMessage::from_json(r#"{"type":"drive","driveDirect":{}}"#).unwrap();
        assert!(msg.correlation_id().is_none());
        let msg = InboundMessage::from_json(r#"{"type":"drive","id":""}"#).unwrap();
        assert!(msg.correlation_id().is_none());
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            InboundMessage::from_json("{not json"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_drive_takes_precedence() {
        let cmd = command(
            r#"{"type":"x","id":"1","motorPwm":{"main":1},"driveDirect":{"left":1,"right":2}}"#,
        );
        assert!(matches!(cmd, Command::DriveDirect { .. }));
    }

    #[test]
    fn test_servo_forms() {
        assert_eq!(
            command(r#"{"id":"1","servo":{"angle":45.0,"nudge":3}}"#),
            Command::Servo(ServoAction::Angle(45.0))
        );
        assert_eq!(
            command(r#"{"id":"1","servo":{"nudge":-5}}"#),
            Command::Servo(ServoAction::Nudge(-5.0))
        );
        assert_eq!(
            command(r#"{"id":"1","servo":{"pulseUs":1500}}"#),
            Command::Servo(ServoAction::PulseWidth(1500))
        );
        let err = InboundMessage::from_json(r#"{"id":"1","servo":{}}"#)
            .unwrap()
            .into_command()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "servo command requires angle, nudge, or pulseUs"
        );
    }

    #[test]
    fn test_song_defaults() {
        let cmd = command(r#"{"id":"1","song":{"notes":[{"note":60,"duration":16}],"loop":true}}"#);
        assert_eq!(
            cmd,
            Command::Song {
                slot: 0,
                notes: vec![SongNote::new(60, 16)],
                repeat: true
            }
        );
    }

    #[test]
    fn test_unknown_payload_unsupported() {
        let cmd = command(r#"{"type":"teleport","id":"9"}"#);
        assert_eq!(
            cmd,
            Command::Unsupported {
                kind: "teleport".to_string()
            }
        );
    }

    #[test]
    fn test_into_envelope_keeps_id_on_error() {
        let msg = InboundMessage::from_json(r#"{"id":"42","servo":{}}"#).unwrap();
        let (id, _) = msg.into_envelope().unwrap_err();
        assert_eq!(id.as_str(), "42");
    }
}
