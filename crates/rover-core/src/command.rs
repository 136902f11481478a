//! Commands received from the control plane.

use crate::SongNote;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Correlation Id
// ============================================================================

/// Client-supplied identifier echoed back in the acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Messages with an empty id are never acknowledged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Command
// ============================================================================

/// How the camera servo should move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServoAction {
    /// Absolute angle in degrees
    Angle(f64),
    /// Relative move in degrees; zero means one configured step
    Nudge(f64),
    /// Raw pulse width in microseconds
    PulseWidth(i64),
}

/// A text-to-speech request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TtsRequest {
    pub text: String,
    pub engine: Option<String>,
    pub voice: Option<String>,
    pub pitch: Option<i32>,
    /// Nothing is spoken unless this is set.
    pub speak: bool,
}

/// A request translated from the control plane's JSON envelope.
///
/// Values are carried as received; clamping and validation happen at
/// dispatch where the configured limits are known.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    DriveDirect { left: i64, right: i64 },
    MotorPwm { main: i64, side: i64, vacuum: i64 },
    SensorStream { enable: bool },
    Raw(Vec<u8>),
    Media { action: String },
    Servo(ServoAction),
    Tts(TtsRequest),
    NightVision { action: String },
    Song {
        slot: i64,
        notes: Vec<SongNote>,
        repeat: bool,
    },
    /// Envelope carried no payload this daemon understands.
    Unsupported { kind: String },
}

impl Command {
    /// Short name used in logs.
    pub fn kind(&self) -> &str {
        match self {
            Self::DriveDirect { .. } => "driveDirect",
            Self::MotorPwm { .. } => "motorPwm",
            Self::SensorStream { .. } => "sensorStream",
            Self::Raw(_) => "raw",
            Self::Media { .. } => "media",
            Self::Servo(_) => "servo",
            Self::Tts(_) => "tts",
            Self::NightVision { .. } => "nightVision",
            Self::Song { .. } => "song",
            Self::Unsupported { kind } => kind,
        }
    }
}

/// A command paired with the id its acknowledgment must carry.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: CorrelationId,
    pub command: Command,
}
