//! Outbound message types.

use crate::ProtocolError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use rover_core::{CorrelationId, Frame, RoverEvent};
use serde::{Deserialize, Serialize};

// ============================================================================
// Handshake descriptors
// ============================================================================

/// Battery thresholds advertised to the control plane, in mAh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryThresholds {
    pub full: u32,
    pub warn: u32,
    pub urgent: u32,
}

/// Video publishing capability.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whep_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge_whep_url: Option<String>,
    pub manage: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraServoDescriptor {
    pub enabled: bool,
    pub min_angle: f64,
    pub max_angle: f64,
    pub home_angle: f64,
    pub nudge_degrees: f64,
    pub allow_raw_pulse: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDescriptor {
    pub tts_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_engine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_voice: Option<String>,
    pub default_pitch: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NightVisionDescriptor {
    pub enabled: bool,
    pub initial_on: bool,
}

/// First message of every session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub name: String,
    pub battery: BatteryThresholds,
    pub max_wheel_speed: i32,
    pub media: MediaDescriptor,
    pub camera_servo: CameraServoDescriptor,
    pub audio: AudioDescriptor,
    pub night_vision: NightVisionDescriptor,
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
    Error,
}

/// Messages sent from the daemon to the control plane.
///
/// Events are not listed here; they carry their own type tag and are
/// written with [`OutboundMessage::event_json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// Identity and capabilities
    Hello(Hello),

    /// One raw telemetry frame
    Sensor {
        /// Unix milliseconds at forwarding time
        ts: i64,
        /// Base64 of the frame bytes, header through checksum
        data: String,
    },

    /// Result of one inbound command
    Ack {
        id: CorrelationId,
        status: AckStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl OutboundMessage {
    pub fn hello(hello: Hello) -> Self {
        Self::Hello(hello)
    }

    /// Wraps a frame as a telemetry message stamped now.
    pub fn sensor(frame: &Frame) -> Self {
        Self::Sensor {
            ts: Utc::now().timestamp_millis(),
            data: BASE64.encode(frame.as_bytes()),
        }
    }

    pub fn ack_ok(id: CorrelationId) -> Self {
        Self::Ack {
            id,
            status: AckStatus::Ok,
            error: None,
        }
    }

    pub fn ack_error(id: CorrelationId, error: impl Into<String>) -> Self {
        Self::Ack {
            id,
            status: AckStatus::Error,
            error: Some(error.into()),
        }
    }

    /// Builds an ack from a dispatch outcome.
    pub fn ack<E: std::fmt::Display>(id: CorrelationId, outcome: &Result<(), E>) -> Self {
        match outcome {
            Ok(()) => Self::ack_ok(id),
            Err(e) => Self::ack_error(id, e.to_string()),
        }
    }

    /// Serializes to a single JSON text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serializes an event, defaulting its type tag.
    pub fn event_json(event: &RoverEvent) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(&event.clone().normalized())?)
    }
}
