//! Rover Protocol - Wire protocol for the control-plane session
//!
//! One JSON object per WebSocket text frame. The daemon sends `hello`,
//! `sensor`, `event` and `ack` messages; the control plane sends command
//! envelopes which are parsed here into [`rover_core::Command`].

pub mod error;
pub mod message;
pub mod parse;

pub use error::ProtocolError;
pub use message::{
    AckStatus, AudioDescriptor, BatteryThresholds, CameraServoDescriptor, Hello, MediaDescriptor,
    NightVisionDescriptor, OutboundMessage,
};
pub use parse::InboundMessage;
