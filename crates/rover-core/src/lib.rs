//! Rover Core - Shared types for the rover edge daemon
//!
//! This crate holds the pieces every other crate agrees on: the chassis
//! opcode encoders, telemetry frame validation and decoding, the command
//! model received from the control plane, and the event record emitted
//! back to it.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod command;
pub mod error;
pub mod event;
pub mod limits;
pub mod opcode;
pub mod sensor;
pub mod song;

// Re-exports for convenience
pub use command::{Command, CorrelationId, Envelope, ServoAction, TtsRequest};
pub use error::{DomainError, DomainResult};
pub use event::RoverEvent;
pub use limits::clamp;
pub use sensor::{
    checksum, Frame, PacketTable, SampleDecoder, SensorSample, DEFAULT_STREAM_PACKETS,
    SENSOR_HEADER,
};
pub use song::{SongNote, MAX_SONG_NOTES, MAX_SONG_SLOT};
