//! Rover Daemon - Serial chassis bridge and control-plane session
//!
//! This crate provides the moving parts of the edge daemon:
//! - `chassis` - Serialized write path to the chassis
//! - `stream` - Telemetry frame reader with resynchronization
//! - `auto_charge` - Autonomous return-to-dock state machine
//! - `session` - One control-plane connection: handshake, dispatch, forwarding, watchdog
//! - `supervisor` - Reconnect-with-backoff around sessions
//! - `daemon` - Composition of all of the above from a [`config::Config`]
//!
//! # Architecture
//!
//! ```text
//!  serial port ──read──▶ SensorStreamReader ──frames──▶ Session ──ws──▶ control plane
//!                                 │                       ▲  │
//!                                 └──samples──▶ AutoCharge│  │ commands
//!                                                  │      │  ▼
//!                                                  └─events┘ Dispatcher
//!                                                           │
//!  serial port ◀──write── SerialAdapter (one lock) ◀────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! Production code never unwraps: fallible operations return `Result`,
//! channel sends that may fail are dropped deliberately, and lock poisoning
//! is recovered rather than propagated.

pub mod auto_charge;
pub mod chassis;
pub mod config;
pub mod daemon;
pub mod events;
pub mod hardware;
pub mod session;
pub mod simulated;
pub mod stream;
pub mod supervisor;

pub use config::{Backend, Config, ConfigError};
pub use daemon::Daemon;
