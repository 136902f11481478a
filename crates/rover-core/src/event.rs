//! Internal events forwarded to the control plane.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default type tag for event messages.
pub const EVENT_TYPE: &str = "event";

/// Event names emitted by the daemon's state machines.
pub mod names {
    pub const AUTO_CHARGE_TIMER_STARTED: &str = "autoCharge.timerStarted";
    pub const AUTO_CHARGE_TIMER_CLEARED: &str = "autoCharge.timerCleared";
    pub const AUTO_CHARGE_SEEK_DOCK_ISSUED: &str = "autoCharge.seekDockIssued";
    pub const AUTO_CHARGE_SEEK_DOCK_ERROR: &str = "autoCharge.seekDockError";
    pub const WATCHDOG_RESTART: &str = "sensorWatchdog.restart";
    pub const WATCHDOG_RESTART_OK: &str = "sensorWatchdog.streamRestart.ok";
    pub const WATCHDOG_RESTART_ERROR: &str = "sensorWatchdog.streamRestart.error";
}

/// A state-machine transition or recovery action worth telling the peer about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoverEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub event: String,
    /// Unix milliseconds
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl RoverEvent {
    /// Creates an event stamped with the current time.
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            kind: EVENT_TYPE.to_string(),
            event: event.into(),
            ts: Utc::now().timestamp_millis(),
            data: Map::new(),
        }
    }

    /// Adds one data field.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Fills in the type tag if a producer left it blank.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.kind.is_empty() {
            self.kind = EVENT_TYPE.to_string();
        }
        self
    }
}
