//! Keep-alive pulses on the chassis baud-rate-change (BRC) line.
//!
//! The chassis falls asleep after a few minutes without activity on BRC.
//! Pulling the line low for a moment at a fixed period keeps it awake.

use crate::output::OutputLine;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrcConfig {
    /// Line offset on `gpio_chip`; negative disables the pulser
    pub gpio_pin: i32,
    pub gpio_chip: String,
    #[serde(rename = "pulse_every_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub pulse_every: Duration,
    #[serde(rename = "pulse_width_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub pulse_width: Duration,
}

impl Default for BrcConfig {
    fn default() -> Self {
        Self {
            gpio_pin: -1,
            gpio_chip: "gpiochip0".to_string(),
            pulse_every: Duration::from_secs(60),
            pulse_width: Duration::from_secs(1),
        }
    }
}

impl BrcConfig {
    /// Line offset when the pulser is enabled.
    pub fn line(&self) -> Option<u32> {
        u32::try_from(self.gpio_pin).ok()
    }
}

/// Periodically pulses an idle-high line low.
pub struct KeepAlivePulser<O> {
    line: O,
    every: Duration,
    width: Duration,
}

impl<O: OutputLine> KeepAlivePulser<O> {
    pub fn new(line: O, every: Duration, width: Duration) -> Self {
        Self { line, every, width }
    }

    async fn pulse_once(&self) {
        if let Err(e) = self.line.set(false) {
            warn!(error = %e, "BRC pulse low failed");
            return;
        }
        tokio::time::sleep(self.width).await;
        if let Err(e) = self.line.set(true) {
            warn!(error = %e, "BRC pulse high failed");
        }
    }

    /// Pulses immediately and then every period until cancelled.
    ///
    /// The line is left high on return.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            every_secs = self.every.as_secs(),
            width_ms = self.width.as_millis() as u64,
            "BRC keep-alive started"
        );
        let mut ticker = tokio::time::interval(self.every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.pulse_once() => {}
                    }
                }
            }
        }
        if let Err(e) = self.line.set(true) {
            warn!(error = %e, "BRC release failed");
        }
        debug!("BRC keep-alive stopped");
    }
}
