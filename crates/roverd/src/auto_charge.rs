//! Autonomous return-to-dock.
//!
//! Watches decoded samples for "on the dock but not charging". If that
//! persists for [`AUTO_CHARGE_TIMEOUT`] the controller asks the chassis to
//! seek its dock, then stays quiet for [`AUTO_CHARGE_COOLDOWN`]. This runs
//! whether or not a control-plane session is up.

use std::sync::Arc;
use std::time::Duration;

use rover_core::event::names;
use rover_core::{RoverEvent, SensorSample};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chassis::SerialAdapter;
use crate::events::EventSender;

/// How long docked-but-not-charging must last before seeking the dock.
pub const AUTO_CHARGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Quiet period after a seek attempt.
pub const AUTO_CHARGE_COOLDOWN: Duration = Duration::from_secs(120);

/// Timer state. Idle, timing and cooling down are encoded by which of the
/// two instants are set.
pub struct AutoChargeController {
    chassis: Arc<SerialAdapter>,
    events: EventSender,
    timer_start: Option<Instant>,
    cooldown_until: Option<Instant>,
    last_charging_state: u8,
    last_charge_sources: u8,
}

impl AutoChargeController {
    pub fn new(chassis: Arc<SerialAdapter>, events: EventSender) -> Self {
        Self {
            chassis,
            events,
            timer_start: None,
            cooldown_until: None,
            last_charging_state: 0,
            last_charge_sources: 0,
        }
    }

    /// True while a docked-but-not-charging timer is running.
    pub fn is_timing(&self) -> bool {
        self.timer_start.is_some()
    }

    /// Last state seen while undocked or charging.
    pub fn last_seen(&self) -> (u8, u8) {
        (self.last_charging_state, self.last_charge_sources)
    }

    /// Applies one sample observed at `now`.
    pub fn process_sample(&mut self, sample: &SensorSample, now: Instant) {
        if !sample.is_docked() || sample.is_charging() {
            if let Some(start) = self.timer_start.take() {
                let elapsed = now.saturating_duration_since(start);
                debug!(elapsed_ms = elapsed.as_millis() as u64, "Auto-charge timer cleared");
                self.events.emit(
                    RoverEvent::new(names::AUTO_CHARGE_TIMER_CLEARED)
                        .with("durationMs", elapsed.as_millis() as u64),
                );
            }
            self.last_charging_state = sample.charging_state;
            self.last_charge_sources = sample.charge_sources;
            return;
        }

        if self.cooldown_until.is_some_and(|until| now < until) {
            return;
        }

        let Some(start) = self.timer_start else {
            self.timer_start = Some(now);
            debug!(charging_state = sample.charging_state, "Auto-charge timer started");
            self.events.emit(
                RoverEvent::new(names::AUTO_CHARGE_TIMER_STARTED)
                    .with("chargingState", sample.charging_state),
            );
            return;
        };

        let waited = now.saturating_duration_since(start);
        if waited < AUTO_CHARGE_TIMEOUT {
            return;
        }

        match self.chassis.seek_dock() {
            Ok(()) => {
                info!(waited_ms = waited.as_millis() as u64, "Docked without charging, seeking dock");
                self.events.emit(
                    RoverEvent::new(names::AUTO_CHARGE_SEEK_DOCK_ISSUED)
                        .with("waitingMs", waited.as_millis() as u64),
                );
            }
            Err(e) => {
                warn!(error = %e, "Auto-charge seek dock failed");
                self.events.emit(
                    RoverEvent::new(names::AUTO_CHARGE_SEEK_DOCK_ERROR).with("error", e.to_string()),
                );
            }
        }
        self.timer_start = None;
        self.cooldown_until = Some(now + AUTO_CHARGE_COOLDOWN);
    }

    /// Consumes samples until cancelled or the channel closes.
    pub async fn run(mut self, mut samples: mpsc::Receiver<SensorSample>, cancel: CancellationToken) {
        info!("Auto-charge controller started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                sample = samples.recv() => match sample {
                    Some(sample) => self.process_sample(&sample, Instant::now()),
                    None => break,
                },
            }
        }
        info!("Auto-charge controller stopped");
    }
}
