//! Sensor stream liveness.
//!
//! The chassis silently stops streaming when something resets its mode.
//! The watchdog notices the silence and re-issues the kickstart sequence.

use std::future::Future;
use std::time::Duration;

use rover_core::event::names;
use rover_core::{Frame, RoverEvent};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use super::error::SessionResult;
use crate::chassis::SerialAdapter;
use crate::events::EventSender;

/// Silence longer than this triggers a recovery.
pub const WATCHDOG_IDLE: Duration = Duration::from_secs(5);

/// Minimum spacing between recoveries.
pub const WATCHDOG_COOLDOWN: Duration = Duration::from_secs(5);

/// How often the forwarding loop checks for silence.
pub const WATCHDOG_TICK: Duration = Duration::from_secs(1);

/// Silence timer owned by the sensor forwarding loop.
#[derive(Debug, Clone)]
pub struct SensorWatchdog {
    last_frame: Instant,
    last_recovery: Option<Instant>,
}

impl SensorWatchdog {
    pub fn new(now: Instant) -> Self {
        Self {
            last_frame: now,
            last_recovery: None,
        }
    }

    /// Resets the silence timer.
    pub fn frame_seen(&mut self, now: Instant) {
        self.last_frame = now;
    }

    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_frame)
    }

    /// Returns the idle time if a recovery should run now, and records it.
    pub fn due(&mut self, now: Instant) -> Option<Duration> {
        let idle = self.idle(now);
        if idle <= WATCHDOG_IDLE {
            return None;
        }
        if let Some(last) = self.last_recovery {
            if now.saturating_duration_since(last) <= WATCHDOG_COOLDOWN {
                return None;
            }
        }
        self.last_recovery = Some(now);
        Some(idle)
    }
}

/// Reports the stall and kickstarts the stream again.
pub async fn recover(idle: Duration, chassis: &SerialAdapter, packets: &[u8], events: &EventSender) {
    let idle_ms = idle.as_millis() as u64;
    warn!(idle_ms, "No sensor frames, restarting stream");
    events.emit(RoverEvent::new(names::WATCHDOG_RESTART).with("idleMs", idle_ms));

    match chassis.kickstart(packets).await {
        Ok(()) => {
            info!("Sensor stream restarted");
            events.emit(RoverEvent::new(names::WATCHDOG_RESTART_OK));
        }
        Err(e) => {
            warn!(error = %e, "Sensor stream restart failed");
            events.emit(RoverEvent::new(names::WATCHDOG_RESTART_ERROR).with("error", e.to_string()));
        }
    }
}

/// Hands every frame to `forward` while watching for silence.
///
/// Returns only when `forward` fails. A closed frame channel leaves the
/// watchdog running so the stall is still reported.
pub async fn forward_frames<F, Fut>(
    frames: &mut mpsc::Receiver<Frame>,
    chassis: &SerialAdapter,
    packets: &[u8],
    events: &EventSender,
    mut forward: F,
) -> SessionResult<()>
where
    F: FnMut(Frame) -> Fut,
    Fut: Future<Output = SessionResult<()>>,
{
    let start = Instant::now();
    let mut watchdog = SensorWatchdog::new(start);
    let mut ticker = tokio::time::interval_at(start + WATCHDOG_TICK, WATCHDOG_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut open = true;

    loop {
        tokio::select! {
            frame = frames.recv(), if open => match frame {
                Some(frame) => {
                    watchdog.frame_seen(Instant::now());
                    forward(frame).await?;
                }
                None => {
                    warn!("Sensor frame channel closed");
                    open = false;
                }
            },
            _ = ticker.tick() => {
                if let Some(idle) = watchdog.due(Instant::now()) {
                    recover(idle, chassis, packets, events).await;
                    watchdog.frame_seen(Instant::now());
                }
            }
        }
    }
}
