//! Rover Peripherals - Collaborators the daemon drives besides the chassis
//!
//! Every peripheral sits behind a narrow async trait so the session can
//! call it without knowing whether a real pin, a subprocess, or a
//! recording stand-in is underneath. Hardware and no-op variants are
//! chosen when the daemon is composed, not at compile time.

pub mod error;
pub mod keepalive;
pub mod media;
pub mod night_vision;
pub mod output;
pub mod servo;
pub mod sysfs;
pub mod tts;

pub use error::{PeripheralError, PeripheralResult};
pub use keepalive::{BrcConfig, KeepAlivePulser};
pub use media::{MediaConfig, MediaSupervisor};
pub use night_vision::{NightVisionConfig, NightVisionLight};
pub use output::{NoopLine, NoopPulse, OutputLine, PulseOutput};
pub use servo::{CameraServoConfig, ServoController};
pub use tts::{AudioConfig, NoopSpeaker, ProcessSpeaker};

use async_trait::async_trait;
use rover_core::{ServoAction, TtsRequest};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[async_trait]
pub trait CameraServo: Send + Sync {
    async fn apply(&self, action: ServoAction) -> PeripheralResult<()>;

    /// Returns the servo home and stops accepting commands.
    fn close(&self) -> PeripheralResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait NightVision: Send + Sync {
    async fn handle_action(&self, action: &str) -> PeripheralResult<()>;

    fn close(&self) -> PeripheralResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait MediaControl: Send + Sync {
    async fn handle_action(&self, action: &str) -> PeripheralResult<()>;

    /// Background health polling; returns when cancelled.
    async fn run_health_monitor(&self, cancel: CancellationToken) {
        cancel.cancelled().await;
    }
}

#[async_trait]
pub trait Speaker: Send + Sync {
    async fn speak(&self, request: &TtsRequest) -> PeripheralResult<()>;
}

/// The peripherals available to a session. `None` means disabled.
#[derive(Clone, Default)]
pub struct Peripherals {
    pub servo: Option<Arc<dyn CameraServo>>,
    pub night_vision: Option<Arc<dyn NightVision>>,
    pub media: Option<Arc<dyn MediaControl>>,
    pub speaker: Option<Arc<dyn Speaker>>,
}

impl Peripherals {
    /// Everything disabled.
    pub fn none() -> Self {
        Self::default()
    }

    /// Releases hardware held by the servo and light.
    pub fn close(&self) {
        if let Some(servo) = &self.servo {
            if let Err(e) = servo.close() {
                warn!(error = %e, "Servo close failed");
            }
        }
        if let Some(light) = &self.night_vision {
            if let Err(e) = light.close() {
                warn!(error = %e, "Night vision close failed");
            }
        }
    }
}

impl std::fmt::Debug for Peripherals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peripherals")
            .field("servo", &self.servo.is_some())
            .field("night_vision", &self.night_vision.is_some())
            .field("media", &self.media.is_some())
            .field("speaker", &self.speaker.is_some())
            .finish()
    }
}
