//! Maps one inbound [`Command`] onto the chassis or a peripheral.
//!
//! Every failure here is local to the command: the caller turns it into an
//! error ack and the session carries on.

use std::sync::Arc;

use rover_core::limits::{BRUSH_PWM_LIMIT, VACUUM_PWM_MAX, WHEEL_SPEED_LIMIT};
use rover_core::{clamp, opcode, Command};
use rover_peripherals::Peripherals;
use tracing::{debug, info};

use super::error::{SessionError, SessionResult};
use crate::chassis::SerialAdapter;
use crate::config::Config;

/// Routes commands by kind and applies the configured limits.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    chassis: Arc<SerialAdapter>,
    peripherals: Peripherals,
    max_wheel_speed: i64,
    packets: Vec<u8>,
}

impl Dispatcher {
    pub fn new(chassis: Arc<SerialAdapter>, peripherals: Peripherals, config: &Config) -> Self {
        Self {
            chassis,
            peripherals,
            // the chassis limit bounds the cap even for an unvalidated config
            max_wheel_speed: clamp(
                i64::from(config.max_wheel_speed),
                0,
                i64::from(WHEEL_SPEED_LIMIT),
            ),
            packets: config.sensor.packets.clone(),
        }
    }

    /// Re-enters OI mode and restarts the configured sensor stream.
    pub async fn kickstart(&self) -> SessionResult<()> {
        Ok(self.chassis.kickstart(&self.packets).await?)
    }

    pub async fn dispatch(&self, command: Command) -> SessionResult<()> {
        match command {
            Command::DriveDirect { left, right } => {
                let cap = self.max_wheel_speed;
                let left = clamp(left, -cap, cap) as i16;
                let right = clamp(right, -cap, cap) as i16;
                self.chassis.drive_direct(left, right)?;
            }
            Command::MotorPwm { main, side, vacuum } => {
                let brush = i64::from(BRUSH_PWM_LIMIT);
                let main = clamp(main, -brush, brush) as i8;
                let side = clamp(side, -brush, brush) as i8;
                let vacuum = clamp(vacuum, 0, i64::from(VACUUM_PWM_MAX)) as u8;
                self.chassis.motor_pwm(main, side, vacuum)?;
            }
            Command::SensorStream { enable: true } => self.kickstart().await?,
            Command::SensorStream { enable: false } => self.chassis.pause_sensor_stream(true)?,
            Command::Raw(bytes) => {
                self.chassis.send_raw(&bytes)?;
                if let Some(op) = bytes.first().copied().filter(|op| opcode::is_mode_change(*op)) {
                    debug!(opcode = op, "Mode change, restarting sensor stream");
                    self.kickstart().await?;
                }
            }
            Command::Media { action } => {
                let media = self
                    .peripherals
                    .media
                    .as_ref()
                    .ok_or(SessionError::PeripheralUnavailable("media supervisor"))?;
                media.handle_action(&action).await?;
            }
            Command::Servo(action) => {
                let servo = self
                    .peripherals
                    .servo
                    .as_ref()
                    .ok_or(SessionError::PeripheralUnavailable("camera servo"))?;
                servo.apply(action).await?;
            }
            Command::Tts(request) => {
                let speaker = self
                    .peripherals
                    .speaker
                    .as_ref()
                    .ok_or(SessionError::PeripheralUnavailable("tts"))?;
                speaker.speak(&request).await?;
            }
            Command::NightVision { action } => {
                let light = self
                    .peripherals
                    .night_vision
                    .as_ref()
                    .ok_or(SessionError::PeripheralUnavailable("night vision"))?;
                light.handle_action(&action).await?;
            }
            Command::Song {
                slot,
                notes,
                repeat,
            } => {
                self.chassis.play_song(slot, &notes)?;
                info!(slot, notes = notes.len(), repeat, "Song played");
            }
            Command::Unsupported { kind } => return Err(SessionError::UnsupportedCommand(kind)),
        }
        Ok(())
    }
}
