//! Camera pan servo.

use crate::output::PulseOutput;
use crate::{CameraServo, PeripheralError, PeripheralResult};
use async_trait::async_trait;
use rover_core::{clamp, ServoAction};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info};

/// Servo geometry and output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraServoConfig {
    pub enabled: bool,
    pub pwm_chip: String,
    pub pwm_channel: u32,
    /// PWM period; 20000us gives the usual 50Hz servo frame
    pub period_us: u32,
    pub min_angle: f64,
    pub max_angle: f64,
    pub home_angle: f64,
    pub min_pulse_us: u32,
    pub max_pulse_us: u32,
    /// Step used when a nudge arrives with a zero delta
    pub nudge_degrees: f64,
    pub allow_raw_pulse: bool,
}

impl Default for CameraServoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pwm_chip: "pwmchip0".to_string(),
            pwm_channel: 0,
            period_us: 20_000,
            min_angle: 0.0,
            max_angle: 180.0,
            home_angle: 90.0,
            min_pulse_us: 500,
            max_pulse_us: 2_500,
            nudge_degrees: 5.0,
            allow_raw_pulse: false,
        }
    }
}

impl CameraServoConfig {
    /// Maps an angle onto the pulse range, linearly.
    pub fn angle_to_pulse(&self, angle: f64) -> u32 {
        let span = self.max_angle - self.min_angle;
        if span == 0.0 {
            return self.min_pulse_us;
        }
        let norm = clamp((angle - self.min_angle) / span, 0.0, 1.0);
        let pulse_span = f64::from(self.max_pulse_us.saturating_sub(self.min_pulse_us));
        self.min_pulse_us
            .saturating_add((norm * pulse_span).round() as u32)
    }

    pub fn pulse_to_angle(&self, pulse: u32) -> f64 {
        let pulse_span = f64::from(self.max_pulse_us.saturating_sub(self.min_pulse_us));
        if pulse_span == 0.0 {
            return self.min_angle;
        }
        let norm = clamp(
            (f64::from(pulse) - f64::from(self.min_pulse_us)) / pulse_span,
            0.0,
            1.0,
        );
        self.min_angle + norm * (self.max_angle - self.min_angle)
    }
}

struct ServoState {
    angle: f64,
    closed: bool,
}

/// Servo controller over any pulse output.
pub struct ServoController<P> {
    cfg: CameraServoConfig,
    output: P,
    state: Mutex<ServoState>,
}

impl<P: PulseOutput> ServoController<P> {
    /// Creates the controller and parks the servo at its home angle.
    pub fn new(cfg: CameraServoConfig, output: P) -> PeripheralResult<Self> {
        let home = clamp(cfg.home_angle, cfg.min_angle, cfg.max_angle);
        output.set_pulse_us(cfg.angle_to_pulse(home))?;
        info!(
            min = cfg.min_angle,
            max = cfg.max_angle,
            home,
            "Camera servo initialized"
        );
        Ok(Self {
            cfg,
            output,
            state: Mutex::new(ServoState {
                angle: home,
                closed: false,
            }),
        })
    }

    pub fn current_angle(&self) -> f64 {
        match self.state.lock() {
            Ok(s) => s.angle,
            Err(poisoned) => poisoned.into_inner().angle,
        }
    }

    fn write_pulse(&self, micros: u32) -> PeripheralResult<()> {
        let micros = clamp(micros, self.cfg.min_pulse_us, self.cfg.max_pulse_us);
        self.output.set_pulse_us(micros)
    }

    fn apply_sync(&self, action: ServoAction) -> PeripheralResult<()> {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.closed {
            return Err(PeripheralError::Closed("servo"));
        }

        match action {
            ServoAction::Angle(angle) => {
                let target = clamp(angle, self.cfg.min_angle, self.cfg.max_angle);
                self.write_pulse(self.cfg.angle_to_pulse(target))?;
                state.angle = target;
            }
            ServoAction::Nudge(delta) => {
                let delta = if delta == 0.0 {
                    self.cfg.nudge_degrees
                } else {
                    delta
                };
                let target = clamp(state.angle + delta, self.cfg.min_angle, self.cfg.max_angle);
                self.write_pulse(self.cfg.angle_to_pulse(target))?;
                state.angle = target;
            }
            ServoAction::PulseWidth(micros) => {
                if !self.cfg.allow_raw_pulse {
                    return Err(PeripheralError::Rejected(
                        "raw pulse commands disabled".to_string(),
                    ));
                }
                if micros <= 0 {
                    return Err(PeripheralError::Rejected(
                        "pulse width must be > 0".to_string(),
                    ));
                }
                let micros = u32::try_from(micros).unwrap_or(u32::MAX);
                let micros = clamp(micros, self.cfg.min_pulse_us, self.cfg.max_pulse_us);
                self.write_pulse(micros)?;
                state.angle = self.cfg.pulse_to_angle(micros);
            }
        }
        debug!(angle = state.angle, "Servo moved");
        Ok(())
    }
}

#[async_trait]
impl<P: PulseOutput> CameraServo for ServoController<P> {
    async fn apply(&self, action: ServoAction) -> PeripheralResult<()> {
        self.apply_sync(action)
    }

    fn close(&self) -> PeripheralResult<()> {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        let home = clamp(self.cfg.home_angle, self.cfg.min_angle, self.cfg.max_angle);
        self.write_pulse(self.cfg.angle_to_pulse(home))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::NoopPulse;
    use std::sync::Arc;

    fn make_servo(allow_raw_pulse: bool) -> (ServoController<Arc<NoopPulse>>, Arc<NoopPulse>) {
        let out = Arc::new(NoopPulse::new());
        let cfg = CameraServoConfig {
            enabled: true,
            allow_raw_pulse,
            ..Default::default()
        };
        (ServoController::new(cfg, Arc::clone(&out)).unwrap(), out)
    }

    #[test]
    fn test_starts_at_home() {
        let (servo, out) = make_servo(false);
        assert_eq!(servo.current_angle(), 90.0);
        assert_eq!(out.last_pulse_us(), Some(1_500));
    }

    #[tokio::test]
    async fn test_angle_clamped() {
        let (servo, out) = make_servo(false);
        servo.apply(ServoAction::Angle(400.0)).await.unwrap();
        assert_eq!(servo.current_angle(), 180.0);
        assert_eq!(out.last_pulse_us(), Some(2_500));
    }

    #[tokio::test]
    async fn test_zero_nudge_uses_step() {
        let (servo, _) = make_servo(false);
        servo.apply(ServoAction::Nudge(0.0)).await.unwrap();
        assert_eq!(servo.current_angle(), 95.0);
        servo.apply(ServoAction::Nudge(-20.0)).await.unwrap();
        assert_eq!(servo.current_angle(), 75.0);
    }

    #[tokio::test]
    async fn test_raw_pulse_gated() {
        let (servo, _) = make_servo(false);
        let err = servo.apply(ServoAction::PulseWidth(1_000)).await.unwrap_err();
        assert_eq!(err.to_string(), "raw pulse commands disabled");

        let (servo, out) = make_servo(true);
        assert!(servo.apply(ServoAction::PulseWidth(0)).await.is_err());
        servo.apply(ServoAction::PulseWidth(1_000)).await.unwrap();
        assert_eq!(out.last_pulse_us(), Some(1_000));
        assert_eq!(servo.current_angle(), 45.0);
    }

    #[tokio::test]
    async fn test_closed_servo_rejects() {
        let (servo, _) = make_servo(false);
        servo.apply(ServoAction::Angle(10.0)).await.unwrap();
        servo.close().unwrap();
        assert_eq!(servo.current_angle(), 10.0);
        assert!(servo.apply(ServoAction::Angle(20.0)).await.is_err());
    }
}
