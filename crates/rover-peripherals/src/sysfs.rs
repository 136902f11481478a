//! Linux sysfs GPIO and PWM outputs.
//!
//! Lines are addressed by chip name plus offset, the same way the rest of
//! the configuration names them. The chip's `base` attribute maps that pair
//! onto the global sysfs line number.

use crate::output::{OutputLine, PulseOutput};
use crate::{PeripheralError, PeripheralResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default sysfs GPIO class directory.
pub const GPIO_ROOT: &str = "/sys/class/gpio";

/// Default sysfs PWM class directory.
pub const PWM_ROOT: &str = "/sys/class/pwm";

fn write_attr(path: &Path, value: &str) -> PeripheralResult<()> {
    fs::write(path, value).map_err(|e| PeripheralError::sysfs(path, e))
}

fn read_u32(path: &Path) -> PeripheralResult<u32> {
    let text = fs::read_to_string(path).map_err(|e| PeripheralError::sysfs(path, e))?;
    text.trim().parse().map_err(|_| {
        PeripheralError::sysfs(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, "not an integer"),
        )
    })
}

/// One exported GPIO line configured as an output.
#[derive(Debug)]
pub struct SysfsGpio {
    number: u32,
    value_path: PathBuf,
}

impl SysfsGpio {
    /// Exports `offset` on `chip` (if needed) and drives it to `initial_high`.
    pub fn request(
        root: impl AsRef<Path>,
        chip: &str,
        offset: u32,
        initial_high: bool,
    ) -> PeripheralResult<Self> {
        let root = root.as_ref();
        let base = read_u32(&root.join(chip).join("base"))?;
        let number = base.saturating_add(offset);
        let line_dir = root.join(format!("gpio{number}"));

        if !line_dir.exists() {
            write_attr(&root.join("export"), &number.to_string())?;
        }
        // "high"/"low" sets direction and initial level in one write
        write_attr(
            &line_dir.join("direction"),
            if initial_high { "high" } else { "low" },
        )?;

        debug!(chip, offset, number, initial_high, "Requested GPIO line");
        Ok(Self {
            number,
            value_path: line_dir.join("value"),
        })
    }

    pub fn number(&self) -> u32 {
        self.number
    }
}

impl OutputLine for SysfsGpio {
    fn set(&self, high: bool) -> PeripheralResult<()> {
        write_attr(&self.value_path, if high { "1" } else { "0" })
    }
}

/// One exported PWM channel with a fixed period.
#[derive(Debug)]
pub struct SysfsPwm {
    duty_path: PathBuf,
    period_ns: u64,
}

impl SysfsPwm {
    /// Exports `channel` on `chip`, sets the period and enables output.
    pub fn request(
        root: impl AsRef<Path>,
        chip: &str,
        channel: u32,
        period_us: u32,
    ) -> PeripheralResult<Self> {
        let chip_dir = root.as_ref().join(chip);
        let channel_dir = chip_dir.join(format!("pwm{channel}"));

        if !channel_dir.exists() {
            write_attr(&chip_dir.join("export"), &channel.to_string())?;
        }

        let period_ns = u64::from(period_us) * 1_000;
        write_attr(&channel_dir.join("period"), &period_ns.to_string())?;
        write_attr(&channel_dir.join("enable"), "1")?;

        debug!(chip, channel, period_ns, "Enabled PWM channel");
        Ok(Self {
            duty_path: channel_dir.join("duty_cycle"),
            period_ns,
        })
    }
}

impl PulseOutput for SysfsPwm {
    fn set_pulse_us(&self, micros: u32) -> PeripheralResult<()> {
        let duty_ns = (u64::from(micros) * 1_000).min(self.period_ns);
        write_attr(&self.duty_path, &duty_ns.to_string())
    }
}
