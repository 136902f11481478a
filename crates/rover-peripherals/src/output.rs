//! Output seams between peripheral logic and the pins that drive it.
//!
//! Controllers are generic over these traits so the same state machine runs
//! against sysfs on the rover and against a recording stand-in everywhere
//! else.

use crate::PeripheralResult;
use std::sync::Mutex;

/// A single digital output line.
pub trait OutputLine: Send + Sync {
    fn set(&self, high: bool) -> PeripheralResult<()>;
}

/// A PWM output expressed as a pulse width.
pub trait PulseOutput: Send + Sync {
    fn set_pulse_us(&self, micros: u32) -> PeripheralResult<()>;
}

/// Line that remembers every level it was driven to.
#[derive(Debug, Default)]
pub struct NoopLine {
    levels: Mutex<Vec<bool>>,
}

impl NoopLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every level written so far, oldest first.
    pub fn history(&self) -> Vec<bool> {
        self.levels
            .lock()
            .map(|l| l.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn level(&self) -> Option<bool> {
        self.history().last().copied()
    }
}

impl OutputLine for NoopLine {
    fn set(&self, high: bool) -> PeripheralResult<()> {
        match self.levels.lock() {
            Ok(mut levels) => levels.push(high),
            Err(poisoned) => poisoned.into_inner().push(high),
        }
        Ok(())
    }
}

/// PWM output that remembers the last pulse width.
#[derive(Debug, Default)]
pub struct NoopPulse {
    last: Mutex<Option<u32>>,
}

impl NoopPulse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_pulse_us(&self) -> Option<u32> {
        match self.last.lock() {
            Ok(last) => *last,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl PulseOutput for NoopPulse {
    fn set_pulse_us(&self, micros: u32) -> PeripheralResult<()> {
        match self.last.lock() {
            Ok(mut last) => *last = Some(micros),
            Err(poisoned) => *poisoned.into_inner() = Some(micros),
        }
        Ok(())
    }
}

impl<T: OutputLine + ?Sized> OutputLine for std::sync::Arc<T> {
    fn set(&self, high: bool) -> PeripheralResult<()> {
        (**self).set(high)
    }
}

impl<T: PulseOutput + ?Sized> PulseOutput for std::sync::Arc<T> {
    fn set_pulse_us(&self, micros: u32) -> PeripheralResult<()> {
        (**self).set_pulse_us(micros)
    }
}
