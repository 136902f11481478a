//! Infrared night-vision light.

use crate::output::OutputLine;
use crate::{NightVision, PeripheralError, PeripheralResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NightVisionConfig {
    pub enabled: bool,
    pub gpio_chip: String,
    pub gpio_pin: u32,
    pub initial_on: bool,
}

impl Default for NightVisionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gpio_chip: "gpiochip0".to_string(),
            gpio_pin: 0,
            initial_on: false,
        }
    }
}

/// What a night-vision action asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightAction {
    Toggle,
    On,
    Off,
}

impl LightAction {
    /// Case-insensitive; an empty action toggles.
    pub fn parse(action: &str) -> PeripheralResult<Self> {
        match action.trim().to_ascii_lowercase().as_str() {
            "" | "toggle" => Ok(Self::Toggle),
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            _ => Err(PeripheralError::UnknownAction {
                peripheral: "night vision",
                action: action.to_string(),
            }),
        }
    }
}

struct LightState {
    on: bool,
    closed: bool,
}

pub struct NightVisionLight<O> {
    line: O,
    state: Mutex<LightState>,
}

impl<O: OutputLine> NightVisionLight<O> {
    /// Wraps a line that has already been driven to `initial_on`.
    pub fn new(line: O, initial_on: bool) -> Self {
        info!(initial_on, "Night vision light ready");
        Self {
            line,
            state: Mutex::new(LightState {
                on: initial_on,
                closed: false,
            }),
        }
    }

    pub fn is_on(&self) -> bool {
        match self.state.lock() {
            Ok(s) => s.on,
            Err(poisoned) => poisoned.into_inner().on,
        }
    }
}

#[async_trait]
impl<O: OutputLine> NightVision for NightVisionLight<O> {
    async fn handle_action(&self, action: &str) -> PeripheralResult<()> {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.closed {
            return Err(PeripheralError::Closed("night vision controller"));
        }
        let on = match LightAction::parse(action)? {
            LightAction::Toggle => !state.on,
            LightAction::On => true,
            LightAction::Off => false,
        };
        self.line.set(on)?;
        state.on = on;
        debug!(on, "Night vision switched");
        Ok(())
    }

    fn close(&self) -> PeripheralResult<()> {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::NoopLine;
    use std::sync::Arc;

    #[test]
    fn test_parse_actions() {
        assert_eq!(LightAction::parse("").unwrap(), LightAction::Toggle);
        assert_eq!(LightAction::parse(" ON ").unwrap(), LightAction::On);
        assert_eq!(LightAction::parse("Off").unwrap(), LightAction::Off);
        assert!(LightAction::parse("blink").is_err());
    }

    #[tokio::test]
    async fn test_toggle_and_explicit() {
        let line = Arc::new(NoopLine::new());
        let light = NightVisionLight::new(Arc::clone(&line), false);
        light.handle_action("toggle").await.unwrap();
        assert!(light.is_on());
        light.handle_action("on").await.unwrap();
        light.handle_action("").await.unwrap();
        assert!(!light.is_on());
        assert_eq!(line.history(), vec![true, true, false]);
    }

    #[tokio::test]
    async fn test_unknown_action_leaves_state() {
        let line = Arc::new(NoopLine::new());
        let light = NightVisionLight::new(Arc::clone(&line), true);
        let err = light.handle_action("strobe").await.unwrap_err();
        assert_eq!(err.to_string(), "unknown night vision action \"strobe\"");
        assert!(light.is_on());
        assert!(line.history().is_empty());
    }

    #[tokio::test]
    async fn test_closed_rejects() {
        let light = NightVisionLight::new(NoopLine::new(), false);
        light.close().unwrap();
        assert!(light.handle_action("on").await.is_err());
    }
}
