//! Daemon configuration.
//!
//! Loaded once from TOML at startup, validated, and then shared read-only
//! behind an `Arc` for the life of the process.

use std::fs;
use std::path::{Path, PathBuf};

use rover_core::limits::WHEEL_SPEED_LIMIT;
use rover_core::{PacketTable, SampleDecoder, DEFAULT_STREAM_PACKETS};
use rover_peripherals::media::{bridge_whep_url, detect_primary_ipv4};
use rover_peripherals::{AudioConfig, BrcConfig, CameraServoConfig, MediaConfig, NightVisionConfig};
use rover_protocol::{
    AudioDescriptor, BatteryThresholds, CameraServoDescriptor, Hello, MediaDescriptor,
    NightVisionDescriptor,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Used when neither `--config` nor `ROVERD_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/roverd.toml";

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Where chassis bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Real serial port and peripheral hardware
    #[default]
    Hardware,
    /// In-process chassis and recording peripherals
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub device: String,
    pub baud: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Packet group requested from the chassis
    pub packets: Vec<u8>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            packets: DEFAULT_STREAM_PACKETS.to_vec(),
        }
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub name: String,
    pub server_url: String,
    pub backend: Backend,
    pub serial: SerialConfig,
    pub battery: BatteryThresholds,
    /// Wheel speed cap in mm/s applied to every drive command
    pub max_wheel_speed: i32,
    pub sensor: SensorConfig,
    pub brc: BrcConfig,
    pub media: MediaConfig,
    pub camera_servo: CameraServoConfig,
    pub audio: AudioConfig,
    pub night_vision: NightVisionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: String::new(),
            server_url: String::new(),
            backend: Backend::default(),
            serial: SerialConfig::default(),
            battery: BatteryThresholds::default(),
            max_wheel_speed: WHEEL_SPEED_LIMIT,
            sensor: SensorConfig::default(),
            brc: BrcConfig::default(),
            media: MediaConfig::default(),
            camera_servo: CameraServoConfig::default(),
            audio: AudioConfig::default(),
            night_vision: NightVisionConfig::default(),
        }
    }
}

impl Config {
    /// Reads, parses and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parses and validates TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks required fields and fills derived defaults.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.name.trim().is_empty() {
            return invalid("missing name");
        }
        if self.server_url.trim().is_empty() {
            return invalid("missing server_url");
        }
        if self.backend == Backend::Hardware
            && (self.serial.device.is_empty() || self.serial.baud == 0)
        {
            return invalid("serial device/baud required");
        }
        if self.battery.full == 0 {
            return invalid("battery thresholds required");
        }
        if !(1..=WHEEL_SPEED_LIMIT).contains(&self.max_wheel_speed) {
            return Err(ConfigError::Invalid(format!(
                "max_wheel_speed must be 1-{WHEEL_SPEED_LIMIT}, got {}",
                self.max_wheel_speed
            )));
        }
        if self.media.manage && self.media.service.as_deref().unwrap_or("").is_empty() {
            return invalid("media.manage requires media.service");
        }
        if self.brc.gpio_chip.is_empty() {
            self.brc.gpio_chip = BrcConfig::default().gpio_chip;
        }
        if self.media.health_interval.is_zero() {
            self.media.health_interval = MediaConfig::default().health_interval;
        }
        self.media.resolve_whep_url(detect_primary_ipv4);
        if self.media.whep_url.is_none() {
            warn!("No WHEP URL configured and no IPv4 address to derive one from");
        }
        SampleDecoder::new(PacketTable::standard(), &self.sensor.packets)
            .map_err(|e| ConfigError::Invalid(format!("sensor.packets: {e}")))?;
        Ok(())
    }

    /// Decoder for the configured packet group.
    pub fn sample_decoder(&self) -> Result<SampleDecoder, ConfigError> {
        SampleDecoder::new(PacketTable::standard(), &self.sensor.packets)
            .map_err(|e| ConfigError::Invalid(format!("sensor.packets: {e}")))
    }

    /// The handshake advertised at the start of every session.
    pub fn hello(&self) -> Hello {
        let whep_url = self.media.whep_url.clone().filter(|u| !u.is_empty());
        let bridge = whep_url.as_deref().and_then(bridge_whep_url);
        let servo = &self.camera_servo;
        Hello {
            name: self.name.clone(),
            battery: self.battery,
            max_wheel_speed: self.max_wheel_speed,
            media: MediaDescriptor {
                whep_url,
                bridge_whep_url: bridge,
                manage: self.media.manage,
                service: self.media.service.clone(),
            },
            camera_servo: CameraServoDescriptor {
                enabled: servo.enabled,
                min_angle: servo.min_angle,
                max_angle: servo.max_angle,
                home_angle: servo.home_angle,
                nudge_degrees: servo.nudge_degrees,
                allow_raw_pulse: servo.allow_raw_pulse,
            },
            audio: AudioDescriptor {
                tts_enabled: self.audio.tts_enabled,
                default_engine: self.audio.default_engine.clone(),
                default_voice: self.audio.default_voice.clone(),
                default_pitch: self.audio.default_pitch,
            },
            night_vision: NightVisionDescriptor {
                enabled: self.night_vision.enabled,
                initial_on: self.night_vision.initial_on,
            },
        }
    }
}
