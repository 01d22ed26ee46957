//! Runtime configuration.
//!
//! Every knob the session needs lives in one [`Config`] that is built once at
//! startup and handed to the constructors. Values come from an optional TOML
//! file; anything missing falls back to the defaults below.

use serde::Deserialize;
use std::{fs, path::Path, time::Duration};

use crate::error::ConfigError;

/// Highest speed the actuator firmware accepts.
pub const MAX_SPEED: u32 = 15_000;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub serial_port: String,
    pub baud_rate: u32,
    pub telemetry_bind: String,
    pub telemetry_port: u16,
    pub speed_low: u32,
    pub speed_high: u32,
    pub recordings_dir: String,
    pub device_tag: String,
    pub log_dir: String,
    pub settle_delay_ms: u64,
    pub reset_delay_ms: u64,
    pub render_interval_ms: u64,
    pub input_poll_ms: u64,
    pub status_ttl_ms: u64,
    pub trial: TrialConfig,
}

/// Delays of the trial choreography.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrialConfig {
    pub announce_ms: u64,
    pub homing_ms: u64,
    pub settle_ms: u64,
    pub run_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyACM0".into(),
            baud_rate: 115_200,
            telemetry_bind: "0.0.0.0".into(),
            telemetry_port: 9999,
            speed_low: 50,
            speed_high: 100,
            recordings_dir: "mocap_data".into(),
            device_tag: "linear_actuator".into(),
            log_dir: "logs".into(),
            settle_delay_ms: 100,
            reset_delay_ms: 2_000,
            render_interval_ms: 100,
            input_poll_ms: 50,
            status_ttl_ms: 3_000,
            trial: TrialConfig::default(),
        }
    }
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            announce_ms: 500,
            homing_ms: 2_000,
            settle_ms: 500,
            run_ms: 3_000,
        }
    }
}

impl Config {
    /// Reads and validates a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, speed) in [("speed_low", self.speed_low), ("speed_high", self.speed_high)] {
            if speed > MAX_SPEED {
                return Err(ConfigError::Invalid(format!(
                    "{} = {} exceeds {}",
                    name, speed, MAX_SPEED
                )));
            }
        }
        if self.render_interval_ms == 0 || self.input_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "render_interval_ms and input_poll_ms must be non-zero".into(),
            ));
        }
        if self.device_tag.is_empty() {
            return Err(ConfigError::Invalid("device_tag must not be empty".into()));
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms)
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms)
    }

    pub fn input_poll(&self) -> Duration {
        Duration::from_millis(self.input_poll_ms)
    }

    pub fn status_ttl(&self) -> Duration {
        Duration::from_millis(self.status_ttl_ms)
    }
}
