//! Daemon configuration.
//!
//! A single TOML file, every field defaulted so the daemon runs with no
//! file at all. Looked up under the platform config dir
//! (`…/tanknode/config.toml`) or wherever `TANKNODE_CONFIG` points.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

const CONFIG_ENV: &str = "TANKNODE_CONFIG";
const CONFIG_DIR: &str = "tanknode";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub hardware: HardwareConfig,
    pub tank: TankConfig,
    pub timing: TimingConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub topic_prefix: String,
    pub keep_alive_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            topic_prefix: "mynode".to_string(),
            keep_alive_secs: 5,
        }
    }
}

/// BCM pin numbers.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub relay_pin: u8,
    pub trigger_pin: u8,
    pub echo_pin: u8,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            relay_pin: 17,
            trigger_pin: 23,
            echo_pin: 24,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TankConfig {
    pub height_cm: f32,
    /// Minimum level change worth re-reporting.
    pub report_threshold_cm: f32,
    pub sensor_offset_cm: f32,
}

impl Default for TankConfig {
    fn default() -> Self {
        Self {
            height_cm: 100.0,
            report_threshold_cm: 0.5,
            sensor_offset_cm: 0.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    pub sample_period_ms: u64,
    pub echo_timeout_us: u64,
    pub store_lock_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub config_wait_ms: u64,
    pub task_timeout_ms: u64,
    pub supervisor_period_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: 1000,
            echo_timeout_us: 30_000,
            store_lock_timeout_ms: 100,
            reconnect_delay_ms: 5000,
            config_wait_ms: 20_000,
            task_timeout_ms: 10_000,
            supervisor_period_ms: 1000,
        }
    }
}

impl TimingConfig {
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_micros(self.echo_timeout_us)
    }

    pub fn store_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.store_lock_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn config_wait(&self) -> Duration {
        Duration::from_millis(self.config_wait_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn supervisor_period(&self) -> Duration {
        Duration::from_millis(self.supervisor_period_ms)
    }
}

impl Config {
    /// Loads the configuration file if one exists, defaults otherwise.
    /// An unreadable or unparseable file is a fatal setup failure, not
    /// something to silently paper over.
    pub fn load() -> Result<Self, ConfigError> {
        let path = match env::var_os(CONFIG_ENV) {
            Some(explicit) => Some(PathBuf::from(explicit)),
            None => dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE)),
        };

        match path {
            Some(path) if path.is_file() => {
                let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?;
                info!(path = %path.display(), "configuration loaded");
                Ok(config)
            }
            _ => {
                info!("no configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}
