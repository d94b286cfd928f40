//! TOML configuration: device port, storage paths, sync timing, logging.
//!
//! ```toml
//! [device]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [storage]
//! data_dir = "./data"
//! address_book = "./data/addressbook.txt"
//!
//! [sync]
//! poll_interval_secs = 30
//! idle_timeout_ms = 1000
//! command_timeout_ms = 3000
//! delete_after_read = true
//! auto_add_contacts = true
//!
//! [logging]
//! level = "info"
//! file = "cellsync.log"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::modem::EngineTuning;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub port: String,
    pub baud_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one file per stored message.
    pub data_dir: String,
    /// Line-oriented `name,phone` contact file.
    pub address_book: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between inbound polls in `start` mode.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Multi-line replies without a terminal sentinel are framed by this
    /// much line silence. Racy by nature; a reply landing just outside
    /// the window counts as dropped, never as corrupt state.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,
    /// Hard ceiling per command exchange.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    /// Use `AT+CMGRD` (read and delete from SIM) instead of `AT+CMGR`.
    #[serde(default = "default_true")]
    pub delete_after_read: bool,
    /// Create an `Unknown <last4>` contact for unrecognized senders.
    #[serde(default = "default_true")]
    pub auto_add_contacts: bool,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    1000
}

fn default_command_timeout() -> u64 {
    3000
}

fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            idle_timeout_ms: default_idle_timeout(),
            command_timeout_ms: default_command_timeout(),
            delete_after_read: true,
            auto_add_contacts: true,
        }
    }
}

impl SyncConfig {
    pub fn engine_tuning(&self) -> EngineTuning {
        EngineTuning {
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device: DeviceConfig {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 115200,
            },
            storage: StorageConfig {
                data_dir: "./data".to_string(),
                address_book: "./data/addressbook.txt".to_string(),
            },
            sync: SyncConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("cellsync.log".to_string()),
            },
        }
    }
}
