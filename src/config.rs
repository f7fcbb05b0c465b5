//! Configuration loading.
//!
//! Reads `config.json` and applies environment variable overrides.
//!
//! # Lookup order
//!
//! 1. Explicit path (`--config`)
//! 2. `RELAY_CONFIG` env var
//! 3. `./config.json`
//! 4. Platform config dir (`~/.config/message-relay/config.json` on Linux)
//!
//! # Environment overrides
//!
//! `RELAY_API_URL`, `RELAY_API_KEY` and `RELAY_GATEWAY_URL` replace the
//! corresponding file values.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{GATEWAY_POLL_INTERVAL, RECONNECT_INITIAL_DELAY, RECONNECT_MAX_DELAY};
use crate::relay::{ReconnectPolicy, RelayConfig};
use crate::ws;

/// File name looked up in the working directory and the config dir.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Reconnect delays as stored on disk.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectSettings {
    /// Delay after the first failed reconnect attempt, in milliseconds.
    pub initial_ms: u64,
    /// Upper bound for the reconnect delay, in milliseconds.
    pub max_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_ms: u64::try_from(RECONNECT_INITIAL_DELAY.as_millis()).unwrap_or(u64::MAX),
            max_ms: u64::try_from(RECONNECT_MAX_DELAY.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Configuration for the relay.
#[derive(Serialize, Deserialize, Clone)]
pub struct Config {
    /// Control API endpoint (`ws`, `wss`, `http` or `https`).
    pub api_url: String,
    /// Identity key presented in the handshake.
    #[serde(default)]
    pub api_key: String,
    /// Recipient identities, in send order.
    #[serde(default)]
    pub wid_jids: Vec<String>,
    /// Send an `ack` frame back after each command.
    #[serde(default)]
    pub acknowledge_commands: bool,
    /// Chat gateway base URL. Without one the relay runs a console dry run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_url: Option<String>,
    /// Seconds between gateway event polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Reconnect delays.
    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

fn default_poll_interval_secs() -> u64 {
    GATEWAY_POLL_INTERVAL.as_secs()
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("wid_jids", &self.wid_jids)
            .field("acknowledge_commands", &self.acknowledge_commands)
            .field("gateway_url", &self.gateway_url)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

impl Config {
    /// Locate, load and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no config file is found, it cannot be parsed, or
    /// the result fails [`Config::validate`].
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = Self::locate(explicit)?;
        let mut config = Self::load_from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolve which file to read.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file does not exist or no
    /// default location holds a config file.
    pub fn locate(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            anyhow::ensure!(path.exists(), "Config file {} does not exist", path.display());
            return Ok(path.to_path_buf());
        }
        if let Ok(path) = env::var("RELAY_CONFIG") {
            let path = PathBuf::from(path);
            anyhow::ensure!(path.exists(), "RELAY_CONFIG points at missing file {}", path.display());
            return Ok(path);
        }

        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Ok(local);
        }
        if let Some(dir) = dirs::config_dir() {
            let path = dir.join("message-relay").join(CONFIG_FILE_NAME);
            if path.exists() {
                return Ok(path);
            }
        }
        anyhow::bail!("Could not find {CONFIG_FILE_NAME} (pass --config or set RELAY_CONFIG)")
    }

    /// Parse a config file without applying overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid config JSON.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not open {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Error decoding {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(api_url) = env::var("RELAY_API_URL") {
            self.api_url = api_url;
        }
        if let Ok(api_key) = env::var("RELAY_API_KEY") {
            self.api_key = api_key;
        }
        if let Ok(gateway_url) = env::var("RELAY_GATEWAY_URL") {
            self.gateway_url = Some(gateway_url).filter(|url| !url.is_empty());
        }
    }

    /// Check the values that would otherwise fail only at connect time.
    ///
    /// # Errors
    ///
    /// Returns an error for an unusable endpoint, a zero poll interval, or
    /// reconnect bounds that are out of order.
    pub fn validate(&self) -> Result<()> {
        ws::normalize_endpoint(&self.api_url).context("Invalid api_url")?;
        if let Some(gateway_url) = &self.gateway_url {
            anyhow::ensure!(
                gateway_url.starts_with("http://") || gateway_url.starts_with("https://"),
                "gateway_url must be an http(s) URL, got {gateway_url:?}"
            );
        }
        anyhow::ensure!(self.poll_interval_secs > 0, "poll_interval_secs must be positive");
        anyhow::ensure!(
            self.reconnect.initial_ms <= self.reconnect.max_ms,
            "reconnect.initial_ms ({}) exceeds reconnect.max_ms ({})",
            self.reconnect.initial_ms,
            self.reconnect.max_ms
        );
        if self.api_key.is_empty() {
            log::warn!("api_key is empty; the control API will likely refuse the handshake");
        }
        if self.wid_jids.is_empty() {
            log::warn!("wid_jids is empty; create/delete commands will have no recipients");
        }
        Ok(())
    }

    /// Interval between gateway event polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Session settings derived from this config.
    ///
    /// # Errors
    ///
    /// Returns an error if `api_url` cannot be normalized.
    pub fn relay_config(&self) -> Result<RelayConfig> {
        Ok(RelayConfig {
            endpoint: ws::normalize_endpoint(&self.api_url)?,
            identity_key: self.api_key.clone(),
            acknowledge_commands: self.acknowledge_commands,
            reconnect: ReconnectPolicy {
                initial: Duration::from_millis(self.reconnect.initial_ms),
                max: Duration::from_millis(self.reconnect.max_ms),
            },
        })
    }
}
