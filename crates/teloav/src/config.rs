//! Service configuration
//!
//! Resolved once at startup, in increasing precedence: compiled-in defaults,
//! an optional `--config` file (TOML or JSON), then environment variables
//! named after the upper-cased field.

use crate::error::{DiscoveryError, Result};
use crate::scheduler::RunMode;
use crate::walker::{WalkOptions, DEFAULT_MAX_DEPTH};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process-wide settings, immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Seconds between cycles; zero or negative runs a single cycle
    #[serde(default = "default_polling_interval", alias = "POLLING_INTERVAL")]
    pub polling_interval: i64,

    /// Telegraf configuration read each cycle
    #[serde(default = "default_path_in", alias = "TELEGRAF_CONFIG_PATH_IN")]
    pub telegraf_config_path_in: PathBuf,

    /// Telegraf configuration written when discovery changes it
    #[serde(default = "default_path_out", alias = "TELEGRAF_CONFIG_PATH_OUT")]
    pub telegraf_config_path_out: PathBuf,

    /// Deadline for each remote call in seconds, 0 disables it
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_browse_depth", alias = "MAX_BROWSE_DEPTH")]
    pub max_browse_depth: usize,

    /// Emit `data_type` in `nodes` entries
    #[serde(default, alias = "INCLUDE_DATA_TYPE")]
    pub include_data_type: bool,

    /// Copy the ingest file over the egress file once at startup
    #[serde(default, alias = "SEED_EGRESS")]
    pub seed_egress: bool,
}

fn default_polling_interval() -> i64 {
    -1
}

fn default_path_in() -> PathBuf {
    PathBuf::from("./telegraf.conf")
}

fn default_path_out() -> PathBuf {
    PathBuf::from("./telegraf.out.conf")
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_browse_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            polling_interval: default_polling_interval(),
            telegraf_config_path_in: default_path_in(),
            telegraf_config_path_out: default_path_out(),
            request_timeout_secs: default_request_timeout(),
            max_browse_depth: default_max_browse_depth(),
            include_data_type: false,
            seed_egress: false,
        }
    }
}

impl ServiceConfig {
    /// Defaults, then `file` if given, then the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load a settings file; fields it omits keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| DiscoveryError::Config(e.to_string()))
            }
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| DiscoveryError::Config(e.to_string()))
            }
            _ => Err(DiscoveryError::Config(format!(
                "Unsupported config file format: {} (expected .toml or .json)",
                path.display()
            ))),
        }
    }

    /// Override fields from variables returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("POLLING_INTERVAL") {
            self.polling_interval = parse_env("POLLING_INTERVAL", &value)?;
        }
        if let Some(value) = lookup("TELEGRAF_CONFIG_PATH_IN") {
            self.telegraf_config_path_in = PathBuf::from(value);
        }
        if let Some(value) = lookup("TELEGRAF_CONFIG_PATH_OUT") {
            self.telegraf_config_path_out = PathBuf::from(value);
        }
        if let Some(value) = lookup("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_env("REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("MAX_BROWSE_DEPTH") {
            self.max_browse_depth = parse_env("MAX_BROWSE_DEPTH", &value)?;
        }
        if let Some(value) = lookup("INCLUDE_DATA_TYPE") {
            self.include_data_type = parse_bool("INCLUDE_DATA_TYPE", &value)?;
        }
        if let Some(value) = lookup("SEED_EGRESS") {
            self.seed_egress = parse_bool("SEED_EGRESS", &value)?;
        }
        Ok(())
    }

    pub fn ingest_path(&self) -> &Path {
        &self.telegraf_config_path_in
    }

    pub fn egress_path(&self) -> &Path {
        &self.telegraf_config_path_out
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            max_depth: self.max_browse_depth,
            request_timeout: self.request_timeout(),
        }
    }

    pub fn run_mode(&self) -> RunMode {
        RunMode::from_polling_interval(self.polling_interval)
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| DiscoveryError::Config(format!("Invalid {}='{}': {}", key, value, e)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(DiscoveryError::Config(format!(
            "Invalid {}='{}': expected a boolean",
            key, value
        ))),
    }
}
