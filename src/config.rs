use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{rlog_debug, Error, Result};

/// Default number of replans allowed per turn before giving up.
pub const DEFAULT_REPLAN_LIMIT: u32 = 3;

/// Default number of trailing conversation messages shown to adapters.
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// Default timeout for a single planner/responder/tool call, in seconds.
pub const DEFAULT_ADAPTER_TIMEOUT_SECS: u64 = 90;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// How many replans a single turn may perform before the turn fails.
    #[serde(default = "default_replan_limit")]
    pub replan_limit: u32,
    /// How many trailing conversation messages the planner and responder see.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Timeout applied to each adapter call, in seconds.
    #[serde(default = "default_adapter_timeout_secs")]
    pub adapter_timeout_secs: u64,
    /// Directory for the file checkpoint store. Defaults to ~/.relay/sessions.
    pub checkpoint_dir: Option<String>,
    /// Path for the JSONL audit log. Defaults to ~/.relay/audit.jsonl.
    pub audit_log: Option<String>,
}

fn default_replan_limit() -> u32 {
    DEFAULT_REPLAN_LIMIT
}

fn default_history_window() -> usize {
    DEFAULT_HISTORY_WINDOW
}

fn default_adapter_timeout_secs() -> u64 {
    DEFAULT_ADAPTER_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            replan_limit: DEFAULT_REPLAN_LIMIT,
            history_window: DEFAULT_HISTORY_WINDOW,
            adapter_timeout_secs: DEFAULT_ADAPTER_TIMEOUT_SECS,
            checkpoint_dir: None,
            audit_log: None,
        }
    }
}

impl Config {
    pub fn relay_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".relay"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::relay_dir()?.join("relay.toml"))
    }

    pub fn sessions_dir(&self) -> Result<PathBuf> {
        match &self.checkpoint_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::relay_dir()?.join("sessions")),
        }
    }

    pub fn audit_log_path(&self) -> Result<PathBuf> {
        match &self.audit_log {
            Some(path) => Ok(expand_tilde(path)),
            None => Ok(Self::relay_dir()?.join("audit.jsonl")),
        }
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        rlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            rlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        rlog_debug!(
            "Config loaded: replan_limit={} history_window={} adapter_timeout={}s",
            config.replan_limit,
            config.history_window,
            config.adapter_timeout_secs
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let relay_dir = Self::relay_dir()?;
        if !relay_dir.exists() {
            fs::create_dir_all(&relay_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        rlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let relay_dir = Self::relay_dir()?;
        let sessions_dir = self.sessions_dir()?;
        if !relay_dir.exists() {
            fs::create_dir_all(&relay_dir)?;
        }
        if !sessions_dir.exists() {
            fs::create_dir_all(&sessions_dir)?;
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
