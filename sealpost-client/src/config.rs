//! Load client settings from file and environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sealpost_core::config::TransferInput;
use sealpost_core::RetryPolicy;
use serde::Deserialize;

/// Client settings. File: ~/.config/sealpost/config.toml or /etc/sealpost/config.toml.
/// Env overrides: SEALPOST_TRANSFER_INFO, SEALPOST_IDENTITY_DIR, SEALPOST_IO_TIMEOUT_SECS,
/// SEALPOST_LOG.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Three-line transfer file, used when no `[transfer]` table is given.
    #[serde(default = "default_transfer_info")]
    pub transfer_info: PathBuf,
    /// Directory holding me.info and priv.key.
    #[serde(default = "default_identity_dir")]
    pub identity_dir: PathBuf,
    /// Connect/read/write timeout; 0 disables it.
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default)]
    pub transfer: Option<TransferInput>,
    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default = "default_max_request_attempts")]
    pub max_request_attempts: u32,
    #[serde(default = "default_max_checksum_passes")]
    pub max_checksum_passes: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_transfer_info() -> PathBuf {
    PathBuf::from("transfer.info")
}
fn default_identity_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_io_timeout_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_owned()
}
fn default_max_request_attempts() -> u32 {
    3
}
fn default_max_checksum_passes() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    250
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            transfer_info: default_transfer_info(),
            identity_dir: default_identity_dir(),
            io_timeout_secs: default_io_timeout_secs(),
            log_level: default_log_level(),
            log_json: false,
            transfer: None,
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_request_attempts: default_max_request_attempts(),
            max_checksum_passes: default_max_checksum_passes(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_request_attempts: self.max_request_attempts,
            max_checksum_passes: self.max_checksum_passes,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

impl Settings {
    /// None when timeouts are disabled.
    pub fn io_timeout(&self) -> Option<Duration> {
        (self.io_timeout_secs > 0).then(|| Duration::from_secs(self.io_timeout_secs))
    }

    /// Apply SEALPOST_* overrides. `var` looks a variable up (std::env::var in production).
    pub fn apply_env(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), SettingsError> {
        if let Some(s) = var("SEALPOST_TRANSFER_INFO") {
            self.transfer_info = PathBuf::from(s);
        }
        if let Some(s) = var("SEALPOST_IDENTITY_DIR") {
            self.identity_dir = PathBuf::from(s);
        }
        if let Some(s) = var("SEALPOST_IO_TIMEOUT_SECS") {
            self.io_timeout_secs = s.trim().parse().map_err(|_| SettingsError::Env {
                var: "SEALPOST_IO_TIMEOUT_SECS",
                value: s,
            })?;
        }
        if let Some(s) = var("SEALPOST_LOG") {
            self.log_level = s;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {var}={value:?}")]
    Env { var: &'static str, value: String },
}

/// Load settings: defaults, then the settings file (`explicit`, or the first existing
/// default path), then environment variables.
pub fn load(explicit: Option<&Path>) -> Result<Settings, SettingsError> {
    let mut settings = match explicit {
        Some(path) => load_file(path)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(path) => load_file(&path)?,
            None => Settings::default(),
        },
    };
    settings.apply_env(|name| std::env::var(name).ok())?;
    Ok(settings)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/sealpost/config.toml"));
    }
    out.push(PathBuf::from("/etc/sealpost/config.toml"));
    out
}

fn load_file(path: &Path) -> Result<Settings, SettingsError> {
    let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_owned(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| SettingsError::Parse {
        path: path.to_owned(),
        source,
    })
}
