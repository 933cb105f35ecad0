//! Configuration management
//!
//! Settings come from a TOML file layered with `DRCOM_*` environment
//! variables (`DRCOM_AUTH__PASSWORD`, `DRCOM_ALERT__WEBHOOK_URL`, ...), so
//! secrets can be kept out of the file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::portal::drcom::DEFAULT_ACCOUNT_PREFIX;

const ENV_PREFIX: &str = "DRCOM";

/// Root configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// Portal account
    #[serde(default)]
    pub auth: AuthConfig,

    /// Connectivity loop settings
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Traffic alerting
    #[serde(default)]
    pub alert: AlertConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// File the values were read from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    /// Portal base URL, e.g. http://10.10.10.9:801
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Prefix the login endpoint expects in front of the account name
    #[serde(default = "default_account_prefix")]
    pub account_prefix: String,

    /// Local IP reported to the portal (auto-detect if empty)
    #[serde(default)]
    pub ip: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            username: String::new(),
            password: String::new(),
            account_prefix: default_account_prefix(),
            ip: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DaemonConfig {
    /// Check interval in seconds
    #[serde(default = "default_interval")]
    pub interval: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AlertConfig {
    /// Traffic alert threshold in GB, 0 disables
    #[serde(default = "default_traffic_threshold")]
    pub traffic_threshold: f64,

    #[serde(default)]
    pub webhook_url: String,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            traffic_threshold: default_traffic_threshold(),
            webhook_url: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "http://10.10.10.9:801".to_string()
}

fn default_account_prefix() -> String {
    DEFAULT_ACCOUNT_PREFIX.to_string()
}

fn default_interval() -> u64 {
    60
}

fn default_traffic_threshold() -> f64 {
    80.0
}

fn default_log_level() -> String {
    "info".to_string()
}

fn candidate_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("config.toml"),
        PathBuf::from("/etc/drcom/config.toml"),
        dirs::home_dir()
            .map(|h| h.join(".config/drcom/config.toml"))
            .unwrap_or_default(),
    ]
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

impl Config {
    /// Load configuration from `explicit`, or from the first existing
    /// default location, or from defaults alone. Environment variables
    /// override file values in every case.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) if !p.exists() => bail!("Config file not found: {}", p.display()),
            Some(p) => Some(p.to_path_buf()),
            None => candidate_paths()
                .into_iter()
                .find(|p| !p.as_os_str().is_empty() && p.exists()),
        };

        let mut cfg = Self::build(path.as_deref(), environment())?;
        cfg.source = path;
        Ok(cfg)
    }

    /// Log where the configuration came from. Called once logging is up,
    /// since loading happens before the subscriber exists.
    pub fn report_source(&self) {
        match &self.source {
            Some(p) => {
                tracing::debug!("Loaded config from: {}", p.display());
                if let Some(warning) = exposure_warning(p) {
                    tracing::warn!("{}", warning);
                }
            }
            None => tracing::debug!("No config file found, using defaults"),
        }
    }

    fn build(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(p) = path {
            builder = builder.add_source(config::File::from(p).format(config::FileFormat::Toml));
        }

        builder
            .add_source(env)
            .build()
            .context("Failed to read config")?
            .try_deserialize()
            .context("Failed to parse config")
    }

    /// Login and daemon need a complete account
    pub fn validate_credentials(&self) -> Result<()> {
        if self.auth.username.is_empty() || self.auth.password.is_empty() {
            bail!("auth.username and auth.password must be set (config file or DRCOM_AUTH__* variables)");
        }
        Ok(())
    }

    /// Effective check interval; a zero setting falls back to the default
    pub fn check_interval(&self) -> Duration {
        match self.daemon.interval {
            0 => Duration::from_secs(default_interval()),
            secs => Duration::from_secs(secs),
        }
    }

    /// TOML rendering with the password masked
    pub fn to_masked_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        if !shown.auth.password.is_empty() {
            shown.auth.password = "********".to_string();
        }
        toml::to_string_pretty(&shown).context("Failed to render config")
    }
}

/// Warning text when the credentials file is open to group or others
#[cfg(unix)]
fn exposure_warning(path: &Path) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path).ok()?.permissions().mode() & 0o777;
    if mode & 0o077 == 0 {
        return None;
    }
    Some(format!(
        "Config file {} is accessible by other users ({:o}), run 'chmod 600 {}'",
        path.display(),
        mode,
        path.display()
    ))
}

#[cfg(not(unix))]
fn exposure_warning(_path: &Path) -> Option<String> {
    None
}
