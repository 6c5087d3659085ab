//! Provisioning configuration.
//!
//! A [`ProvisionConfig`] is assembled once at start-up (defaults, then an
//! optional JSON file, then command-line overrides), validated, and handed
//! to the provisioner. Nothing reads configuration from globals.

use std::collections::HashSet;
use std::fmt::{self, Display};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::configfs::layout::DEFAULT_ROOT;
use crate::configfs::types::validate_prefix;
use crate::configfs::{AddressFamily, ConfigfsLayout, DriveUuid, Transport};
use crate::kmod::DEFAULT_MODULES;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which existing subsystems the cleaner removes before provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupScope {
    /// Only `<prefix><index>` for each configured drive index
    Positional,
    /// Positional names plus every subsystem whose name starts with the prefix
    #[default]
    Prefix,
}

impl Display for CleanupScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupScope::Positional => write!(f, "positional"),
            CleanupScope::Prefix => write!(f, "prefix"),
        }
    }
}

impl FromStr for CleanupScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "positional" => Ok(CleanupScope::Positional),
            "prefix" => Ok(CleanupScope::Prefix),
            _ => Err(ConfigError::Invalid(format!(
                "unknown cleanup scope '{}': expected 'positional' or 'prefix'",
                s
            ))),
        }
    }
}

/// Retry settings for enabling a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnableRetry {
    /// Total attempts to write the `enable` attribute
    pub max_attempts: u32,
    /// Delay before the second attempt in milliseconds
    pub delay_ms: u64,
    /// Factor applied to the delay after each attempt (1 = fixed delay)
    pub backoff_multiplier: u32,
    /// Upper bound for the delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for EnableRetry {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 1000,
            backoff_multiplier: 1,
            max_delay_ms: 10_000,
        }
    }
}

/// Everything a provisioning run needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionConfig {
    /// Drives to export, in order; the 1-based position names unlabeled drives
    pub drives: Vec<DriveUuid>,
    /// Prefix of every subsystem name
    pub subsystem_prefix: String,
    /// Address the port listens on
    pub listen_addr: IpAddr,
    /// Transport service id (TCP port)
    pub port: u16,
    pub transport: Transport,
    pub address_family: AddressFamily,
    /// Mount point of the nvmet configfs tree
    pub configfs_root: PathBuf,
    /// Kernel modules loaded before touching configfs
    pub modules: Vec<String>,
    pub enable_retry: EnableRetry,
    pub cleanup_scope: CleanupScope,
    /// Run external commands through sudo
    pub use_sudo: bool,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            drives: Vec::new(),
            subsystem_prefix: "nvmet-".to_string(),
            listen_addr: IpAddr::from([0, 0, 0, 0]),
            port: 4420,
            transport: Transport::Tcp,
            address_family: AddressFamily::Ipv4,
            configfs_root: PathBuf::from(DEFAULT_ROOT),
            modules: DEFAULT_MODULES.iter().map(|m| m.to_string()).collect(),
            enable_retry: EnableRetry::default(),
            cleanup_scope: CleanupScope::Prefix,
            use_sudo: false,
        }
    }
}

impl ProvisionConfig {
    /// Load a configuration file. Missing fields take their defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Set the drive list
    pub fn with_drives(mut self, drives: Vec<DriveUuid>) -> Self {
        self.drives = drives;
        self
    }

    /// Set the subsystem name prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subsystem_prefix = prefix.into();
        self
    }

    /// Set the configfs root
    pub fn with_configfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.configfs_root = root.into();
        self
    }

    /// Set the enable retry budget
    pub fn with_enable_retry(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.enable_retry.max_attempts = max_attempts;
        self.enable_retry.delay_ms = delay.as_millis() as u64;
        self
    }

    /// Grow the enable retry delay by `multiplier` per attempt, up to `max_delay`
    pub fn with_enable_backoff(mut self, multiplier: u32, max_delay: Duration) -> Self {
        self.enable_retry.backoff_multiplier = multiplier;
        self.enable_retry.max_delay_ms = max_delay.as_millis() as u64;
        self
    }

    pub fn with_cleanup_scope(mut self, scope: CleanupScope) -> Self {
        self.cleanup_scope = scope;
        self
    }

    /// Check the configuration before anything touches the system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.drives.is_empty() {
            return Err(ConfigError::Invalid("no drives configured".into()));
        }

        let mut seen = HashSet::new();
        for drive in &self.drives {
            if !seen.insert(drive.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "drive '{}' listed more than once",
                    drive
                )));
            }
        }

        validate_prefix(&self.subsystem_prefix)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".into()));
        }

        let family_matches = matches!(
            (self.listen_addr, self.address_family),
            (IpAddr::V4(_), AddressFamily::Ipv4) | (IpAddr::V6(_), AddressFamily::Ipv6)
        );
        if !family_matches {
            return Err(ConfigError::Invalid(format!(
                "listen address {} does not match address family {}",
                self.listen_addr, self.address_family
            )));
        }

        if self.enable_retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "enable_retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.enable_retry.backoff_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "enable_retry.backoff_multiplier must be at least 1".into(),
            ));
        }

        if let Some(module) = self.modules.iter().find(|m| {
            m.is_empty()
                || !m
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }) {
            return Err(ConfigError::Invalid(format!(
                "invalid kernel module name '{}'",
                module
            )));
        }

        Ok(())
    }

    pub fn layout(&self) -> ConfigfsLayout {
        ConfigfsLayout::new(&self.configfs_root)
    }

    pub fn enable_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.enable_retry.max_attempts,
            Duration::from_millis(self.enable_retry.delay_ms),
        )
        .with_backoff(
            self.enable_retry.backoff_multiplier,
            Duration::from_millis(self.enable_retry.max_delay_ms),
        )
    }
}
