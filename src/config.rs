//! Engine configuration.
//!
//! Loaded with the following priority:
//!
//! 1. Environment variables (`BUILDRIG_*`)
//! 2. Configuration file (`$BUILDRIG_CONFIG` or `~/.config/buildrig/config.yaml`)
//! 3. Default values
//!
//! ## Example Configuration File
//!
//! ```yaml
//! runtime: podman
//! socket: /run/user/1000/podman/podman.sock
//! log_level: debug
//! request_timeout_secs: 300
//! ```

use crate::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, CONFIG_PATH_ENV, DEFAULT_REQUEST_TIMEOUT_SECS,
    DOCKER_BACKEND, ENV_PREFIX,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Registered backend name (`docker`, `podman`, ...).
    pub runtime: String,
    /// Explicit daemon socket; skips discovery when set.
    pub socket: Option<PathBuf>,
    /// base64 registry credential blob used for pulls and pushes.
    pub registry_auth: String,
    /// Default log filter for the binary.
    pub log_level: String,
    /// Per-request timeout for daemon calls.
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runtime: DOCKER_BACKEND.to_string(),
            socket: None,
            registry_auth: String::new(),
            log_level: "info".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl EngineConfig {
    /// Loads from the default location, then applies env overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(default_config_path);

        let mut config = match path {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads from a specific YAML file without env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config = Self::from_yaml(&content).map_err(|e| match e {
            Error::Serialization(reason) => Error::Config {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parses YAML; missing keys keep their defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Applies `BUILDRIG_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.is_empty());

        if let Some(runtime) = var("RUNTIME") {
            self.runtime = runtime;
        }
        if let Some(socket) = var("SOCKET") {
            self.socket = Some(PathBuf::from(socket));
        }
        if let Some(auth) = var("REGISTRY_AUTH") {
            self.registry_auth = auth;
        }
        if let Some(level) = var("LOG") {
            self.log_level = level;
        }
        if let Some(timeout) = var("REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.request_timeout_secs = timeout;
        }
    }

    /// Per-request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Returns `~/.config/buildrig/config.yaml` when a config dir exists.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
