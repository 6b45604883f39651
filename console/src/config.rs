//! Console configuration loading and parsing

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/etc/file-handles/config.toml";

/// Root configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub activation: ActivationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SecurityConfig {
    /// Bearer token required by every management route. Unset means the
    /// routes reject all callers.
    pub admin_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActivationConfig {
    /// Helper executable; defaults to the running binary
    pub helper_program: Option<PathBuf>,
    #[serde(default = "default_helper_args")]
    pub helper_args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ActivationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            helper_program: None,
            helper_args: default_helper_args(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
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

fn default_listen_addr() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_helper_args() -> Vec<String> {
    vec!["attach".to_string()]
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load configuration from `path`, `FHD_CONFIG`, or the default location.
///
/// A missing file yields defaults. `FHD_ADMIN_TOKEN` overrides the token
/// from the file.
pub fn load_config(path: Option<&Path>) -> Result<ConsoleConfig> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(
            std::env::var("FHD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
        ),
    };

    let mut config = if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
        toml::from_str::<ConsoleConfig>(&content)
            .with_context(|| format!("Failed to parse config from {}", config_path.display()))?
    } else {
        tracing::warn!(
            "Config file not found at {}, using defaults",
            config_path.display()
        );
        ConsoleConfig::default()
    };

    if config.activation.timeout_secs == 0 {
        bail!(
            "activation.timeout_secs in {} must be greater than zero",
            config_path.display()
        );
    }

    if let Ok(token) = std::env::var("FHD_ADMIN_TOKEN") {
        if !token.trim().is_empty() {
            config.security.admin_token = Some(token);
        }
    }

    Ok(config)
}
