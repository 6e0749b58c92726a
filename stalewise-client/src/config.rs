//! Configuration loading for the stalewise client.
//!
//! All fields are required unless explicitly marked optional. No defaults.

use serde::Deserialize;
use stalewise_core::CacheConfig;
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the config path when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "STALEWISE_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    pub dedupe_interval_ms: u64,
    pub polling_interval_ms: u64,
    pub logs_polling_interval_ms: u64,
    pub auth: AuthConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives, e.g. `stalewise=debug`.
    pub filter: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientConfigError {
    #[error("Missing configuration file path (use --config or STALEWISE_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ClientConfig {
    /// Load from the path resolved on the command line, if any.
    pub fn load(path: Option<&Path>) -> Result<Self, ClientConfigError> {
        let path = path.ok_or(ClientConfigError::MissingConfigPath)?;
        Self::from_path(path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ClientConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ClientConfigError> {
        let config: ClientConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ClientConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(ClientConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must start with http:// or https://".to_string(),
            });
        }
        let intervals = [
            ("request_timeout_ms", self.request_timeout_ms),
            ("dedupe_interval_ms", self.dedupe_interval_ms),
            ("polling_interval_ms", self.polling_interval_ms),
            ("logs_polling_interval_ms", self.logs_polling_interval_ms),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(ClientConfigError::InvalidValue {
                    field,
                    reason: "must be > 0".to_string(),
                });
            }
        }
        if self
            .auth
            .api_key
            .as_deref()
            .is_some_and(|key| key.trim().is_empty())
        {
            return Err(ClientConfigError::InvalidValue {
                field: "auth.api_key",
                reason: "must not be empty when set".to_string(),
            });
        }
        if self.log.filter.trim().is_empty() {
            return Err(ClientConfigError::InvalidValue {
                field: "log.filter",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn logs_polling_interval(&self) -> Duration {
        Duration::from_millis(self.logs_polling_interval_ms)
    }

    /// Cache policy derived from this configuration.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new().with_dedupe_interval(Duration::from_millis(self.dedupe_interval_ms))
    }
}
