//! Pipeline configuration
//!
//! Every section has defaults, so an empty JSON object is a valid configuration:
//!
//! ```rust
//! use switchyard::PipelineConfig;
//!
//! let config = PipelineConfig::from_json_str(r#"{ "retry": { "max_retries": 5 } }"#).unwrap();
//! assert_eq!(config.retry.max_retries, 5);
//! assert_eq!(config.github.api_base, "https://api.github.com");
//! ```

use crate::retry::{BuildError, RetryPolicyBuilder, MAX_RETRY_BOUND};
use crate::{Jitter, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const ENV_API_BASE: &str = "SWITCHYARD_API_BASE";
pub const ENV_MAX_RETRIES: &str = "SWITCHYARD_MAX_RETRIES";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error(transparent)]
    Retry(#[from] BuildError),
}

/// Top-level configuration for the GitHub user pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub github: GithubConfig,
    pub retry: RetryConfig,
    pub cascade: CascadeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub api_base: String,
    pub user_agent: String,
    /// Bearer token; never written back out.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub request_timeout_ms: u64,
    /// Usernames shorter than this resolve to "no user" without a request.
    pub min_username_len: usize,
}

impl GithubConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            user_agent: concat!("switchyard/", env!("CARGO_PKG_VERSION")).to_string(),
            token: None,
            request_timeout_ms: 10_000,
            min_username_len: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3, jitter_min_ms: 1_000, jitter_max_ms: 5_000 }
    }
}

impl RetryConfig {
    pub fn jitter(&self) -> Result<Jitter, ConfigError> {
        Jitter::uniform_millis(self.jitter_min_ms, self.jitter_max_ms)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// A policy builder with the bound and jitter already applied.
    pub fn policy_builder<E>(&self) -> Result<RetryPolicyBuilder<E>, ConfigError>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Ok(RetryPolicy::builder().max_retries(self.max_retries).with_jitter(self.jitter()?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    pub debounce_ms: u64,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

impl CascadeConfig {
    /// `None` when debouncing is disabled (`debounce_ms == 0`).
    pub fn debounce(&self) -> Option<Duration> {
        (self.debounce_ms > 0).then(|| Duration::from_millis(self.debounce_ms))
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Self::from_json_str(&raw)
    }

    /// Apply `GITHUB_TOKEN`, `SWITCHYARD_API_BASE`, and `SWITCHYARD_MAX_RETRIES`.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup. Empty values are ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(token) = get(ENV_GITHUB_TOKEN) {
            self.github.token = Some(token);
        }
        if let Some(base) = get(ENV_API_BASE) {
            self.github.api_base = base;
        }
        if let Some(raw) = get(ENV_MAX_RETRIES) {
            self.retry.max_retries = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { name: ENV_MAX_RETRIES, value: raw })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.github.api_base.trim().is_empty() {
            return Err(ConfigError::Invalid("github.api_base must not be empty".into()));
        }
        if self.retry.jitter_min_ms > self.retry.jitter_max_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.jitter_min_ms ({}) exceeds retry.jitter_max_ms ({})",
                self.retry.jitter_min_ms, self.retry.jitter_max_ms
            )));
        }
        if self.retry.max_retries > MAX_RETRY_BOUND {
            return Err(ConfigError::Retry(BuildError::RetryBoundTooLarge {
                provided: self.retry.max_retries,
                max: MAX_RETRY_BOUND,
            }));
        }
        Ok(())
    }
}
