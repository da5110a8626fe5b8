//! Engine configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use turbo_cache::{CachePolicy, DEFAULT_STALE_TIME};
use turbo_data::{BackoffStrategy, RetryPolicy};

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    /// The file is not valid JSON for this schema.
    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    /// Parsed, but a value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Backoff between read retries. Delays are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum BackoffConfig {
    /// Retry immediately.
    None,
    /// Constant delay.
    Fixed {
        /// Delay in milliseconds.
        delay_ms: u64,
    },
    /// Doubling delay, capped.
    Exponential {
        /// First delay in milliseconds.
        base_ms: u64,
        /// Cap in milliseconds.
        max_ms: u64,
    },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::Exponential {
            base_ms: 50,
            max_ms: 500,
        }
    }
}

impl From<&BackoffConfig> for BackoffStrategy {
    fn from(config: &BackoffConfig) -> Self {
        match *config {
            BackoffConfig::None => BackoffStrategy::None,
            BackoffConfig::Fixed { delay_ms } => {
                BackoffStrategy::Fixed(Duration::from_millis(delay_ms))
            }
            BackoffConfig::Exponential { base_ms, max_ms } => BackoffStrategy::Exponential {
                base: Duration::from_millis(base_ms),
                max: Duration::from_millis(max_ms),
            },
        }
    }
}

/// Read retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay between attempts.
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Configuration for a [`QueryClient`](crate::QueryClient).
///
/// ```toml
/// stale_time_ms = 30000
/// idle_eviction_ms = 300000
/// session_path = "/session"
///
/// [resource_stale_times]
/// items = 60000
///
/// [retry]
/// max_retries = 2
/// backoff = { strategy = "fixed", delay_ms = 100 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default staleness window in milliseconds.
    pub stale_time_ms: u64,
    /// Staleness windows per resource prefix, in milliseconds.
    pub resource_stale_times: BTreeMap<String, u64>,
    /// Read retry settings.
    pub retry: RetryConfig,
    /// Evict unsubscribed entries after this many milliseconds. Unset keeps
    /// them until explicitly evicted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_eviction_ms: Option<u64>,
    /// Path probed to resolve the session.
    pub session_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: DEFAULT_STALE_TIME.as_millis() as u64,
            resource_stale_times: BTreeMap::new(),
            retry: RetryConfig::default(),
            idle_eviction_ms: None,
            session_path: "/session".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file. `.json` files are read as JSON, anything else as TOML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Check values that parse but make no sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.session_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "session_path must start with '/': {}",
                self.session_path
            )));
        }
        if let BackoffConfig::Exponential { base_ms, max_ms } = self.retry.backoff {
            if base_ms > max_ms {
                return Err(ConfigError::Invalid(format!(
                    "backoff base ({}ms) exceeds max ({}ms)",
                    base_ms, max_ms
                )));
            }
        }
        Ok(())
    }

    /// Freshness and eviction policy for the cache store.
    pub fn cache_policy(&self) -> CachePolicy {
        let mut policy = CachePolicy::new(Duration::from_millis(self.stale_time_ms));
        for (prefix, ms) in &self.resource_stale_times {
            policy = policy.with_resource(prefix.clone(), Duration::from_millis(*ms));
        }
        if let Some(ms) = self.idle_eviction_ms {
            policy = policy.with_idle_eviction(Duration::from_millis(ms));
        }
        policy
    }

    /// Retry policy for reads.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.max_retries).with_backoff((&self.retry.backoff).into())
    }

    /// Set the default staleness window.
    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time_ms = stale_time.as_millis() as u64;
        self
    }

    /// Set a per-resource staleness window.
    pub fn with_resource_stale_time(mut self, prefix: impl Into<String>, stale_time: Duration) -> Self {
        self.resource_stale_times
            .insert(prefix.into(), stale_time.as_millis() as u64);
        self
    }

    /// Set the retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Set the retry backoff.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.retry.backoff = backoff;
        self
    }

    /// Enable idle eviction.
    pub fn with_idle_eviction(mut self, after: Duration) -> Self {
        self.idle_eviction_ms = Some(after.as_millis() as u64);
        self
    }

    /// Set the session probe path.
    pub fn with_session_path(mut self, path: impl Into<String>) -> Self {
        self.session_path = path.into();
        self
    }
}
