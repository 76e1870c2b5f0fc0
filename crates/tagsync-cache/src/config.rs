//! Cache configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use tagsync_core::CacheError;

/// Configuration of a [`TagCache`](crate::TagCache).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of subscription tasks running at once.
    #[serde(default = "default_subscription_workers")]
    subscription_workers: usize,

    /// Timeout applied to each remote service call.
    #[serde(default = "default_request_timeout", with = "duration_secs")]
    request_timeout: Duration,

    /// Background recovery settings.
    #[serde(default)]
    recovery: RecoveryConfig,
}

fn default_subscription_workers() -> usize {
    4
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            subscription_workers: default_subscription_workers(),
            request_timeout: default_request_timeout(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Creates a new builder for CacheConfig.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Returns the subscription worker bound.
    pub fn subscription_workers(&self) -> usize {
        self.subscription_workers
    }

    /// Returns the request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the recovery settings.
    pub fn recovery(&self) -> &RecoveryConfig {
        &self.recovery
    }

    /// Checks the values loaded from an external source.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.subscription_workers == 0 {
            return Err(CacheError::invalid_config(
                "subscription_workers must be greater than zero",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(CacheError::invalid_config(
                "request_timeout must be greater than zero",
            ));
        }
        self.recovery.validate()
    }
}

/// Settings of the background recovery task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Interval between recovery attempts.
    #[serde(default = "default_interval", with = "duration_secs")]
    pub interval: Duration,
    /// Number of consecutive failures before backing off.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    /// Backoff multiplier for failures.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Maximum backoff duration.
    #[serde(default = "default_max_backoff", with = "duration_secs")]
    pub max_backoff: Duration,
}

fn default_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_max_failures() -> u32 {
    3
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(300)
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            max_failures: default_max_failures(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl RecoveryConfig {
    fn validate(&self) -> Result<(), CacheError> {
        if self.interval.is_zero() {
            return Err(CacheError::invalid_config(
                "recovery interval must be greater than zero",
            ));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(CacheError::invalid_config(
                "recovery backoff_multiplier must be at least 1.0",
            ));
        }
        if self.max_backoff < self.interval {
            return Err(CacheError::invalid_config(
                "recovery max_backoff must not be shorter than the interval",
            ));
        }
        Ok(())
    }
}

/// Builder for CacheConfig.
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    subscription_workers: Option<usize>,
    request_timeout: Option<Duration>,
    recovery: Option<RecoveryConfig>,
}

impl CacheConfigBuilder {
    /// Sets the subscription worker bound.
    pub fn subscription_workers(mut self, workers: usize) -> Self {
        self.subscription_workers = Some(workers);
        self
    }

    /// Sets the request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the recovery settings.
    pub fn recovery(mut self, recovery: RecoveryConfig) -> Self {
        self.recovery = Some(recovery);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of range.
    pub fn build(self) -> Result<CacheConfig, CacheError> {
        let config = CacheConfig {
            subscription_workers: self
                .subscription_workers
                .unwrap_or_else(default_subscription_workers),
            request_timeout: self.request_timeout.unwrap_or_else(default_request_timeout),
            recovery: self.recovery.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Serializes durations as (fractional) seconds.
mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
