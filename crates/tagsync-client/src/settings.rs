//! Client settings.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `TAGSYNC__*` environment variables. Nested keys use `__` as separator, so
//! `TAGSYNC__CACHE__REQUEST_TIMEOUT=5` sets `cache.request_timeout`.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

use tagsync_cache::CacheConfig;

use crate::error::{ClientError, Result};

/// Prefix of the environment variables read by [`ClientSettings::load`].
pub const ENV_PREFIX: &str = "TAGSYNC";

const ENV_SEPARATOR: &str = "__";

/// Settings of the monitoring client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Filter used when `RUST_LOG` is not set.
    pub log_filter: String,
    /// Tag cache configuration.
    pub cache: CacheConfig,
    /// Simulated session parameters.
    pub session: SessionSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            cache: CacheConfig::default(),
            session: SessionSettings::default(),
        }
    }
}

/// Parameters of the simulated monitoring session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Number of tags defined on the simulated server.
    pub tag_count: u64,
    /// Name pattern the monitor subscribes to.
    pub pattern: String,
    /// Rounds of value updates published to every tag.
    pub update_rounds: u32,
    /// Pause between update rounds, in milliseconds.
    pub update_interval_ms: u64,
    /// Simulate a heartbeat loss and resume.
    pub simulate_outage: bool,
    /// Replay a value through history mode.
    pub history_playback: bool,
    /// Run the background recovery task.
    pub recovery: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tag_count: 50,
            pattern: "PLANT.*".to_string(),
            update_rounds: 5,
            update_interval_ms: 200,
            simulate_outage: true,
            history_playback: true,
            recovery: true,
        }
    }
}

impl SessionSettings {
    /// Returns the pause between update rounds.
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}

impl ClientSettings {
    /// Loads settings from the process environment and an optional file.
    ///
    /// # Errors
    ///
    /// Fails if a given file is missing or malformed, or if the merged
    /// settings are out of range.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`load`](Self::load), reading variables from `env` instead of
    /// the process environment when it is given.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading settings file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .source(env);

        let settings: ClientSettings = builder.add_source(environment).build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks the merged settings.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        if self.session.tag_count == 0 {
            return Err(ClientError::invalid_settings(
                "session.tag_count must be greater than zero",
            ));
        }
        if self.session.pattern.trim().is_empty() {
            return Err(ClientError::invalid_settings("session.pattern must not be empty"));
        }
        Ok(())
    }

    /// Returns the cache configuration.
    pub fn cache_config(&self) -> CacheConfig {
        self.cache.clone()
    }
}
