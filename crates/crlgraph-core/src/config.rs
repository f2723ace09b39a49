use config as cfg;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::{CrlGraphError, Result};

pub const ENV_PREFIX: &str = "CRLGRAPH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

/// Tunables for one universe of discourse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseConfig {
    #[serde(default = "UniverseConfig::default_recording_undo")]
    pub recording_undo: bool,
    /// Upper bound on a contended out-of-order lock wait. `None` blocks until
    /// the lock is available.
    #[serde(default)]
    pub lock_wait_timeout_ms: Option<u64>,
    #[serde(default = "UniverseConfig::default_dispatch_threads")]
    pub dispatch_threads: usize,
    /// Causal-chain depth at which propagation stops. 0 disables the limit.
    #[serde(default = "UniverseConfig::default_max_propagation_depth")]
    pub max_propagation_depth: usize,
    #[serde(default = "UniverseConfig::default_observer_channel_capacity")]
    pub observer_channel_capacity: usize,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl UniverseConfig {
    fn default_recording_undo() -> bool {
        true
    }

    fn default_dispatch_threads() -> usize {
        num_cpus::get().max(1)
    }

    fn default_max_propagation_depth() -> usize {
        10_000
    }

    fn default_observer_channel_capacity() -> usize {
        1024
    }

    pub fn lock_wait_timeout(&self) -> Option<Duration> {
        self.lock_wait_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.dispatch_threads > 0, "dispatch_threads must be > 0");
        anyhow::ensure!(
            self.observer_channel_capacity > 0,
            "observer_channel_capacity must be > 0"
        );
        if let Some(ms) = self.lock_wait_timeout_ms {
            anyhow::ensure!(ms > 0, "lock_wait_timeout_ms must be > 0 when set");
        }
        anyhow::ensure!(
            !self.logging.level.trim().is_empty(),
            "logging.level cannot be empty"
        );
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CrlGraphError::Config(e.to_string()))
    }
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            recording_undo: Self::default_recording_undo(),
            lock_wait_timeout_ms: None,
            dispatch_threads: Self::default_dispatch_threads(),
            max_propagation_depth: Self::default_max_propagation_depth(),
            observer_channel_capacity: Self::default_observer_channel_capacity(),
            logging: LoggingConfig::default(),
        }
    }
}

pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with the following precedence (last wins):
    /// 1. Built-in defaults
    /// 2. The TOML file at `path`, when given
    /// 3. Environment variables (`CRLGRAPH__*`)
    pub fn load(path: Option<&Path>) -> Result<UniverseConfig> {
        Self::load_with_env(path, None)
    }

    pub(crate) fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<UniverseConfig> {
        let mut builder = cfg::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                cfg::File::from(path)
                    .format(cfg::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            cfg::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: UniverseConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CrlGraphError::Config(e.to_string()))?;
        config
            .validate()
            .map_err(|e| CrlGraphError::Config(format!("{e:#}")))?;

        info!(
            config_file = ?path,
            recording_undo = config.recording_undo,
            dispatch_threads = config.dispatch_threads,
            lock_wait_timeout_ms = ?config.lock_wait_timeout_ms,
            "universe configuration loaded"
        );
        Ok(config)
    }
}
