//! Configuration for the controller and node agents.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support (`CONFIG_PATH`)
//! - Environment variable overrides (`ROCKFERRY__SECTION__FIELD`)
//! - Component-wise validation
mod monitoring;
mod reconcile;
mod retry;
mod server;
mod storage;
mod watch;
pub use monitoring::*;
pub use reconcile::*;
pub use retry::*;
pub use server::*;
pub use storage::*;
pub use watch::*;


use std::env;
use std::path::Path;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

const ENV_PREFIX: &str = "ROCKFERRY";

/// Main configuration container
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ControllerConfig {
    /// Listen addresses, timeouts and log location
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage backend selection and tuning
    #[serde(default)]
    pub storage: StorageConfig,
    /// Watch engine queues and history
    #[serde(default)]
    pub watch: WatchConfig,
    /// Metrics exporter
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Node agent reconciliation
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

impl ControllerConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Sources merge in this order (later sources override earlier):
    /// 1. Type defaults
    /// 2. Configuration file from the `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with the `ROCKFERRY__` prefix
    ///
    /// Callers must call [`validate`](Self::validate) once all overrides are applied.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("ROCKFERRY__WATCH__HISTORY_CAPACITY", "4096");
    /// let cfg = ControllerConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        let config: Self = builder.add_source(environment()).build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies overrides from the file at `path`, then the environment again.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.server.validate()?;
        self.storage.validate()?;
        self.watch.validate()?;
        self.monitoring.validate()?;
        self.reconcile.validate()?;
        Ok(self)
    }
}

pub(super) fn config_error(msg: impl Into<String>) -> Error {
    Error::Config(ConfigError::Message(msg.into()))
}

/// Ensures directory path is valid and writable
pub(super) fn validate_directory(
    path: &Path,
    name: &str,
) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(config_error(format!("{name} path cannot be empty")));
    }

    #[cfg(not(test))]
    {
        use std::fs;
        if !path.exists() {
            fs::create_dir_all(path).map_err(|e| {
                config_error(format!(
                    "Failed to create {} directory at {}: {}",
                    name,
                    path.display(),
                    e
                ))
            })?;
        }

        let test_file = path.join(".permission_test");
        fs::write(&test_file, b"test").map_err(|e| {
            config_error(format!(
                "No write permission in {} directory {}: {}",
                name,
                path.display(),
                e
            ))
        })?;
        fs::remove_file(&test_file).ok();
    }

    Ok(())
}
