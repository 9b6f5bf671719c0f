use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::config_error;
use super::validate_directory;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Durable sled database under `db_root_dir`
    #[default]
    Sled,
    /// Ephemeral in-memory map
    Memory,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default = "default_db_root_dir")]
    pub db_root_dir: PathBuf,

    #[serde(default = "default_cache_capacity_in_bytes")]
    pub cache_capacity_in_bytes: u64,

    /// Background flush interval; commits flush regardless
    #[serde(default = "default_flush_every_ms")]
    pub flush_every_ms: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            db_root_dir: default_db_root_dir(),
            cache_capacity_in_bytes: default_cache_capacity_in_bytes(),
            flush_every_ms: default_flush_every_ms(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backend == StorageBackend::Sled {
            validate_directory(&self.db_root_dir, "db_root_dir")?;
            if self.cache_capacity_in_bytes == 0 {
                return Err(config_error("storage.cache_capacity_in_bytes must be greater than 0"));
            }
        }
        Ok(())
    }

    /// Location of the resource database
    pub fn resource_db_path(&self) -> PathBuf {
        self.db_root_dir.join("resources")
    }
}

fn default_db_root_dir() -> PathBuf {
    PathBuf::from("./db")
}
fn default_cache_capacity_in_bytes() -> u64 {
    64 * 1024 * 1024
}
fn default_flush_every_ms() -> Option<u64> {
    Some(500)
}
