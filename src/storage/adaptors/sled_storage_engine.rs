use std::path::Path;

use sled::Batch;
use tracing::debug;
use tracing::instrument;
use tracing::trace;
use tracing::warn;

use crate::constants::RESOURCE_TREE;
use crate::Result;
use crate::StorageEngine;
use crate::StorageError;
use crate::WriteOp;

/// Durable engine backed by one sled tree
pub struct SledStorageEngine {
    db: sled::Db,

    pub(crate) tree: sled::Tree,
}

impl std::fmt::Debug for SledStorageEngine {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledStorageEngine").field("len", &self.tree.len()).finish()
    }
}

impl SledStorageEngine {
    pub fn new(db: sled::Db) -> Result<Self> {
        let tree = db.open_tree(RESOURCE_TREE)?;
        Ok(Self { db, tree })
    }

    /// Opens (or creates) the database under `path`.
    pub fn open(
        path: impl AsRef<Path> + std::fmt::Debug,
        cache_capacity: u64,
        flush_every_ms: Option<u64>,
    ) -> Result<Self> {
        debug!("open sled resource db at: {:?}", &path);
        let db = sled::Config::default()
            .path(path.as_ref())
            .cache_capacity(cache_capacity)
            .flush_every_ms(flush_every_ms)
            .use_compression(true)
            .compression_factor(1)
            .open()
            .map_err(|e| {
                warn!("Try to open DB at this location: {:?} and failed: {:?}", path, e);
                StorageError::IoError(std::io::Error::other(e))
            })?;
        Self::new(db)
    }
}

impl StorageEngine for SledStorageEngine {
    fn get(
        &self,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    #[instrument(skip(self, prefix))]
    fn scan_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (key, value) = item?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn commit(
        &self,
        batch: Vec<WriteOp>,
    ) -> Result<()> {
        trace!("commit batch len = {}", batch.len());
        let mut sled_batch = Batch::default();
        for op in batch {
            match op {
                WriteOp::Put { key, value } => sled_batch.insert(key, value),
                WriteOp::Delete { key } => sled_batch.remove(key),
            }
        }
        self.tree.apply_batch(sled_batch)?;
        // Durable once commit returns
        self.tree.flush()?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn flush(&self) -> Result<()> {
        self.tree.flush()?;
        self.db.flush()?;
        Ok(())
    }

    fn len(&self) -> usize {
        self.tree.len()
    }
}
