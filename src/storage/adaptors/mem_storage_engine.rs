use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::trace;

use crate::Result;
use crate::StorageEngine;
use crate::WriteOp;

/// In-memory engine for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct MemStorageEngine {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStorageEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageEngine for MemStorageEngine {
    fn get(
        &self,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let data = self.data.read();
        Ok(data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn commit(
        &self,
        batch: Vec<WriteOp>,
    ) -> Result<()> {
        trace!("commit batch len = {}", batch.len());
        let mut data = self.data.write();
        for op in batch {
            match op {
                WriteOp::Put { key, value } => {
                    data.insert(key, value);
                }
                WriteOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.data.read().len()
    }
}
