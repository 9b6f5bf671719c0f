#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Single write inside an atomic [`StorageEngine::commit`] batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl WriteOp {
    pub fn put(
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Self {
        WriteOp::Put {
            key: key.as_ref().to_vec(),
            value: value.as_ref().to_vec(),
        }
    }

    pub fn delete(key: impl AsRef<[u8]>) -> Self {
        WriteOp::Delete {
            key: key.as_ref().to_vec(),
        }
    }
}

/// Durable ordered key/value backend under the resource store.
///
/// This is where a replicated log is plugged in: the store only needs
/// `commit` to be atomic and durable once it returns.
#[cfg_attr(test, automock)]
pub trait StorageEngine: Send + Sync + 'static {
    fn get(
        &self,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>>;

    /// Every entry whose key starts with `prefix`, in key order
    fn scan_prefix(
        &self,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Applies `batch` atomically: all writes or none.
    fn commit(
        &self,
        batch: Vec<WriteOp>,
    ) -> Result<()>;

    fn flush(&self) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
