//! Pluggable key-value storage backend for the ledger (§4.5, §6).
//!
//! A persistent RocksDB implementation backs real nodes; an in-memory
//! implementation backs tests (and any in-process demo that doesn't need
//! durability).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

/// Storage-level error type.
#[derive(Debug)]
pub enum StorageError {
    RocksDb(rocksdb::Error),
    Io(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::RocksDb(e) => write!(f, "rocksdb error: {e}"),
            StorageError::Io(msg) => write!(f, "storage error: {msg}"),
        }
    }
}
impl std::error::Error for StorageError {}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::RocksDb(e)
    }
}

/// Minimal byte-oriented KV interface the ledger needs: `get`/`put`/`iter`.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;
    /// Iterates every stored `(key, value)` pair. Order is unspecified.
    fn iter(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;
}

/// In-memory [`KvStore`], used by tests and the in-process demo loop.
///
/// Per §4.5, `setStorage`/`getStorage` calls against an in-memory-only
/// ledger read back as zero and do not persist; that rule is enforced by
/// the ledger, not this store (this store persists whatever it is given).
#[derive(Default)]
pub struct InMemoryKvStore {
    map: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for InMemoryKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.map.lock().unwrap().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn iter(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        Ok(self
            .map
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// RocksDB-backed [`KvStore`] for persistent nodes.
pub struct RocksDbKvStore {
    db: rocksdb::DB,
}

/// Configuration for [`RocksDbKvStore`].
#[derive(Clone, Debug)]
pub struct RocksDbConfig {
    pub path: String,
    pub create_if_missing: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "data/ledger-db".to_string(),
            create_if_missing: true,
        }
    }
}

impl RocksDbKvStore {
    pub fn open(cfg: &RocksDbConfig) -> Result<Self, StorageError> {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(cfg.create_if_missing);
        let db = rocksdb::DB::open(&opts, Path::new(&cfg.path))?;
        Ok(Self { db })
    }
}

impl KvStore for RocksDbKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.db.get(key)?)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.db.put(key, value)?;
        Ok(())
    }

    fn iter(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut out = Vec::new();
        for item in self.db.iterator(rocksdb::IteratorMode::Start) {
            let (k, v) = item?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_put_get_iter() {
        let store = InMemoryKvStore::new();
        store.put(b"a", b"1").unwrap();
        store.put(b"b", b"2").unwrap();

        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"missing").unwrap(), None);
        assert_eq!(store.iter().unwrap().len(), 2);
    }

    #[test]
    fn rocksdb_store_roundtrips() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let cfg = RocksDbConfig {
            path: tmp.path().to_string_lossy().to_string(),
            create_if_missing: true,
        };
        let store = RocksDbKvStore::open(&cfg).expect("open rocksdb");
        store.put(b"key", b"value").unwrap();
        assert_eq!(store.get(b"key").unwrap(), Some(b"value".to_vec()));
    }
}
