//! Ordered key-value backend with atomic batched writes.
//!
//! Production deployments run on RocksDB; tests may use the in-memory
//! backend, which implements the same ordering and batch semantics over a
//! `BTreeMap`.

use crate::Result;
use parking_lot::RwLock;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::collections::BTreeMap;
use std::path::Path;

/// A buffered set of write operations, applied atomically by
/// [`Database::write`].
///
/// Dropping a batch without writing it discards the buffered operations.
#[derive(Debug, Default)]
pub struct StoreBatch {
    ops: Vec<BatchOp>,
}

#[derive(Debug)]
enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

impl StoreBatch {
    /// Buffers a put operation.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    /// Buffers a delete operation.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    /// Number of buffered operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch holds no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

enum Backend {
    Rocks(DB),
    Memory(RwLock<BTreeMap<Vec<u8>, Vec<u8>>>),
}

/// Ordered key-value database over RocksDB or an in-memory map.
pub struct Database {
    backend: Backend,
}

impl Database {
    /// Opens (or creates) a RocksDB database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path)?;
        tracing::debug!(path = %path.display(), "opened rocksdb backend");

        Ok(Self {
            backend: Backend::Rocks(db),
        })
    }

    /// Opens an empty in-memory database.
    pub fn open_in_memory() -> Self {
        Self {
            backend: Backend::Memory(RwLock::new(BTreeMap::new())),
        }
    }

    /// Fetches the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match &self.backend {
            Backend::Rocks(db) => Ok(db.get(key)?),
            Backend::Memory(map) => Ok(map.read().get(key).cloned()),
        }
    }

    /// Stores `value` under `key`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        match &self.backend {
            Backend::Rocks(db) => Ok(db.put(key, value)?),
            Backend::Memory(map) => {
                map.write().insert(key.to_vec(), value.to_vec());
                Ok(())
            }
        }
    }

    /// Removes the value stored under `key`, if any.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        match &self.backend {
            Backend::Rocks(db) => Ok(db.delete(key)?),
            Backend::Memory(map) => {
                map.write().remove(key);
                Ok(())
            }
        }
    }

    /// Applies all operations of `batch` atomically.
    pub fn write(&self, batch: StoreBatch) -> Result<()> {
        match &self.backend {
            Backend::Rocks(db) => {
                let mut wb = WriteBatch::default();
                for op in batch.ops {
                    match op {
                        BatchOp::Put(key, value) => wb.put(key, value),
                        BatchOp::Delete(key) => wb.delete(key),
                    }
                }
                Ok(db.write(wb)?)
            }
            Backend::Memory(map) => {
                // A single write-lock application makes the batch atomic with
                // respect to readers.
                let mut map = map.write();
                for op in batch.ops {
                    match op {
                        BatchOp::Put(key, value) => {
                            map.insert(key, value);
                        }
                        BatchOp::Delete(key) => {
                            map.remove(&key);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Returns all key-value pairs whose key starts with `prefix`, in
    /// lexicographic key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        match &self.backend {
            Backend::Rocks(db) => {
                let mut out = Vec::new();
                for item in db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
                    let (key, value) = item?;
                    if !key.starts_with(prefix) {
                        break;
                    }
                    out.push((key.into_vec(), value.into_vec()));
                }
                Ok(out)
            }
            Backend::Memory(map) => Ok(map
                .read()
                .range(prefix.to_vec()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()),
        }
    }

    /// Returns the greatest entry with `prefix` whose key is ≤ `upper`.
    ///
    /// `upper` must itself start with `prefix`.
    pub fn last_at_or_before(
        &self,
        prefix: &[u8],
        upper: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        debug_assert!(upper.starts_with(prefix));
        match &self.backend {
            Backend::Rocks(db) => {
                let mut iter = db.iterator(IteratorMode::From(upper, Direction::Reverse));
                match iter.next() {
                    Some(item) => {
                        let (key, value) = item?;
                        if key.starts_with(prefix) {
                            Ok(Some((key.into_vec(), value.into_vec())))
                        } else {
                            Ok(None)
                        }
                    }
                    None => Ok(None),
                }
            }
            Backend::Memory(map) => Ok(map
                .read()
                .range(prefix.to_vec()..=upper.to_vec())
                .next_back()
                .map(|(key, value)| (key.clone(), value.clone()))),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.backend {
            Backend::Rocks(_) => f.write_str("Database::Rocks"),
            Backend::Memory(_) => f.write_str("Database::Memory"),
        }
    }
}
