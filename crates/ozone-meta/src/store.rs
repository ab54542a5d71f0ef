//! The metadata store proper.

use redb::{Database, Durability, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;
use thiserror::Error;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

const METADATA: TableDefinition<&[u8], &[u8]> = TableDefinition::new("metadata");

/// Result type for metadata store operations
pub type MetaStoreResult<T> = std::result::Result<T, MetaStoreError>;

/// Errors surfaced by the metadata store. I/O failures are returned to the
/// caller, never swallowed.
#[derive(Debug, Error)]
pub enum MetaStoreError {
    #[error("failed to open metadata store: {0}")]
    OpenFailed(String),

    #[error("metadata store I/O failure: {0}")]
    Io(String),

    #[error("metadata store corrupted: {0}")]
    Corrupted(String),
}

impl From<redb::DatabaseError> for MetaStoreError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::OpenFailed(err.to_string())
    }
}

impl From<redb::StorageError> for MetaStoreError {
    fn from(err: redb::StorageError) -> Self {
        match err {
            redb::StorageError::Corrupted(msg) => Self::Corrupted(msg),
            other => Self::Io(other.to_string()),
        }
    }
}

impl From<redb::TransactionError> for MetaStoreError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<redb::TableError> for MetaStoreError {
    fn from(err: redb::TableError) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<redb::CommitError> for MetaStoreError {
    fn from(err: redb::CommitError) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<MetaStoreError> for ozone_common::Error {
    fn from(err: MetaStoreError) -> Self {
        ozone_common::Error::Storage(err.to_string())
    }
}

/// A single operation inside an atomic batch.
#[derive(Clone, Debug)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Ordered, persistent key/value store.
///
/// Total key order is lexicographic on bytes. A successful `put` followed by
/// a `get` on the same key returns the written value; puts are fsynced before
/// they return.
pub struct MetaStore {
    db: Database,
    lock: RwLock<()>,
}

impl MetaStore {
    /// Open a store file, creating it if missing.
    pub fn open(path: impl AsRef<Path>) -> MetaStoreResult<Self> {
        let db = Database::create(path.as_ref())?;
        debug!("opened metadata store at {:?}", path.as_ref());
        Ok(Self {
            db,
            lock: RwLock::new(()),
        })
    }

    /// Shared read lock over the store. The owning manager serializes its
    /// operations through these guards; the store itself is internally
    /// consistent without them.
    pub async fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    /// Exclusive write lock over the store.
    pub async fn write_lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().await
    }

    /// Durably write a single entry; returns after the data is synced.
    pub fn put(&self, key: &[u8], value: &[u8]) -> MetaStoreResult<()> {
        let mut txn = self.db.begin_write()?;
        txn.set_durability(Durability::Immediate);
        {
            let mut table = txn.open_table(METADATA)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Fetch a value by key.
    pub fn get(&self, key: &[u8]) -> MetaStoreResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(METADATA) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
    }

    /// Delete an entry. Deleting a missing key is not an error.
    pub fn delete(&self, key: &[u8]) -> MetaStoreResult<()> {
        let mut txn = self.db.begin_write()?;
        txn.set_durability(Durability::Immediate);
        {
            let mut table = txn.open_table(METADATA)?;
            table.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> MetaStoreResult<bool> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(METADATA) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(true),
            Err(err) => return Err(err.into()),
        };
        Ok(table.len()? == 0)
    }

    /// Apply a group of mutations in one atomic, durable transaction.
    pub fn write_batch(&self, ops: Vec<BatchOp>) -> MetaStoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let count = ops.len();
        let mut txn = self.db.begin_write()?;
        txn.set_durability(Durability::Immediate);
        {
            let mut table = txn.open_table(METADATA)?;
            for op in ops {
                match op {
                    BatchOp::Put { key, value } => {
                        table.insert(key.as_slice(), value.as_slice())?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_slice())?;
                    }
                }
            }
        }
        txn.commit()?;
        debug!("applied batch of {count} ops");
        Ok(())
    }

    /// Ordered iterator over all entries whose key starts with `prefix`.
    ///
    /// The iterator sees a snapshot of the store as of the seek; it is
    /// restarted by constructing a new iterator.
    pub fn iter(&self, prefix: &[u8]) -> MetaStoreResult<MetaIterator> {
        Ok(MetaIterator {
            entries: self.scan_prefix(prefix)?.into_iter(),
        })
    }

    /// Collect all entries whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> MetaStoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(METADATA) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut entries = Vec::new();
        for item in table.range::<&[u8]>(prefix..)? {
            let (key, value) = item?;
            if !key.value().starts_with(prefix) {
                break;
            }
            entries.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(entries)
    }
}

/// Snapshot iterator over a key range of the store.
pub struct MetaIterator {
    entries: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl Iterator for MetaIterator {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> MetaStore {
        MetaStore::open(dir.path().join("meta.db")).unwrap()
    }

    #[test]
    fn test_put_get_delete() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        store.put(b"/v1", b"volume one").unwrap();
        assert_eq!(store.get(b"/v1").unwrap(), Some(b"volume one".to_vec()));

        store.delete(b"/v1").unwrap();
        assert_eq!(store.get(b"/v1").unwrap(), None);
    }

    #[test]
    fn test_is_empty() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        assert!(store.is_empty().unwrap());

        store.put(b"k", b"v").unwrap();
        assert!(!store.is_empty().unwrap());

        store.delete(b"k").unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_batch_is_atomic_unit() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        store
            .write_batch(vec![
                BatchOp::Put {
                    key: b"/v1".to_vec(),
                    value: b"vol".to_vec(),
                },
                BatchOp::Put {
                    key: b"$alice".to_vec(),
                    value: b"v1".to_vec(),
                },
            ])
            .unwrap();
        assert!(store.get(b"/v1").unwrap().is_some());
        assert!(store.get(b"$alice").unwrap().is_some());

        store
            .write_batch(vec![
                BatchOp::Delete {
                    key: b"/v1".to_vec(),
                },
                BatchOp::Delete {
                    key: b"$alice".to_vec(),
                },
            ])
            .unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_prefix_scan_is_ordered() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        store.put(b"/v1/b1/k2", b"2").unwrap();
        store.put(b"/v1/b1/k1", b"1").unwrap();
        store.put(b"/v1/b2/k1", b"other bucket").unwrap();
        store.put(b"/v2/b1/k1", b"other volume").unwrap();

        let entries = store.scan_prefix(b"/v1/b1/").unwrap();
        let keys: Vec<&[u8]> = entries.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"/v1/b1/k1".as_slice(), b"/v1/b1/k2".as_slice()]);
    }

    #[test]
    fn test_iterator_sees_seek_time_snapshot() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        store.put(b"/a", b"1").unwrap();
        store.put(b"/b", b"2").unwrap();

        let iter = store.iter(b"/").unwrap();
        // Writes after the seek are not observed by this iterator.
        store.put(b"/c", b"3").unwrap();

        let keys: Vec<Vec<u8>> = iter.map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"/a".to_vec(), b"/b".to_vec()]);
    }

    #[test]
    fn test_reopen_preserves_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.db");
        {
            let store = MetaStore::open(&path).unwrap();
            store.put(b"persisted", b"yes").unwrap();
        }
        let store = MetaStore::open(&path).unwrap();
        assert_eq!(store.get(b"persisted").unwrap(), Some(b"yes".to_vec()));
    }

    #[test]
    fn test_byte_order_is_lexicographic() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        store.put(b"/v/b", b"bucket").unwrap();
        store.put(b"/v/b/k", b"key").unwrap();
        store.put(b"$user", b"index").unwrap();

        let all = store.scan_prefix(b"").unwrap();
        let keys: Vec<&[u8]> = all.iter().map(|(k, _)| k.as_slice()).collect();
        // '$' sorts before '/'
        assert_eq!(
            keys,
            vec![b"$user".as_slice(), b"/v/b".as_slice(), b"/v/b/k".as_slice()]
        );
    }
}
