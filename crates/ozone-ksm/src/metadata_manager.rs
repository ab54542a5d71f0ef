//! KSM metadata access: key encoding and the store-level lock.
//!
//! Key encoding (lexicographic ordering is load-bearing):
//!
//! ```text
//! /volume                      -> VolumeInfo
//! /volume/bucket               -> BucketInfo
//! /volume/bucket/key           -> KeyInfo
//! $user                        -> VolumeList (names of owned volumes)
//! ```
//!
//! A prefix scan of `/volume/bucket/` yields the keys of a bucket in
//! lexicographic order, which is the listing primitive.

use ozone_meta::{BatchOp, MetaStore, MetaStoreResult};
use std::path::Path;
use tokio::sync::{RwLockReadGuard, RwLockWriteGuard};

pub struct MetadataManager {
    store: MetaStore,
}

impl MetadataManager {
    pub fn open(path: impl AsRef<Path>) -> MetaStoreResult<Self> {
        Ok(Self {
            store: MetaStore::open(path)?,
        })
    }

    /// Shared lock held by read operations.
    pub async fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.store.read_lock().await
    }

    /// Exclusive lock held by every mutating operation, serializing all
    /// namespace mutations.
    pub async fn write_lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.store.write_lock().await
    }

    pub fn volume_key(volume: &str) -> Vec<u8> {
        format!("/{volume}").into_bytes()
    }

    pub fn bucket_key(volume: &str, bucket: &str) -> Vec<u8> {
        format!("/{volume}/{bucket}").into_bytes()
    }

    pub fn object_key(volume: &str, bucket: &str, key: &str) -> Vec<u8> {
        format!("/{volume}/{bucket}/{key}").into_bytes()
    }

    pub fn user_key(user: &str) -> Vec<u8> {
        format!("${user}").into_bytes()
    }

    pub fn get(&self, key: &[u8]) -> MetaStoreResult<Option<Vec<u8>>> {
        self.store.get(key)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> MetaStoreResult<()> {
        self.store.put(key, value)
    }

    pub fn delete(&self, key: &[u8]) -> MetaStoreResult<()> {
        self.store.delete(key)
    }

    pub fn write_batch(&self, ops: Vec<BatchOp>) -> MetaStoreResult<()> {
        self.store.write_batch(ops)
    }

    pub fn scan_prefix(&self, prefix: &[u8]) -> MetaStoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.store.scan_prefix(prefix)
    }

    /// True when the volume holds no buckets (and hence no keys).
    pub fn volume_is_empty(&self, volume: &str) -> MetaStoreResult<bool> {
        let prefix = format!("/{volume}/").into_bytes();
        Ok(self.store.scan_prefix(&prefix)?.is_empty())
    }

    /// True when the bucket holds no keys.
    pub fn bucket_is_empty(&self, volume: &str, bucket: &str) -> MetaStoreResult<bool> {
        let prefix = format!("/{volume}/{bucket}/").into_bytes();
        Ok(self.store.scan_prefix(&prefix)?.is_empty())
    }

    /// Entries directly under a volume that are buckets (not keys).
    pub fn bucket_entries(&self, volume: &str) -> MetaStoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let prefix = format!("/{volume}/");
        let entries = self.store.scan_prefix(prefix.as_bytes())?;
        Ok(entries
            .into_iter()
            .filter(|(key, _)| {
                key[prefix.len()..].iter().all(|b| *b != b'/')
            })
            .collect())
    }

    /// Top-level entries that are volumes.
    pub fn volume_entries(&self) -> MetaStoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let entries = self.store.scan_prefix(b"/")?;
        Ok(entries
            .into_iter()
            .filter(|(key, _)| key[1..].iter().all(|b| *b != b'/'))
            .collect())
    }
}
