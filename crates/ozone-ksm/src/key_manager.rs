//! Key metadata operations.
//!
//! `allocate_key` is the only KSM operation that crosses into SCM: the write
//! lock is held across the block allocation so a concurrent create of the
//! same key cannot interleave, matching the ordering guarantees of the
//! metadata store.

use crate::errors::{KsmError, KsmResult, ResultCode};
use crate::metadata_manager::MetadataManager;
use crate::scm_client::ScmBlockClient;
use ozone_proto::ksm::KeyInfo;
use prost::Message;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Arguments identifying a key, validated once at the service boundary.
#[derive(Clone, Debug)]
pub struct KeyArgs {
    pub volume: String,
    pub bucket: String,
    pub key: String,
    pub data_size: u64,
}

pub struct KeyManager {
    metadata: Arc<MetadataManager>,
    scm: Arc<dyn ScmBlockClient>,
}

fn decode_key(bytes: &[u8]) -> KsmResult<KeyInfo> {
    KeyInfo::decode(bytes).map_err(|e| {
        error!(%e, "corrupt key record");
        KsmError::new(ResultCode::InternalError, format!("corrupt key record: {e}"))
    })
}

impl KeyManager {
    pub fn new(metadata: Arc<MetadataManager>, scm: Arc<dyn ScmBlockClient>) -> Self {
        Self { metadata, scm }
    }

    /// Allocate a key: reserve a block with SCM and persist the key record
    /// pointing at it.
    pub async fn allocate_key(&self, args: KeyArgs) -> KsmResult<KeyInfo> {
        let _guard = self.metadata.write_lock().await;

        let volume_key = MetadataManager::volume_key(&args.volume);
        if self.metadata.get(&volume_key)?.is_none() {
            debug!(volume = %args.volume, "volume not found");
            return Err(KsmError::new(
                ResultCode::VolumeNotFound,
                format!("volume not found: {}", args.volume),
            ));
        }
        let bucket_key = MetadataManager::bucket_key(&args.volume, &args.bucket);
        if self.metadata.get(&bucket_key)?.is_none() {
            debug!(volume = %args.volume, bucket = %args.bucket, "bucket not found");
            return Err(KsmError::new(
                ResultCode::BucketNotFound,
                format!("bucket not found: {}/{}", args.volume, args.bucket),
            ));
        }
        let object_key = MetadataManager::object_key(&args.volume, &args.bucket, &args.key);
        if self.metadata.get(&object_key)?.is_some() {
            debug!(
                volume = %args.volume,
                bucket = %args.bucket,
                key = %args.key,
                "key already exists"
            );
            return Err(KsmError::new(
                ResultCode::KeyAlreadyExists,
                format!(
                    "key already exists: {}/{}/{}",
                    args.volume, args.bucket, args.key
                ),
            ));
        }

        let block = self.scm.allocate_block(args.data_size).await.map_err(|e| {
            error!(%e, key = %args.key, "scm block allocation failed");
            KsmError::new(ResultCode::InternalError, e.to_string())
        })?;

        let key_info = KeyInfo {
            volume_name: args.volume.clone(),
            bucket_name: args.bucket.clone(),
            key_name: args.key.clone(),
            data_size: args.data_size,
            block_id: block.key.clone(),
            container_name: block.pipeline.container_name.clone(),
            should_create_container: block.create_container,
            created_on: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        };

        if let Err(store_err) = self.metadata.put(&object_key, &key_info.encode_to_vec()) {
            error!(
                %store_err,
                volume = %args.volume,
                bucket = %args.bucket,
                key = %args.key,
                "failed to persist key record"
            );
            // A container created just for this key would otherwise leak.
            if block.create_container {
                if let Err(e) = self
                    .scm
                    .delete_container(&block.pipeline.container_name)
                    .await
                {
                    warn!(%e, container = %block.pipeline.container_name,
                        "compensating container deletion failed");
                }
            }
            return Err(store_err.into());
        }

        info!(
            volume = %args.volume,
            bucket = %args.bucket,
            key = %args.key,
            block = %key_info.block_id,
            "allocated key"
        );
        Ok(key_info)
    }

    pub async fn lookup_key(&self, args: KeyArgs) -> KsmResult<KeyInfo> {
        let _guard = self.metadata.read_lock().await;

        let object_key = MetadataManager::object_key(&args.volume, &args.bucket, &args.key);
        match self.metadata.get(&object_key)? {
            Some(bytes) => decode_key(&bytes),
            None => Err(KsmError::new(
                ResultCode::KeyNotFound,
                format!(
                    "key not found: {}/{}/{}",
                    args.volume, args.bucket, args.key
                ),
            )),
        }
    }

    /// Remove the key record and hand its block to SCM's deletion log.
    pub async fn delete_key(&self, args: KeyArgs) -> KsmResult<()> {
        let block_id = {
            let _guard = self.metadata.write_lock().await;

            let object_key = MetadataManager::object_key(&args.volume, &args.bucket, &args.key);
            let Some(bytes) = self.metadata.get(&object_key)? else {
                return Err(KsmError::new(
                    ResultCode::KeyNotFound,
                    format!(
                        "key not found: {}/{}/{}",
                        args.volume, args.bucket, args.key
                    ),
                ));
            };
            let key_info = decode_key(&bytes)?;
            self.metadata.delete(&object_key)?;
            key_info.block_id
        };

        // Block reclamation is asynchronous on the SCM side; a failure here
        // leaves an orphan block for operator cleanup, not a broken key.
        if let Err(e) = self.scm.delete_blocks(vec![block_id]).await {
            warn!(%e, key = %args.key, "failed to forward block deletion to scm");
        }
        info!(
            volume = %args.volume,
            bucket = %args.bucket,
            key = %args.key,
            "deleted key"
        );
        Ok(())
    }

    /// List keys of a bucket in strict lexicographic order.
    pub async fn list_keys(
        &self,
        volume: &str,
        bucket: &str,
        prefix: &str,
        prev_key: &str,
        max_keys: usize,
    ) -> KsmResult<Vec<KeyInfo>> {
        let _guard = self.metadata.read_lock().await;

        if self
            .metadata
            .get(&MetadataManager::bucket_key(volume, bucket))?
            .is_none()
        {
            return Err(KsmError::new(
                ResultCode::BucketNotFound,
                format!("bucket not found: {volume}/{bucket}"),
            ));
        }
        let scan_prefix = format!("/{volume}/{bucket}/");
        let mut keys = Vec::new();
        for (_, value) in self.metadata.scan_prefix(scan_prefix.as_bytes())? {
            let info = decode_key(&value)?;
            if !info.key_name.starts_with(prefix) {
                continue;
            }
            if !prev_key.is_empty() && info.key_name.as_str() <= prev_key {
                continue;
            }
            keys.push(info);
            if keys.len() >= max_keys {
                break;
            }
        }
        Ok(keys)
    }
}
