//! Bucket metadata operations.

use crate::errors::{KsmError, KsmResult, ResultCode};
use crate::metadata_manager::MetadataManager;
use ozone_proto::ksm::{BucketArgs, BucketInfo};
use prost::Message;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

pub struct BucketManager {
    metadata: Arc<MetadataManager>,
}

pub(crate) fn decode_bucket(bytes: &[u8]) -> KsmResult<BucketInfo> {
    BucketInfo::decode(bytes).map_err(|e| {
        error!(%e, "corrupt bucket record");
        KsmError::new(ResultCode::InternalError, format!("corrupt bucket record: {e}"))
    })
}

impl BucketManager {
    pub fn new(metadata: Arc<MetadataManager>) -> Self {
        Self { metadata }
    }

    /// Create a bucket under an existing volume.
    pub async fn create_bucket(&self, mut info: BucketInfo) -> KsmResult<()> {
        let _guard = self.metadata.write_lock().await;

        let volume_key = MetadataManager::volume_key(&info.volume_name);
        if self.metadata.get(&volume_key)?.is_none() {
            debug!(volume = %info.volume_name, "parent volume missing");
            return Err(KsmError::new(
                ResultCode::VolumeNotFound,
                format!("volume not found: {}", info.volume_name),
            ));
        }
        let bucket_key = MetadataManager::bucket_key(&info.volume_name, &info.bucket_name);
        if self.metadata.get(&bucket_key)?.is_some() {
            debug!(
                volume = %info.volume_name,
                bucket = %info.bucket_name,
                "bucket already exists"
            );
            return Err(KsmError::new(
                ResultCode::BucketAlreadyExists,
                format!(
                    "bucket already exists: {}/{}",
                    info.volume_name, info.bucket_name
                ),
            ));
        }

        info.created_on = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.metadata.put(&bucket_key, &info.encode_to_vec())?;
        info!(
            volume = %info.volume_name,
            bucket = %info.bucket_name,
            "created bucket"
        );
        Ok(())
    }

    /// Merge ACL additions/removals and property overrides into the bucket
    /// record.
    pub async fn set_bucket_property(&self, args: BucketArgs) -> KsmResult<()> {
        let _guard = self.metadata.write_lock().await;

        let bucket_key = MetadataManager::bucket_key(&args.volume_name, &args.bucket_name);
        let Some(bytes) = self.metadata.get(&bucket_key)? else {
            return Err(KsmError::new(
                ResultCode::BucketNotFound,
                format!("bucket not found: {}/{}", args.volume_name, args.bucket_name),
            ));
        };
        let mut info = decode_bucket(&bytes)?;

        info.acls.retain(|acl| !args.remove_acls.contains(acl));
        for acl in args.add_acls {
            if !info.acls.contains(&acl) {
                info.acls.push(acl);
            }
        }
        if let Some(versioning) = args.is_version_enabled {
            info.is_version_enabled = versioning;
        }
        if let Some(storage_type) = args.storage_type {
            info.storage_type = storage_type;
        }

        self.metadata.put(&bucket_key, &info.encode_to_vec())?;
        Ok(())
    }

    pub async fn get_bucket_info(&self, volume: &str, bucket: &str) -> KsmResult<BucketInfo> {
        let _guard = self.metadata.read_lock().await;

        match self
            .metadata
            .get(&MetadataManager::bucket_key(volume, bucket))?
        {
            Some(bytes) => decode_bucket(&bytes),
            None => Err(KsmError::new(
                ResultCode::BucketNotFound,
                format!("bucket not found: {volume}/{bucket}"),
            )),
        }
    }

    /// Delete a bucket that holds no keys.
    pub async fn delete_bucket(&self, volume: &str, bucket: &str) -> KsmResult<()> {
        let _guard = self.metadata.write_lock().await;

        let bucket_key = MetadataManager::bucket_key(volume, bucket);
        if self.metadata.get(&bucket_key)?.is_none() {
            return Err(KsmError::new(
                ResultCode::BucketNotFound,
                format!("bucket not found: {volume}/{bucket}"),
            ));
        }
        if !self.metadata.bucket_is_empty(volume, bucket)? {
            debug!(volume, bucket, "bucket still holds keys");
            return Err(KsmError::new(
                ResultCode::BucketNotEmpty,
                format!("bucket is not empty: {volume}/{bucket}"),
            ));
        }
        self.metadata.delete(&bucket_key)?;
        info!(volume, bucket, "deleted bucket");
        Ok(())
    }

    /// List buckets of a volume in lexicographic order.
    pub async fn list_buckets(
        &self,
        volume: &str,
        prefix: &str,
        prev_key: &str,
        max_keys: usize,
    ) -> KsmResult<Vec<BucketInfo>> {
        let _guard = self.metadata.read_lock().await;

        if self
            .metadata
            .get(&MetadataManager::volume_key(volume))?
            .is_none()
        {
            return Err(KsmError::new(
                ResultCode::VolumeNotFound,
                format!("volume not found: {volume}"),
            ));
        }
        let mut buckets = Vec::new();
        for (_, value) in self.metadata.bucket_entries(volume)? {
            let info = decode_bucket(&value)?;
            if !info.bucket_name.starts_with(prefix) {
                continue;
            }
            if !prev_key.is_empty() && info.bucket_name.as_str() <= prev_key {
                continue;
            }
            buckets.push(info);
            if buckets.len() >= max_keys {
                break;
            }
        }
        Ok(buckets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume_manager::{VolumeArgs, VolumeManager};
    use ozone_proto::ksm::{ozone_acl_info, OzoneAclInfo, StorageTypeProto};
    use tempfile::tempdir;

    async fn managers(dir: &tempfile::TempDir) -> (VolumeManager, BucketManager) {
        let metadata = Arc::new(MetadataManager::open(dir.path().join("ksm.db")).unwrap());
        let volumes = VolumeManager::new(Arc::clone(&metadata), 1024);
        volumes
            .create_volume(VolumeArgs {
                volume: "v1".to_string(),
                owner: "alice".to_string(),
                admin: "admin".to_string(),
                quota_in_bytes: 1 << 30,
                acls: vec![],
            })
            .await
            .unwrap();
        (volumes, BucketManager::new(metadata))
    }

    fn bucket(volume: &str, name: &str) -> BucketInfo {
        BucketInfo {
            volume_name: volume.to_string(),
            bucket_name: name.to_string(),
            acls: vec![],
            is_version_enabled: false,
            storage_type: StorageTypeProto::Disk as i32,
            created_on: 0,
        }
    }

    fn acl(name: &str) -> OzoneAclInfo {
        OzoneAclInfo {
            r#type: ozone_acl_info::OzoneAclType::User as i32,
            name: name.to_string(),
            rights: ozone_acl_info::OzoneAclRights::ReadWrite as i32,
        }
    }

    #[tokio::test]
    async fn test_create_and_info() {
        let dir = tempdir().unwrap();
        let (_, buckets) = managers(&dir).await;

        buckets.create_bucket(bucket("v1", "b1")).await.unwrap();
        let info = buckets.get_bucket_info("v1", "b1").await.unwrap();
        assert!(!info.is_version_enabled);
        assert!(info.created_on > 0);
    }

    #[tokio::test]
    async fn test_bucket_requires_volume() {
        let dir = tempdir().unwrap();
        let (_, buckets) = managers(&dir).await;

        let err = buckets
            .create_bucket(bucket("missing", "b1"))
            .await
            .unwrap_err();
        assert_eq!(err.result, ResultCode::VolumeNotFound);
    }

    #[tokio::test]
    async fn test_duplicate_bucket_rejected() {
        let dir = tempdir().unwrap();
        let (_, buckets) = managers(&dir).await;

        buckets.create_bucket(bucket("v1", "b1")).await.unwrap();
        let err = buckets
            .create_bucket(bucket("v1", "b1"))
            .await
            .unwrap_err();
        assert_eq!(err.result, ResultCode::BucketAlreadyExists);
    }

    #[tokio::test]
    async fn test_set_bucket_property_merges_acls() {
        let dir = tempdir().unwrap();
        let (_, buckets) = managers(&dir).await;

        let mut info = bucket("v1", "b1");
        info.acls.push(acl("alice"));
        buckets.create_bucket(info).await.unwrap();

        buckets
            .set_bucket_property(BucketArgs {
                volume_name: "v1".to_string(),
                bucket_name: "b1".to_string(),
                add_acls: vec![acl("bob")],
                remove_acls: vec![acl("alice")],
                is_version_enabled: Some(true),
                storage_type: Some(StorageTypeProto::Ssd as i32),
            })
            .await
            .unwrap();

        let info = buckets.get_bucket_info("v1", "b1").await.unwrap();
        assert_eq!(info.acls, vec![acl("bob")]);
        assert!(info.is_version_enabled);
        assert_eq!(info.storage_type, StorageTypeProto::Ssd as i32);
    }

    #[tokio::test]
    async fn test_delete_bucket_then_volume() {
        let dir = tempdir().unwrap();
        let (volumes, buckets) = managers(&dir).await;

        buckets.create_bucket(bucket("v1", "b1")).await.unwrap();
        let err = volumes.delete_volume("v1").await.unwrap_err();
        assert_eq!(err.result, ResultCode::VolumeNotEmpty);

        buckets.delete_bucket("v1", "b1").await.unwrap();
        volumes.delete_volume("v1").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_buckets_ordered() {
        let dir = tempdir().unwrap();
        let (_, buckets) = managers(&dir).await;

        for name in ["bc", "ba", "bb"] {
            buckets.create_bucket(bucket("v1", name)).await.unwrap();
        }
        let listed = buckets.list_buckets("v1", "", "", 10).await.unwrap();
        let names: Vec<&str> = listed.iter().map(|b| b.bucket_name.as_str()).collect();
        assert_eq!(names, vec!["ba", "bb", "bc"]);

        let page = buckets.list_buckets("v1", "", "ba", 1).await.unwrap();
        assert_eq!(page[0].bucket_name, "bb");
    }
}
