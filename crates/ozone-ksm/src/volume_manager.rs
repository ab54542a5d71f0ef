//! Volume metadata operations.
//!
//! The user index (`$user -> VolumeList`) and the volume record are always
//! mutated in one atomic batch, so a crash cannot leave the index
//! desynchronized from the volume it points at.

use crate::errors::{KsmError, KsmResult, ResultCode};
use crate::metadata_manager::MetadataManager;
use ozone_proto::ksm::{OzoneAclInfo, VolumeInfo, VolumeList};
use ozone_meta::BatchOp;
use prost::Message;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

/// Arguments for creating a volume, validated once at the service boundary.
#[derive(Clone, Debug)]
pub struct VolumeArgs {
    pub volume: String,
    pub owner: String,
    pub admin: String,
    pub quota_in_bytes: u64,
    pub acls: Vec<OzoneAclInfo>,
}

pub struct VolumeManager {
    metadata: Arc<MetadataManager>,
    max_user_volumes: usize,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub(crate) fn decode_volume(bytes: &[u8]) -> KsmResult<VolumeInfo> {
    VolumeInfo::decode(bytes).map_err(|e| {
        error!(%e, "corrupt volume record");
        KsmError::new(ResultCode::InternalError, format!("corrupt volume record: {e}"))
    })
}

fn decode_volume_list(bytes: &[u8]) -> KsmResult<VolumeList> {
    VolumeList::decode(bytes).map_err(|e| {
        error!(%e, "corrupt user index record");
        KsmError::new(ResultCode::InternalError, format!("corrupt user index: {e}"))
    })
}

impl VolumeManager {
    pub fn new(metadata: Arc<MetadataManager>, max_user_volumes: usize) -> Self {
        Self {
            metadata,
            max_user_volumes,
        }
    }

    fn user_volumes(&self, user: &str) -> KsmResult<VolumeList> {
        match self.metadata.get(&MetadataManager::user_key(user))? {
            Some(bytes) => decode_volume_list(&bytes),
            None => Ok(VolumeList::default()),
        }
    }

    /// Create a volume and index it under its owner, atomically.
    pub async fn create_volume(&self, args: VolumeArgs) -> KsmResult<()> {
        let _guard = self.metadata.write_lock().await;

        let volume_key = MetadataManager::volume_key(&args.volume);
        if self.metadata.get(&volume_key)?.is_some() {
            debug!(volume = %args.volume, "volume already exists");
            return Err(KsmError::new(
                ResultCode::VolumeAlreadyExists,
                format!("volume already exists: {}", args.volume),
            ));
        }

        let mut owned = self.user_volumes(&args.owner)?;
        if owned.volume_names.len() >= self.max_user_volumes {
            debug!(owner = %args.owner, "user volume limit reached");
            return Err(KsmError::new(
                ResultCode::TooManyUserVolumes,
                format!(
                    "user {} already owns {} volumes",
                    args.owner,
                    owned.volume_names.len()
                ),
            ));
        }
        match owned.volume_names.binary_search(&args.volume) {
            Ok(_) => {}
            Err(pos) => owned.volume_names.insert(pos, args.volume.clone()),
        }

        let info = VolumeInfo {
            admin_name: args.admin,
            owner_name: args.owner.clone(),
            volume: args.volume.clone(),
            quota_in_bytes: args.quota_in_bytes,
            volume_acls: args.acls,
            created_on: now_millis(),
        };
        self.metadata.write_batch(vec![
            BatchOp::Put {
                key: volume_key,
                value: info.encode_to_vec(),
            },
            BatchOp::Put {
                key: MetadataManager::user_key(&args.owner),
                value: owned.encode_to_vec(),
            },
        ])?;
        info!(volume = %args.volume, owner = %args.owner, "created volume");
        Ok(())
    }

    /// Rewrite the volume's owner and move it between the two user indices
    /// in one atomic batch.
    pub async fn set_owner(&self, volume: &str, new_owner: &str) -> KsmResult<()> {
        let _guard = self.metadata.write_lock().await;

        let volume_key = MetadataManager::volume_key(volume);
        let Some(bytes) = self.metadata.get(&volume_key)? else {
            return Err(KsmError::new(
                ResultCode::VolumeNotFound,
                format!("volume not found: {volume}"),
            ));
        };
        let mut info = decode_volume(&bytes)?;
        let old_owner = info.owner_name.clone();
        if old_owner == new_owner {
            return Ok(());
        }

        let mut ops = Vec::with_capacity(3);

        let mut previous = self.user_volumes(&old_owner)?;
        previous.volume_names.retain(|name| name != volume);
        let old_user_key = MetadataManager::user_key(&old_owner);
        if previous.volume_names.is_empty() {
            ops.push(BatchOp::Delete { key: old_user_key });
        } else {
            ops.push(BatchOp::Put {
                key: old_user_key,
                value: previous.encode_to_vec(),
            });
        }

        let mut next = self.user_volumes(new_owner)?;
        if let Err(pos) = next.volume_names.binary_search(&volume.to_string()) {
            next.volume_names.insert(pos, volume.to_string());
        }
        ops.push(BatchOp::Put {
            key: MetadataManager::user_key(new_owner),
            value: next.encode_to_vec(),
        });

        info.owner_name = new_owner.to_string();
        ops.push(BatchOp::Put {
            key: volume_key,
            value: info.encode_to_vec(),
        });

        self.metadata.write_batch(ops)?;
        info!(volume, from = %old_owner, to = %new_owner, "changed volume owner");
        Ok(())
    }

    /// Rewrite the volume's byte quota.
    pub async fn set_quota(&self, volume: &str, quota_in_bytes: u64) -> KsmResult<()> {
        let _guard = self.metadata.write_lock().await;

        let volume_key = MetadataManager::volume_key(volume);
        let Some(bytes) = self.metadata.get(&volume_key)? else {
            return Err(KsmError::new(
                ResultCode::VolumeNotFound,
                format!("volume not found: {volume}"),
            ));
        };
        let mut info = decode_volume(&bytes)?;
        info.quota_in_bytes = quota_in_bytes;
        self.metadata.put(&volume_key, &info.encode_to_vec())?;
        Ok(())
    }

    pub async fn get_volume_info(&self, volume: &str) -> KsmResult<VolumeInfo> {
        let _guard = self.metadata.read_lock().await;

        match self.metadata.get(&MetadataManager::volume_key(volume))? {
            Some(bytes) => decode_volume(&bytes),
            None => Err(KsmError::new(
                ResultCode::VolumeNotFound,
                format!("volume not found: {volume}"),
            )),
        }
    }

    /// Delete an empty volume and its user-index entry atomically.
    pub async fn delete_volume(&self, volume: &str) -> KsmResult<()> {
        let _guard = self.metadata.write_lock().await;

        let volume_key = MetadataManager::volume_key(volume);
        let Some(bytes) = self.metadata.get(&volume_key)? else {
            return Err(KsmError::new(
                ResultCode::VolumeNotFound,
                format!("volume not found: {volume}"),
            ));
        };
        if !self.metadata.volume_is_empty(volume)? {
            debug!(volume, "volume still holds buckets");
            return Err(KsmError::new(
                ResultCode::VolumeNotEmpty,
                format!("volume is not empty: {volume}"),
            ));
        }
        let info = decode_volume(&bytes)?;

        let mut ops = vec![BatchOp::Delete { key: volume_key }];
        let mut owned = self.user_volumes(&info.owner_name)?;
        owned.volume_names.retain(|name| name != volume);
        let user_key = MetadataManager::user_key(&info.owner_name);
        if owned.volume_names.is_empty() {
            ops.push(BatchOp::Delete { key: user_key });
        } else {
            ops.push(BatchOp::Put {
                key: user_key,
                value: owned.encode_to_vec(),
            });
        }
        self.metadata.write_batch(ops)?;
        info!(volume, "deleted volume");
        Ok(())
    }

    /// List volumes, optionally restricted to one owner. `prev_key` is the
    /// last volume name of the previous page.
    pub async fn list_volumes(
        &self,
        user: Option<&str>,
        prefix: &str,
        prev_key: &str,
        max_keys: usize,
    ) -> KsmResult<Vec<VolumeInfo>> {
        let _guard = self.metadata.read_lock().await;

        let infos: Vec<VolumeInfo> = match user {
            Some(user) => {
                let owned = self.user_volumes(user)?;
                let mut infos = Vec::with_capacity(owned.volume_names.len());
                for name in owned.volume_names {
                    if let Some(bytes) = self.metadata.get(&MetadataManager::volume_key(&name))? {
                        infos.push(decode_volume(&bytes)?);
                    }
                }
                infos
            }
            None => {
                let mut infos = Vec::new();
                for (_, value) in self.metadata.volume_entries()? {
                    infos.push(decode_volume(&value)?);
                }
                infos
            }
        };

        Ok(infos
            .into_iter()
            .filter(|info| info.volume.starts_with(prefix))
            .filter(|info| prev_key.is_empty() || info.volume.as_str() > prev_key)
            .take(max_keys)
            .collect())
    }
}
