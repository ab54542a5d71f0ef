//! gRPC service implementation for the KeySpaceManagerProtocol.
//!
//! Handlers translate manager errors into the wire `Status`; only malformed
//! requests fail the RPC transport.

use crate::bucket_manager::BucketManager;
use crate::errors::KsmError;
use crate::key_manager::{KeyArgs, KeyManager};
use crate::metrics::KsmMetrics;
use crate::volume_manager::{VolumeArgs, VolumeManager};
use ozone_proto::ksm::{
    key_space_manager_service_server::KeySpaceManagerService as KsmProtocol,
    set_volume_property_request::Property, CreateBucketRequest, CreateBucketResponse,
    CreateVolumeRequest, CreateVolumeResponse, DeleteBucketRequest, DeleteBucketResponse,
    DeleteKeyRequest, DeleteKeyResponse, DeleteVolumeRequest, DeleteVolumeResponse,
    InfoBucketRequest, InfoBucketResponse, InfoVolumeRequest, InfoVolumeResponse,
    ListBucketsRequest, ListBucketsResponse, ListKeysRequest, ListKeysResponse,
    ListVolumesRequest, ListVolumesResponse, LocateKeyRequest, LocateKeyResponse,
    SetBucketPropertyRequest, SetBucketPropertyResponse, SetVolumePropertyRequest,
    SetVolumePropertyResponse, Status as KsmStatus,
};
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, error};

pub struct KeySpaceManagerService {
    volume_manager: Arc<VolumeManager>,
    bucket_manager: Arc<BucketManager>,
    key_manager: Arc<KeyManager>,
    metrics: Arc<KsmMetrics>,
}

impl KeySpaceManagerService {
    pub fn new(
        volume_manager: Arc<VolumeManager>,
        bucket_manager: Arc<BucketManager>,
        key_manager: Arc<KeyManager>,
        metrics: Arc<KsmMetrics>,
    ) -> Self {
        Self {
            volume_manager,
            bucket_manager,
            key_manager,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<KsmMetrics> {
        &self.metrics
    }

    fn wire_status(op: &str, err: &KsmError) -> KsmStatus {
        if err.is_internal() {
            error!(op, %err, "ksm operation failed");
        } else {
            debug!(op, %err, "ksm precondition failure");
        }
        err.to_status()
    }

    fn key_args(request: LocateKeyRequest) -> Result<KeyArgs, Status> {
        let args = request
            .key_args
            .ok_or_else(|| Status::invalid_argument("missing key args"))?;
        Ok(KeyArgs {
            volume: args.volume_name,
            bucket: args.bucket_name,
            key: args.key_name,
            data_size: args.data_size,
        })
    }
}

#[tonic::async_trait]
impl KsmProtocol for KeySpaceManagerService {
    async fn create_volume(
        &self,
        request: Request<CreateVolumeRequest>,
    ) -> Result<Response<CreateVolumeResponse>, Status> {
        let req = request.into_inner();
        let info = req
            .volume_info
            .ok_or_else(|| Status::invalid_argument("missing volume info"))?;
        self.metrics.inc_num_volume_creates();

        let args = VolumeArgs {
            volume: info.volume,
            owner: info.owner_name,
            admin: info.admin_name,
            quota_in_bytes: info.quota_in_bytes,
            acls: info.volume_acls,
        };
        let status = match self.volume_manager.create_volume(args).await {
            Ok(()) => KsmStatus::Ok,
            Err(err) => {
                self.metrics.inc_num_volume_create_fails();
                Self::wire_status("createVolume", &err)
            }
        };
        Ok(Response::new(CreateVolumeResponse {
            status: status as i32,
        }))
    }

    async fn set_volume_property(
        &self,
        request: Request<SetVolumePropertyRequest>,
    ) -> Result<Response<SetVolumePropertyResponse>, Status> {
        let req = request.into_inner();
        let property = req
            .property
            .ok_or_else(|| Status::invalid_argument("missing volume property"))?;
        self.metrics.inc_num_volume_modifies();

        let result = match property {
            Property::OwnerName(owner) => {
                self.volume_manager.set_owner(&req.volume_name, &owner).await
            }
            Property::QuotaInBytes(quota) => {
                self.volume_manager.set_quota(&req.volume_name, quota).await
            }
        };
        let status = match result {
            Ok(()) => KsmStatus::Ok,
            Err(err) => {
                self.metrics.inc_num_volume_modify_fails();
                Self::wire_status("setVolumeProperty", &err)
            }
        };
        Ok(Response::new(SetVolumePropertyResponse {
            status: status as i32,
        }))
    }

    async fn info_volume(
        &self,
        request: Request<InfoVolumeRequest>,
    ) -> Result<Response<InfoVolumeResponse>, Status> {
        let req = request.into_inner();
        self.metrics.inc_num_volume_infos();

        let resp = match self.volume_manager.get_volume_info(&req.volume_name).await {
            Ok(info) => InfoVolumeResponse {
                status: KsmStatus::Ok as i32,
                volume_info: Some(info),
            },
            Err(err) => {
                self.metrics.inc_num_volume_info_fails();
                InfoVolumeResponse {
                    status: Self::wire_status("infoVolume", &err) as i32,
                    volume_info: None,
                }
            }
        };
        Ok(Response::new(resp))
    }

    async fn delete_volume(
        &self,
        request: Request<DeleteVolumeRequest>,
    ) -> Result<Response<DeleteVolumeResponse>, Status> {
        let req = request.into_inner();
        self.metrics.inc_num_volume_deletes();

        let status = match self.volume_manager.delete_volume(&req.volume_name).await {
            Ok(()) => KsmStatus::Ok,
            Err(err) => {
                self.metrics.inc_num_volume_delete_fails();
                Self::wire_status("deleteVolume", &err)
            }
        };
        Ok(Response::new(DeleteVolumeResponse {
            status: status as i32,
        }))
    }

    async fn list_volumes(
        &self,
        request: Request<ListVolumesRequest>,
    ) -> Result<Response<ListVolumesResponse>, Status> {
        let req = request.into_inner();
        self.metrics.inc_num_volume_lists();

        let user = if req.user_name.is_empty() {
            None
        } else {
            Some(req.user_name.as_str())
        };
        let max_keys = if req.max_keys == 0 {
            1024
        } else {
            req.max_keys as usize
        };
        let resp = match self
            .volume_manager
            .list_volumes(user, &req.prefix, &req.prev_key, max_keys)
            .await
        {
            Ok(volumes) => ListVolumesResponse {
                status: KsmStatus::Ok as i32,
                volumes,
            },
            Err(err) => {
                self.metrics.inc_num_volume_list_fails();
                ListVolumesResponse {
                    status: Self::wire_status("listVolumes", &err) as i32,
                    volumes: vec![],
                }
            }
        };
        Ok(Response::new(resp))
    }

    async fn create_bucket(
        &self,
        request: Request<CreateBucketRequest>,
    ) -> Result<Response<CreateBucketResponse>, Status> {
        let req = request.into_inner();
        let info = req
            .bucket_info
            .ok_or_else(|| Status::invalid_argument("missing bucket info"))?;
        self.metrics.inc_num_bucket_creates();

        let status = match self.bucket_manager.create_bucket(info).await {
            Ok(()) => KsmStatus::Ok,
            Err(err) => {
                self.metrics.inc_num_bucket_create_fails();
                Self::wire_status("createBucket", &err)
            }
        };
        Ok(Response::new(CreateBucketResponse {
            status: status as i32,
        }))
    }

    async fn set_bucket_property(
        &self,
        request: Request<SetBucketPropertyRequest>,
    ) -> Result<Response<SetBucketPropertyResponse>, Status> {
        let req = request.into_inner();
        let args = req
            .bucket_args
            .ok_or_else(|| Status::invalid_argument("missing bucket args"))?;
        self.metrics.inc_num_bucket_modifies();

        let status = match self.bucket_manager.set_bucket_property(args).await {
            Ok(()) => KsmStatus::Ok,
            Err(err) => {
                self.metrics.inc_num_bucket_modify_fails();
                Self::wire_status("setBucketProperty", &err)
            }
        };
        Ok(Response::new(SetBucketPropertyResponse {
            status: status as i32,
        }))
    }

    async fn info_bucket(
        &self,
        request: Request<InfoBucketRequest>,
    ) -> Result<Response<InfoBucketResponse>, Status> {
        let req = request.into_inner();
        self.metrics.inc_num_bucket_infos();

        let resp = match self
            .bucket_manager
            .get_bucket_info(&req.volume_name, &req.bucket_name)
            .await
        {
            Ok(info) => InfoBucketResponse {
                status: KsmStatus::Ok as i32,
                bucket_info: Some(info),
            },
            Err(err) => {
                self.metrics.inc_num_bucket_info_fails();
                InfoBucketResponse {
                    status: Self::wire_status("infoBucket", &err) as i32,
                    bucket_info: None,
                }
            }
        };
        Ok(Response::new(resp))
    }

    async fn delete_bucket(
        &self,
        request: Request<DeleteBucketRequest>,
    ) -> Result<Response<DeleteBucketResponse>, Status> {
        let req = request.into_inner();
        self.metrics.inc_num_bucket_deletes();

        let status = match self
            .bucket_manager
            .delete_bucket(&req.volume_name, &req.bucket_name)
            .await
        {
            Ok(()) => KsmStatus::Ok,
            Err(err) => {
                self.metrics.inc_num_bucket_delete_fails();
                Self::wire_status("deleteBucket", &err)
            }
        };
        Ok(Response::new(DeleteBucketResponse {
            status: status as i32,
        }))
    }

    async fn list_buckets(
        &self,
        request: Request<ListBucketsRequest>,
    ) -> Result<Response<ListBucketsResponse>, Status> {
        let req = request.into_inner();
        self.metrics.inc_num_bucket_lists();

        let max_keys = if req.max_keys == 0 {
            1024
        } else {
            req.max_keys as usize
        };
        let resp = match self
            .bucket_manager
            .list_buckets(&req.volume_name, &req.prefix, &req.prev_key, max_keys)
            .await
        {
            Ok(buckets) => ListBucketsResponse {
                status: KsmStatus::Ok as i32,
                buckets,
            },
            Err(err) => {
                self.metrics.inc_num_bucket_list_fails();
                ListBucketsResponse {
                    status: Self::wire_status("listBuckets", &err) as i32,
                    buckets: vec![],
                }
            }
        };
        Ok(Response::new(resp))
    }

    async fn create_key(
        &self,
        request: Request<LocateKeyRequest>,
    ) -> Result<Response<LocateKeyResponse>, Status> {
        let args = Self::key_args(request.into_inner())?;
        self.metrics.inc_num_key_allocates();

        let resp = match self.key_manager.allocate_key(args).await {
            Ok(info) => LocateKeyResponse {
                status: KsmStatus::Ok as i32,
                key_info: Some(info),
            },
            Err(err) => {
                self.metrics.inc_num_key_allocate_fails();
                LocateKeyResponse {
                    status: Self::wire_status("createKey", &err) as i32,
                    key_info: None,
                }
            }
        };
        Ok(Response::new(resp))
    }

    async fn lookup_key(
        &self,
        request: Request<LocateKeyRequest>,
    ) -> Result<Response<LocateKeyResponse>, Status> {
        let args = Self::key_args(request.into_inner())?;
        self.metrics.inc_num_key_lookups();

        let resp = match self.key_manager.lookup_key(args).await {
            Ok(info) => LocateKeyResponse {
                status: KsmStatus::Ok as i32,
                key_info: Some(info),
            },
            Err(err) => {
                self.metrics.inc_num_key_lookup_fails();
                LocateKeyResponse {
                    status: Self::wire_status("lookupKey", &err) as i32,
                    key_info: None,
                }
            }
        };
        Ok(Response::new(resp))
    }

    async fn delete_key(
        &self,
        request: Request<DeleteKeyRequest>,
    ) -> Result<Response<DeleteKeyResponse>, Status> {
        let req = request.into_inner();
        let args = req
            .key_args
            .ok_or_else(|| Status::invalid_argument("missing key args"))?;
        self.metrics.inc_num_key_deletes();

        let args = KeyArgs {
            volume: args.volume_name,
            bucket: args.bucket_name,
            key: args.key_name,
            data_size: args.data_size,
        };
        let status = match self.key_manager.delete_key(args).await {
            Ok(()) => KsmStatus::Ok,
            Err(err) => {
                self.metrics.inc_num_key_delete_fails();
                Self::wire_status("deleteKey", &err)
            }
        };
        Ok(Response::new(DeleteKeyResponse {
            status: status as i32,
        }))
    }

    async fn list_keys(
        &self,
        request: Request<ListKeysRequest>,
    ) -> Result<Response<ListKeysResponse>, Status> {
        let req = request.into_inner();
        self.metrics.inc_num_key_lists();

        let max_keys = if req.max_keys == 0 {
            1024
        } else {
            req.max_keys as usize
        };
        let resp = match self
            .key_manager
            .list_keys(
                &req.volume_name,
                &req.bucket_name,
                &req.prefix,
                &req.prev_key,
                max_keys,
            )
            .await
        {
            Ok(key_info) => ListKeysResponse {
                status: KsmStatus::Ok as i32,
                key_info,
            },
            Err(err) => {
                self.metrics.inc_num_key_list_fails();
                ListKeysResponse {
                    status: Self::wire_status("listKeys", &err) as i32,
                    key_info: vec![],
                }
            }
        };
        Ok(Response::new(resp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_manager::MetadataManager;
    use crate::scm_client::testing::FakeScmBlockClient;
    use crate::scm_client::ScmBlockClient;
    use ozone_proto::ksm::{BucketInfo, KeyArgs as KeyArgsProto, StorageTypeProto, VolumeInfo};
    use tempfile::tempdir;

    fn service(dir: &tempfile::TempDir) -> KeySpaceManagerService {
        let metadata = Arc::new(MetadataManager::open(dir.path().join("ksm.db")).unwrap());
        let scm = Arc::new(FakeScmBlockClient::new()) as Arc<dyn ScmBlockClient>;
        KeySpaceManagerService::new(
            Arc::new(VolumeManager::new(Arc::clone(&metadata), 1024)),
            Arc::new(BucketManager::new(Arc::clone(&metadata))),
            Arc::new(KeyManager::new(metadata, scm)),
            Arc::new(KsmMetrics::new()),
        )
    }

    fn volume_request(name: &str, owner: &str, quota: u64) -> CreateVolumeRequest {
        CreateVolumeRequest {
            volume_info: Some(VolumeInfo {
                admin_name: "admin".to_string(),
                owner_name: owner.to_string(),
                volume: name.to_string(),
                quota_in_bytes: quota,
                volume_acls: vec![],
                created_on: 0,
            }),
        }
    }

    fn bucket_request(volume: &str, bucket: &str) -> CreateBucketRequest {
        CreateBucketRequest {
            bucket_info: Some(BucketInfo {
                volume_name: volume.to_string(),
                bucket_name: bucket.to_string(),
                acls: vec![],
                is_version_enabled: false,
                storage_type: StorageTypeProto::Disk as i32,
                created_on: 0,
            }),
        }
    }

    fn locate_request(volume: &str, bucket: &str, key: &str, size: u64) -> LocateKeyRequest {
        LocateKeyRequest {
            key_args: Some(KeyArgsProto {
                volume_name: volume.to_string(),
                bucket_name: bucket.to_string(),
                key_name: key.to_string(),
                data_size: size,
            }),
        }
    }

    #[tokio::test]
    async fn test_create_volume_and_bucket_scenario() {
        let dir = tempdir().unwrap();
        let svc = service(&dir);

        let resp = svc
            .create_volume(Request::new(volume_request("v1", "alice", 1 << 30)))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.status, KsmStatus::Ok as i32);

        let resp = svc
            .create_bucket(Request::new(bucket_request("v1", "b1")))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.status, KsmStatus::Ok as i32);

        let info = svc
            .info_volume(Request::new(InfoVolumeRequest {
                volume_name: "v1".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(info.status, KsmStatus::Ok as i32);
        let volume = info.volume_info.unwrap();
        assert_eq!(volume.owner_name, "alice");
        assert_eq!(volume.quota_in_bytes, 1073741824);

        let info = svc
            .info_bucket(Request::new(InfoBucketRequest {
                volume_name: "v1".to_string(),
                bucket_name: "b1".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(info.status, KsmStatus::Ok as i32);
        assert!(!info.bucket_info.unwrap().is_version_enabled);
    }

    #[tokio::test]
    async fn test_duplicate_volume_status() {
        let dir = tempdir().unwrap();
        let svc = service(&dir);

        svc.create_volume(Request::new(volume_request("v1", "alice", 1)))
            .await
            .unwrap();
        let resp = svc
            .create_volume(Request::new(volume_request("v1", "bob", 2)))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.status, KsmStatus::VolumeAlreadyExists as i32);

        assert_eq!(svc.metrics().num_volume_creates(), 2);
        assert_eq!(svc.metrics().num_volume_create_fails(), 1);
    }

    #[tokio::test]
    async fn test_delete_non_empty_volume_scenario() {
        let dir = tempdir().unwrap();
        let svc = service(&dir);

        svc.create_volume(Request::new(volume_request("v1", "alice", 1)))
            .await
            .unwrap();
        svc.create_bucket(Request::new(bucket_request("v1", "b1")))
            .await
            .unwrap();

        let resp = svc
            .delete_volume(Request::new(DeleteVolumeRequest {
                volume_name: "v1".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.status, KsmStatus::VolumeNotEmpty as i32);

        let resp = svc
            .delete_bucket(Request::new(DeleteBucketRequest {
                volume_name: "v1".to_string(),
                bucket_name: "b1".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.status, KsmStatus::Ok as i32);

        let resp = svc
            .delete_volume(Request::new(DeleteVolumeRequest {
                volume_name: "v1".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.status, KsmStatus::Ok as i32);
    }

    #[tokio::test]
    async fn test_key_allocate_and_lookup() {
        let dir = tempdir().unwrap();
        let svc = service(&dir);

        svc.create_volume(Request::new(volume_request("v1", "alice", 1 << 30)))
            .await
            .unwrap();
        svc.create_bucket(Request::new(bucket_request("v1", "b1")))
            .await
            .unwrap();

        let created = svc
            .create_key(Request::new(locate_request("v1", "b1", "k1", 4096)))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(created.status, KsmStatus::Ok as i32);
        let created = created.key_info.unwrap();

        let found = svc
            .lookup_key(Request::new(locate_request("v1", "b1", "k1", 0)))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(found.status, KsmStatus::Ok as i32);
        assert_eq!(found.key_info.unwrap().block_id, created.block_id);

        let missing = svc
            .lookup_key(Request::new(locate_request("v1", "b1", "nope", 0)))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(missing.status, KsmStatus::KeyNotFound as i32);
    }
}
