//! gRPC service implementations for the two SCM protocols.
//!
//! Capacity failures travel as error codes inside the response envelope;
//! only malformed requests fail the RPC itself.

use crate::block_manager::{BlockManager, DeleteBlockResult};
use crate::container_manager::ContainerManager;
use crate::node_manager::NodeManager;
use ozone_common::{
    DatanodeDetails, Error, NodeState, NodeStat, ReplicationFactor, ReplicationType,
};
use ozone_proto::datanode::{
    storage_container_datanode_service_server::StorageContainerDatanodeService as DatanodeProtocol,
    scm_registered_response_proto, ScmHeartbeatRequestProto, ScmHeartbeatResponseProto,
    ScmNodeReport, ScmRegisterRequestProto, ScmRegisteredResponseProto, ScmVersionRequestProto,
    ScmVersionResponseProto,
};
use ozone_proto::scm::{
    allocate_scm_block_response_proto, container_response_proto, delete_scm_block_result,
    storage_container_location_service_server::StorageContainerLocationService as LocationProtocol,
    AllocateScmBlockRequestProto, AllocateScmBlockResponseProto, ContainerRequestProto,
    ContainerResponseProto, DeleteContainerRequestProto, DeleteContainerResponseProto,
    DeleteScmBlockResult, DeleteScmBlocksRequestProto, DeleteScmBlocksResponseProto,
    GetContainerRequestProto, GetContainerResponseProto,
    GetScmBlockLocationsRequestProto, GetScmBlockLocationsResponseProto,
    GetStorageContainerLocationsRequestProto, GetStorageContainerLocationsResponseProto,
    LocatedContainerProto, NodeQueryRequestProto, NodeQueryResponseProto, ScmLocatedBlockProto,
};
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, error, warn};

/// Protocol version spoken by this SCM.
const SCM_VERSION: u32 = 1;

/// StorageContainerLocationProtocol server.
pub struct ScmLocationService {
    container_manager: Arc<ContainerManager>,
    block_manager: Arc<BlockManager>,
    node_manager: Arc<NodeManager>,
}

impl ScmLocationService {
    pub fn new(
        container_manager: Arc<ContainerManager>,
        block_manager: Arc<BlockManager>,
        node_manager: Arc<NodeManager>,
    ) -> Self {
        Self {
            container_manager,
            block_manager,
            node_manager,
        }
    }
}

#[tonic::async_trait]
impl LocationProtocol for ScmLocationService {
    async fn allocate_container(
        &self,
        request: Request<ContainerRequestProto>,
    ) -> Result<Response<ContainerResponseProto>, Status> {
        let req = request.into_inner();
        let replication_type = ReplicationType::from_proto(req.replication_type)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        // An unset factor defaults to ONE.
        let factor = if req.replication_factor == 0 {
            ReplicationFactor::One
        } else {
            ReplicationFactor::from_proto(req.replication_factor)
                .map_err(|e| Status::invalid_argument(e.to_string()))?
        };

        let resp = match self.container_manager.allocate_container(
            &req.container_name,
            replication_type,
            factor,
        ) {
            Ok(pipeline) => ContainerResponseProto {
                error_code: container_response_proto::Error::Success as i32,
                pipeline: Some(pipeline.to_proto()),
                error_message: String::new(),
            },
            Err(Error::ContainerAlreadyExists(name)) => ContainerResponseProto {
                error_code: container_response_proto::Error::ContainerAlreadyExists as i32,
                pipeline: None,
                error_message: format!("container already exists: {name}"),
            },
            Err(err) => {
                warn!(container = %req.container_name, %err, "container allocation failed");
                ContainerResponseProto {
                    error_code: container_response_proto::Error::UnknownFailure as i32,
                    pipeline: None,
                    error_message: err.to_string(),
                }
            }
        };
        Ok(Response::new(resp))
    }

    async fn get_container(
        &self,
        request: Request<GetContainerRequestProto>,
    ) -> Result<Response<GetContainerResponseProto>, Status> {
        let req = request.into_inner();
        match self.container_manager.get_container(&req.container_name) {
            Ok(pipeline) => Ok(Response::new(GetContainerResponseProto {
                pipeline: Some(pipeline.to_proto()),
            })),
            Err(Error::ContainerNotFound(name)) => {
                Err(Status::not_found(format!("container not found: {name}")))
            }
            Err(err) => {
                error!(%err, "getContainer failed");
                Err(Status::internal(err.to_string()))
            }
        }
    }

    async fn delete_container(
        &self,
        request: Request<DeleteContainerRequestProto>,
    ) -> Result<Response<DeleteContainerResponseProto>, Status> {
        let req = request.into_inner();
        self.container_manager
            .delete_container(&req.container_name)
            .map_err(|err| {
                error!(%err, "deleteContainer failed");
                Status::internal(err.to_string())
            })?;
        Ok(Response::new(DeleteContainerResponseProto {}))
    }

    async fn get_storage_container_locations(
        &self,
        request: Request<GetStorageContainerLocationsRequestProto>,
    ) -> Result<Response<GetStorageContainerLocationsResponseProto>, Status> {
        let req = request.into_inner();
        let located = self
            .block_manager
            .get_key_locations(&req.keys)
            .map_err(|err| {
                error!(%err, "getStorageContainerLocations failed");
                Status::internal(err.to_string())
            })?;
        let located_containers = located
            .into_iter()
            .map(|l| LocatedContainerProto {
                key: l.key,
                matched_key_prefix: l.matched_key_prefix,
                container_name: l.container_name,
                locations: l.pipeline.members.iter().map(|m| m.to_proto()).collect(),
                leader: l.pipeline.leader().map(|m| m.to_proto()),
            })
            .collect();
        Ok(Response::new(GetStorageContainerLocationsResponseProto {
            located_containers,
        }))
    }

    async fn allocate_scm_block(
        &self,
        request: Request<AllocateScmBlockRequestProto>,
    ) -> Result<Response<AllocateScmBlockResponseProto>, Status> {
        let req = request.into_inner();
        let resp = match self.block_manager.allocate_block(req.size) {
            Ok(block) => AllocateScmBlockResponseProto {
                error_code: allocate_scm_block_response_proto::Error::Success as i32,
                key: block.key,
                pipeline: Some(block.pipeline.to_proto()),
                create_container: block.create_container,
                error_message: String::new(),
            },
            Err(Error::InvalidArgument(msg)) => AllocateScmBlockResponseProto {
                error_code: allocate_scm_block_response_proto::Error::SizeTooBig as i32,
                key: String::new(),
                pipeline: None,
                create_container: false,
                error_message: msg,
            },
            Err(err) => {
                warn!(%err, size = req.size, "block allocation failed");
                AllocateScmBlockResponseProto {
                    error_code: allocate_scm_block_response_proto::Error::UnknownFailure as i32,
                    key: String::new(),
                    pipeline: None,
                    create_container: false,
                    error_message: err.to_string(),
                }
            }
        };
        Ok(Response::new(resp))
    }

    async fn delete_scm_blocks(
        &self,
        request: Request<DeleteScmBlocksRequestProto>,
    ) -> Result<Response<DeleteScmBlocksResponseProto>, Status> {
        let req = request.into_inner();
        let results = self.block_manager.delete_blocks(&req.keys).map_err(|err| {
            error!(%err, "deleteScmBlocks failed");
            Status::internal(err.to_string())
        })?;
        let results = results
            .into_iter()
            .map(|(key, result)| DeleteScmBlockResult {
                key,
                result: match result {
                    DeleteBlockResult::Success => delete_scm_block_result::Result::Success,
                    DeleteBlockResult::ErrorNotFound => {
                        delete_scm_block_result::Result::ErrorNotFound
                    }
                    DeleteBlockResult::UnknownFailure => {
                        delete_scm_block_result::Result::UnknownFailure
                    }
                } as i32,
            })
            .collect();
        Ok(Response::new(DeleteScmBlocksResponseProto { results }))
    }

    async fn get_scm_block_locations(
        &self,
        request: Request<GetScmBlockLocationsRequestProto>,
    ) -> Result<Response<GetScmBlockLocationsResponseProto>, Status> {
        let req = request.into_inner();
        let located = self
            .block_manager
            .get_block_locations(&req.keys)
            .map_err(|err| {
                error!(%err, "getScmBlockLocations failed");
                Status::internal(err.to_string())
            })?;
        let located_blocks = located
            .into_iter()
            .map(|(key, pipeline)| ScmLocatedBlockProto {
                key,
                pipeline: Some(pipeline.to_proto()),
            })
            .collect();
        Ok(Response::new(GetScmBlockLocationsResponseProto {
            located_blocks,
        }))
    }

    async fn query_node(
        &self,
        request: Request<NodeQueryRequestProto>,
    ) -> Result<Response<NodeQueryResponseProto>, Status> {
        let req = request.into_inner();
        let state = NodeState::from_proto(req.state)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let nodes = self
            .node_manager
            .nodes_by_state(state)
            .iter()
            .map(DatanodeDetails::to_proto)
            .collect();
        Ok(Response::new(NodeQueryResponseProto { nodes }))
    }
}

/// StorageContainerDatanodeProtocol server.
pub struct ScmDatanodeService {
    node_manager: Arc<NodeManager>,
    container_manager: Arc<ContainerManager>,
}

impl ScmDatanodeService {
    pub fn new(node_manager: Arc<NodeManager>, container_manager: Arc<ContainerManager>) -> Self {
        Self {
            node_manager,
            container_manager,
        }
    }

    fn stat_from_report(report: Option<&ScmNodeReport>) -> Option<NodeStat> {
        report.map(|r| {
            let mut stat = NodeStat::default();
            for storage in &r.storage_report {
                stat.add(&NodeStat::new(
                    storage.capacity,
                    storage.scm_used,
                    storage.remaining,
                ));
            }
            stat
        })
    }
}

#[tonic::async_trait]
impl DatanodeProtocol for ScmDatanodeService {
    async fn get_version(
        &self,
        _request: Request<ScmVersionRequestProto>,
    ) -> Result<Response<ScmVersionResponseProto>, Status> {
        Ok(Response::new(ScmVersionResponseProto {
            software_version: SCM_VERSION,
            scm_uuid: self.node_manager.cluster_id().to_string(),
        }))
    }

    async fn register(
        &self,
        request: Request<ScmRegisterRequestProto>,
    ) -> Result<Response<ScmRegisteredResponseProto>, Status> {
        let req = request.into_inner();

        let rejected = |message: String| {
            warn!(%message, "rejecting datanode registration");
            ScmRegisteredResponseProto {
                error_code: scm_registered_response_proto::ErrorCode::ErrorNodeNotPermitted as i32,
                datanode_uuid: String::new(),
                cluster_id: String::new(),
                hostname: String::new(),
                ip_address: String::new(),
            }
        };

        let Some(details_proto) = req.datanode_details else {
            return Ok(Response::new(rejected("missing datanode details".into())));
        };
        let details = match DatanodeDetails::from_proto(&details_proto) {
            Ok(details) => details,
            Err(err) => return Ok(Response::new(rejected(err.to_string()))),
        };
        let stat = Self::stat_from_report(req.node_report.as_ref()).unwrap_or_default();

        let registered = match self.node_manager.register(details, stat) {
            Ok(registered) => registered,
            Err(err) => return Ok(Response::new(rejected(err.to_string()))),
        };

        if let Some(reports) = req.container_report {
            for report in reports.reports {
                self.container_manager
                    .process_report(&report.container_name, report.used_bytes);
            }
        }

        debug!(datanode = %registered.datanode_uuid, "datanode registered");
        Ok(Response::new(ScmRegisteredResponseProto {
            error_code: scm_registered_response_proto::ErrorCode::Success as i32,
            datanode_uuid: registered.datanode_uuid.to_string(),
            cluster_id: registered.cluster_id,
            hostname: registered.hostname,
            ip_address: registered.ip_address,
        }))
    }

    async fn send_heartbeat(
        &self,
        request: Request<ScmHeartbeatRequestProto>,
    ) -> Result<Response<ScmHeartbeatResponseProto>, Status> {
        let req = request.into_inner();
        let details = req
            .datanode_details
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("missing datanode details"))
            .and_then(|d| {
                DatanodeDetails::from_proto(d)
                    .map_err(|e| Status::invalid_argument(e.to_string()))
            })?;
        let stat = Self::stat_from_report(req.node_report.as_ref());

        let commands = self
            .node_manager
            .send_heartbeat(details.uuid, stat)
            .iter()
            .map(|c| c.to_proto())
            .collect();
        Ok(Response::new(ScmHeartbeatResponseProto { commands }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_manager::NodeManagerConfig;
    use crate::placement::PlacementPolicy;
    use ozone_proto::datanode::{ContainerReportsProto, ScmStorageReport};
    use ozone_proto::hdds::DatanodeDetailsProto;
    use std::time::Duration;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn services(
        dir: &tempfile::TempDir,
    ) -> (ScmLocationService, ScmDatanodeService, Arc<NodeManager>) {
        let node_manager = Arc::new(NodeManager::new(NodeManagerConfig {
            cluster_id: "cluster-1".to_string(),
            stale_interval: Duration::from_secs(90),
            dead_interval: Duration::from_secs(300),
        }));
        let container_manager = Arc::new(
            ContainerManager::new(
                dir.path().join("containers.db"),
                PlacementPolicy::Random,
                5 * 1024 * 1024 * 1024,
                Arc::clone(&node_manager),
            )
            .unwrap(),
        );
        let block_manager = Arc::new(
            BlockManager::new(
                dir.path().join("blocks.db"),
                Arc::clone(&container_manager),
                Arc::clone(&node_manager),
                ReplicationType::Standalone,
                ReplicationFactor::One,
                4096,
            )
            .unwrap(),
        );
        (
            ScmLocationService::new(
                Arc::clone(&container_manager),
                block_manager,
                Arc::clone(&node_manager),
            ),
            ScmDatanodeService::new(Arc::clone(&node_manager), container_manager),
            node_manager,
        )
    }

    fn datanode_proto() -> DatanodeDetailsProto {
        DatanodeDetailsProto {
            uuid: Uuid::new_v4().to_string(),
            hostname: "dn1".to_string(),
            ip_address: "127.0.0.1".to_string(),
            container_port: 9859,
        }
    }

    fn register_request(details: DatanodeDetailsProto) -> ScmRegisterRequestProto {
        ScmRegisterRequestProto {
            datanode_details: Some(details),
            node_report: Some(ScmNodeReport {
                storage_report: vec![ScmStorageReport {
                    storage_uuid: Uuid::new_v4().to_string(),
                    capacity: 1 << 30,
                    scm_used: 0,
                    remaining: 1 << 30,
                }],
            }),
            container_report: Some(ContainerReportsProto { reports: vec![] }),
        }
    }

    #[tokio::test]
    async fn test_register_and_allocate_container() {
        let dir = tempdir().unwrap();
        let (location, datanode, _) = services(&dir);

        let details = datanode_proto();
        let resp = datanode
            .register(Request::new(register_request(details.clone())))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(
            resp.error_code,
            scm_registered_response_proto::ErrorCode::Success as i32
        );
        assert_eq!(resp.datanode_uuid, details.uuid);
        assert_eq!(resp.cluster_id, "cluster-1");

        let resp = location
            .allocate_container(Request::new(ContainerRequestProto {
                container_name: "c1".to_string(),
                replication_type: 0,
                replication_factor: 1,
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(
            resp.error_code,
            container_response_proto::Error::Success as i32
        );
        assert_eq!(resp.pipeline.unwrap().members.len(), 1);
    }

    #[tokio::test]
    async fn test_allocation_without_nodes_is_envelope_failure() {
        let dir = tempdir().unwrap();
        let (location, _, _) = services(&dir);

        let resp = location
            .allocate_container(Request::new(ContainerRequestProto {
                container_name: "c1".to_string(),
                replication_type: 0,
                replication_factor: 1,
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(
            resp.error_code,
            container_response_proto::Error::UnknownFailure as i32
        );

        let resp = location
            .allocate_scm_block(Request::new(AllocateScmBlockRequestProto { size: 4096 }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(
            resp.error_code,
            allocate_scm_block_response_proto::Error::UnknownFailure as i32
        );
    }

    #[tokio::test]
    async fn test_register_with_invalid_uuid_rejected() {
        let dir = tempdir().unwrap();
        let (_, datanode, _) = services(&dir);

        let mut details = datanode_proto();
        details.uuid = "not-a-uuid".to_string();
        let resp = datanode
            .register(Request::new(register_request(details)))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(
            resp.error_code,
            scm_registered_response_proto::ErrorCode::ErrorNodeNotPermitted as i32
        );
    }

    #[tokio::test]
    async fn test_heartbeat_returns_reregister_for_unknown_node() {
        let dir = tempdir().unwrap();
        let (_, datanode, _) = services(&dir);

        let resp = datanode
            .send_heartbeat(Request::new(ScmHeartbeatRequestProto {
                datanode_details: Some(datanode_proto()),
                node_report: None,
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.commands.len(), 1);
        assert_eq!(
            resp.commands[0].command_type,
            ozone_proto::datanode::scm_command_proto::Type::RegisteredCommand as i32
        );
    }

    #[tokio::test]
    async fn test_query_node_by_state() {
        let dir = tempdir().unwrap();
        let (location, datanode, _) = services(&dir);

        let details = datanode_proto();
        datanode
            .register(Request::new(register_request(details.clone())))
            .await
            .unwrap();

        let resp = location
            .query_node(Request::new(NodeQueryRequestProto { state: 0 }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.nodes.len(), 1);
        assert_eq!(resp.nodes[0].uuid, details.uuid);
    }

    #[tokio::test]
    async fn test_block_round_trip_through_service() {
        let dir = tempdir().unwrap();
        let (location, datanode, _) = services(&dir);

        datanode
            .register(Request::new(register_request(datanode_proto())))
            .await
            .unwrap();

        let allocated = location
            .allocate_scm_block(Request::new(AllocateScmBlockRequestProto { size: 4096 }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(
            allocated.error_code,
            allocate_scm_block_response_proto::Error::Success as i32
        );
        assert!(allocated.create_container);

        let located = location
            .get_scm_block_locations(Request::new(GetScmBlockLocationsRequestProto {
                keys: vec![allocated.key.clone()],
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(located.located_blocks.len(), 1);

        let deleted = location
            .delete_scm_blocks(Request::new(DeleteScmBlocksRequestProto {
                keys: vec![allocated.key],
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(
            deleted.results[0].result,
            delete_scm_block_result::Result::Success as i32
        );
    }
}
