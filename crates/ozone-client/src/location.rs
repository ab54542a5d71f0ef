//! Client for SCM's StorageContainerLocationProtocol.

use ozone_common::{
    AllocatedBlock, DatanodeDetails, Error, NodeState, Pipeline, ReplicationFactor,
    ReplicationType, Result,
};
use ozone_proto::scm::{
    allocate_scm_block_response_proto, container_response_proto, delete_scm_block_result,
    storage_container_location_service_client::StorageContainerLocationServiceClient,
    AllocateScmBlockRequestProto, ContainerRequestProto, DeleteContainerRequestProto,
    DeleteScmBlocksRequestProto, GetContainerRequestProto, GetScmBlockLocationsRequestProto,
    GetStorageContainerLocationsRequestProto, NodeQueryRequestProto,
};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// Per-key outcome of `delete_scm_blocks`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteBlockOutcome {
    Success,
    NotFound,
    Failure,
}

/// A namespace key located on a container, as returned by SCM.
#[derive(Clone, Debug)]
pub struct LocatedContainer {
    pub key: String,
    pub matched_key_prefix: String,
    pub container_name: String,
    pub pipeline: Pipeline,
}

#[derive(Clone)]
pub struct StorageContainerLocationClient {
    client: StorageContainerLocationServiceClient<Channel>,
}

impl StorageContainerLocationClient {
    /// Connect to the SCM client-facing address (`host:port`).
    pub async fn connect(address: &str, rpc_timeout: Duration) -> Result<Self> {
        let channel = Endpoint::from_shared(format!("http://{address}"))
            .map_err(|e| Error::rpc(e.to_string()))?
            .timeout(rpc_timeout)
            .connect()
            .await
            .map_err(|e| Error::rpc(format!("connect to scm failed: {e}")))?;
        Ok(Self {
            client: StorageContainerLocationServiceClient::new(channel),
        })
    }

    pub async fn allocate_container(
        &self,
        name: &str,
        replication_type: ReplicationType,
        factor: ReplicationFactor,
    ) -> Result<Pipeline> {
        let response = self
            .client
            .clone()
            .allocate_container(ContainerRequestProto {
                container_name: name.to_string(),
                replication_type: replication_type.to_proto() as i32,
                replication_factor: factor.to_proto() as i32,
            })
            .await
            .map_err(|s| Error::rpc(s.to_string()))?
            .into_inner();

        match container_response_proto::Error::try_from(response.error_code) {
            Ok(container_response_proto::Error::Success) => {}
            Ok(container_response_proto::Error::ContainerAlreadyExists) => {
                return Err(Error::ContainerAlreadyExists(name.to_string()));
            }
            _ => return Err(Error::rpc(response.error_message)),
        }
        let pipeline = response
            .pipeline
            .ok_or_else(|| Error::rpc("allocateContainer response missing pipeline"))?;
        Pipeline::from_proto(&pipeline)
    }

    pub async fn get_container(&self, name: &str) -> Result<Pipeline> {
        let response = self
            .client
            .clone()
            .get_container(GetContainerRequestProto {
                container_name: name.to_string(),
            })
            .await
            .map_err(|s| match s.code() {
                tonic::Code::NotFound => Error::ContainerNotFound(name.to_string()),
                _ => Error::rpc(s.to_string()),
            })?
            .into_inner();
        let pipeline = response
            .pipeline
            .ok_or_else(|| Error::rpc("getContainer response missing pipeline"))?;
        Pipeline::from_proto(&pipeline)
    }

    pub async fn delete_container(&self, name: &str) -> Result<()> {
        self.client
            .clone()
            .delete_container(DeleteContainerRequestProto {
                container_name: name.to_string(),
            })
            .await
            .map_err(|s| Error::rpc(s.to_string()))?;
        Ok(())
    }

    pub async fn allocate_scm_block(&self, size: u64) -> Result<AllocatedBlock> {
        let response = self
            .client
            .clone()
            .allocate_scm_block(AllocateScmBlockRequestProto { size })
            .await
            .map_err(|s| Error::rpc(s.to_string()))?
            .into_inner();

        if response.error_code != allocate_scm_block_response_proto::Error::Success as i32 {
            return Err(Error::rpc(response.error_message));
        }
        let pipeline = response
            .pipeline
            .ok_or_else(|| Error::rpc("allocateScmBlock response missing pipeline"))?;
        Ok(AllocatedBlock {
            key: response.key,
            pipeline: Pipeline::from_proto(&pipeline)?,
            create_container: response.create_container,
        })
    }

    pub async fn delete_scm_blocks(
        &self,
        keys: Vec<String>,
    ) -> Result<Vec<(String, DeleteBlockOutcome)>> {
        let response = self
            .client
            .clone()
            .delete_scm_blocks(DeleteScmBlocksRequestProto { keys })
            .await
            .map_err(|s| Error::rpc(s.to_string()))?
            .into_inner();
        Ok(response
            .results
            .into_iter()
            .map(|r| {
                let outcome = match delete_scm_block_result::Result::try_from(r.result) {
                    Ok(delete_scm_block_result::Result::Success) => DeleteBlockOutcome::Success,
                    Ok(delete_scm_block_result::Result::ErrorNotFound) => {
                        DeleteBlockOutcome::NotFound
                    }
                    _ => DeleteBlockOutcome::Failure,
                };
                (r.key, outcome)
            })
            .collect())
    }

    pub async fn get_scm_block_locations(
        &self,
        keys: Vec<String>,
    ) -> Result<Vec<(String, Pipeline)>> {
        let response = self
            .client
            .clone()
            .get_scm_block_locations(GetScmBlockLocationsRequestProto { keys })
            .await
            .map_err(|s| Error::rpc(s.to_string()))?
            .into_inner();
        response
            .located_blocks
            .into_iter()
            .map(|located| {
                let pipeline = located
                    .pipeline
                    .ok_or_else(|| Error::rpc("located block missing pipeline"))?;
                Ok((located.key, Pipeline::from_proto(&pipeline)?))
            })
            .collect()
    }

    pub async fn get_storage_container_locations(
        &self,
        keys: Vec<String>,
    ) -> Result<Vec<LocatedContainer>> {
        let response = self
            .client
            .clone()
            .get_storage_container_locations(GetStorageContainerLocationsRequestProto { keys })
            .await
            .map_err(|s| Error::rpc(s.to_string()))?
            .into_inner();
        response
            .located_containers
            .into_iter()
            .map(|located| {
                let members = located
                    .locations
                    .iter()
                    .map(DatanodeDetails::from_proto)
                    .collect::<Result<Vec<_>>>()?;
                let pipeline = Pipeline::new(
                    located.container_name.clone(),
                    members,
                    ReplicationType::Standalone,
                    ReplicationFactor::One,
                )?;
                Ok(LocatedContainer {
                    key: located.key,
                    matched_key_prefix: located.matched_key_prefix,
                    container_name: located.container_name,
                    pipeline,
                })
            })
            .collect()
    }

    pub async fn query_node(&self, state: NodeState) -> Result<Vec<DatanodeDetails>> {
        let response = self
            .client
            .clone()
            .query_node(NodeQueryRequestProto {
                state: state.to_proto() as i32,
            })
            .await
            .map_err(|s| Error::rpc(s.to_string()))?
            .into_inner();
        response
            .nodes
            .iter()
            .map(DatanodeDetails::from_proto)
            .collect()
    }
}
