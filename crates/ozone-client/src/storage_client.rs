//! Client-facing container operations.
//!
//! Combines the SCM location protocol with the data plane: allocating a
//! container on SCM and then initializing it on its datanodes.

use crate::calls;
use crate::location::StorageContainerLocationClient;
use crate::manager::XceiverClientManager;
use ozone_common::{Pipeline, ReplicationFactor, ReplicationType, Result};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct ContainerOperationClient {
    location: StorageContainerLocationClient,
    xceiver_manager: Arc<XceiverClientManager>,
}

impl ContainerOperationClient {
    pub fn new(
        location: StorageContainerLocationClient,
        xceiver_manager: Arc<XceiverClientManager>,
    ) -> Self {
        Self {
            location,
            xceiver_manager,
        }
    }

    /// Allocate a container on SCM and create it on the pipeline.
    pub async fn create_container(
        &self,
        name: &str,
        replication_type: ReplicationType,
        factor: ReplicationFactor,
    ) -> Result<Pipeline> {
        let pipeline = self
            .location
            .allocate_container(name, replication_type, factor)
            .await?;
        let client = self.xceiver_manager.acquire_client(&pipeline).await?;
        let trace_id = Uuid::new_v4().to_string();
        let created = calls::create_container(&client, &trace_id).await;
        self.xceiver_manager.release_client(client).await;
        created?;
        info!(
            container = name,
            leader = %pipeline.leader_id,
            members = pipeline.members.len(),
            "created container"
        );
        Ok(pipeline)
    }

    pub async fn get_container(&self, name: &str) -> Result<Pipeline> {
        self.location.get_container(name).await
    }

    /// Delete a container on its datanodes and then drop it from SCM.
    pub async fn delete_container(&self, name: &str) -> Result<()> {
        let pipeline = self.location.get_container(name).await?;
        let client = self.xceiver_manager.acquire_client(&pipeline).await?;
        let trace_id = Uuid::new_v4().to_string();
        let deleted = calls::delete_container(&client, &trace_id).await;
        self.xceiver_manager.release_client(client).await;
        deleted?;
        self.location.delete_container(name).await?;
        info!(container = name, "deleted container");
        Ok(())
    }
}
