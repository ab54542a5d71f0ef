//! The container registry.
//!
//! Containers are the unit of replication and placement. The registry keeps
//! an in-memory view guarded by its own R/W lock and persists
//! `container name -> pipeline` in a metadata store, which is also the
//! layout external export tooling reads.

use crate::node_manager::NodeManager;
use crate::placement::{CandidateNode, PlacementPolicy};
use ozone_common::{
    ContainerState, Error, Pipeline, ReplicationFactor, ReplicationType, Result,
};
use ozone_meta::MetaStore;
use ozone_proto::hdds::PipelineProto;
use parking_lot::RwLock;
use prost::Message;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Registry entry for one container.
#[derive(Clone, Debug)]
pub struct ContainerInfo {
    pub pipeline: Pipeline,
    pub state: ContainerState,
    pub used_bytes: u64,
}

pub struct ContainerManager {
    store: MetaStore,
    containers: RwLock<BTreeMap<String, ContainerInfo>>,
    placement: PlacementPolicy,
    container_size: u64,
    node_manager: Arc<NodeManager>,
}

impl ContainerManager {
    /// Open the registry, reloading any persisted containers.
    pub fn new(
        store_path: impl AsRef<Path>,
        placement: PlacementPolicy,
        container_size: u64,
        node_manager: Arc<NodeManager>,
    ) -> Result<Self> {
        let store = MetaStore::open(store_path)?;
        let mut containers = BTreeMap::new();
        for (key, value) in store.scan_prefix(b"")? {
            let name = String::from_utf8(key)
                .map_err(|_| Error::storage("non-utf8 container name in store"))?;
            let proto = PipelineProto::decode(value.as_slice())
                .map_err(|e| Error::storage(format!("corrupt pipeline for {name}: {e}")))?;
            let pipeline = Pipeline::from_proto(&proto)?;
            containers.insert(
                name,
                ContainerInfo {
                    pipeline,
                    state: ContainerState::Open,
                    used_bytes: 0,
                },
            );
        }
        if !containers.is_empty() {
            info!("loaded {} containers from store", containers.len());
        }
        Ok(Self {
            store,
            containers: RwLock::new(containers),
            placement,
            container_size,
            node_manager,
        })
    }

    pub fn container_size(&self) -> u64 {
        self.container_size
    }

    /// Allocate a container: place a pipeline on healthy datanodes, persist
    /// it and open the container.
    pub fn allocate_container(
        &self,
        name: &str,
        replication_type: ReplicationType,
        factor: ReplicationFactor,
    ) -> Result<Pipeline> {
        if name.is_empty() {
            return Err(Error::invalid_argument("container name must not be empty"));
        }
        let mut containers = self.containers.write();
        if containers.contains_key(name) {
            return Err(Error::ContainerAlreadyExists(name.to_string()));
        }

        let candidates: Vec<CandidateNode> = self
            .node_manager
            .healthy_nodes()
            .into_iter()
            .map(|(details, stat)| CandidateNode { details, stat })
            .collect();
        // Prefer nodes that do not already carry a pipeline of this type.
        let in_use: HashSet<Uuid> = containers
            .values()
            .filter(|info| info.pipeline.replication_type == replication_type)
            .flat_map(|info| info.pipeline.members.iter().map(|m| m.uuid))
            .collect();

        let members = self
            .placement
            .choose_datanodes(&candidates, factor.number(), &in_use)?;
        let pipeline = Pipeline::new(name, members, replication_type, factor)?;

        self.store.put(name.as_bytes(), &pipeline.to_proto().encode_to_vec())?;
        containers.insert(
            name.to_string(),
            ContainerInfo {
                pipeline: pipeline.clone(),
                state: ContainerState::Open,
                used_bytes: 0,
            },
        );
        info!(
            container = name,
            leader = %pipeline.leader_id,
            members = pipeline.members.len(),
            "allocated container"
        );
        Ok(pipeline)
    }

    pub fn get_container(&self, name: &str) -> Result<Pipeline> {
        self.containers
            .read()
            .get(name)
            .map(|info| info.pipeline.clone())
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))
    }

    pub fn get_info(&self, name: &str) -> Option<ContainerInfo> {
        self.containers.read().get(name).cloned()
    }

    /// Delete a container. Idempotent: deleting a missing container
    /// succeeds and mutates nothing.
    pub fn delete_container(&self, name: &str) -> Result<()> {
        let mut containers = self.containers.write();
        if containers.remove(name).is_none() {
            debug!(container = name, "delete of missing container ignored");
            return Ok(());
        }
        self.store.delete(name.as_bytes())?;
        info!(container = name, "deleted container");
        Ok(())
    }

    /// Account bytes provisionally consumed by a block allocation.
    pub fn note_block_allocated(&self, name: &str, size: u64) -> Result<()> {
        let mut containers = self.containers.write();
        let info = containers
            .get_mut(name)
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))?;
        info.used_bytes += size;
        Ok(())
    }

    /// Remaining capacity of a container, if it is usable for allocation.
    pub fn remaining_space(&self, name: &str) -> Result<u64> {
        let containers = self.containers.read();
        let info = containers
            .get(name)
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))?;
        if info.state != ContainerState::Open {
            return Ok(0);
        }
        Ok(self.container_size.saturating_sub(info.used_bytes))
    }

    /// Move a container through its lifecycle, rejecting illegal steps.
    pub fn update_container_state(&self, name: &str, next: ContainerState) -> Result<()> {
        let mut containers = self.containers.write();
        let info = containers
            .get_mut(name)
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))?;
        if !info.state.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: format!("{:?}", info.state),
                to: format!("{next:?}"),
            });
        }
        info.state = next;
        Ok(())
    }

    /// Apply a datanode container report: refresh usage and close containers
    /// that have filled up.
    pub fn process_report(&self, name: &str, used_bytes: u64) {
        let mut containers = self.containers.write();
        let Some(info) = containers.get_mut(name) else {
            warn!(container = name, "report for unknown container");
            return;
        };
        info.used_bytes = info.used_bytes.max(used_bytes);
        if info.state == ContainerState::Open && info.used_bytes >= self.container_size {
            info!(container = name, "container is full, closing");
            info.state = ContainerState::Closing;
        }
    }

    pub fn container_names(&self) -> Vec<String> {
        self.containers.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_manager::NodeManagerConfig;
    use ozone_common::{DatanodeDetails, NodeStat};
    use std::time::Duration;
    use tempfile::tempdir;

    fn node_manager_with_nodes(count: usize) -> Arc<NodeManager> {
        let mgr = Arc::new(NodeManager::new(NodeManagerConfig {
            cluster_id: "test".to_string(),
            stale_interval: Duration::from_secs(90),
            dead_interval: Duration::from_secs(300),
        }));
        for i in 0..count {
            mgr.register(
                DatanodeDetails {
                    uuid: Uuid::new_v4(),
                    hostname: format!("dn{i}"),
                    ip_address: "127.0.0.1".to_string(),
                    container_port: 9859,
                },
                NodeStat::new(1 << 30, 0, 1 << 30),
            )
            .unwrap();
        }
        mgr
    }

    fn manager(nodes: usize, dir: &tempfile::TempDir) -> ContainerManager {
        ContainerManager::new(
            dir.path().join("scm.db"),
            PlacementPolicy::Random,
            5 * 1024 * 1024,
            node_manager_with_nodes(nodes),
        )
        .unwrap()
    }

    #[test]
    fn test_allocate_and_get() {
        let dir = tempdir().unwrap();
        let mgr = manager(3, &dir);

        let pipeline = mgr
            .allocate_container("c1", ReplicationType::Standalone, ReplicationFactor::Three)
            .unwrap();
        assert_eq!(pipeline.members.len(), 3);
        assert_eq!(mgr.get_container("c1").unwrap(), pipeline);
    }

    #[test]
    fn test_duplicate_allocation_rejected() {
        let dir = tempdir().unwrap();
        let mgr = manager(1, &dir);

        mgr.allocate_container("c1", ReplicationType::Standalone, ReplicationFactor::One)
            .unwrap();
        assert!(matches!(
            mgr.allocate_container("c1", ReplicationType::Standalone, ReplicationFactor::One),
            Err(Error::ContainerAlreadyExists(_))
        ));
    }

    #[test]
    fn test_factor_three_with_three_nodes_twice() {
        // Scenario: c1 and c2 both get three distinct members from the same
        // three-node cluster; overlap between the two pipelines is allowed.
        let dir = tempdir().unwrap();
        let mgr = manager(3, &dir);

        let p1 = mgr
            .allocate_container("c1", ReplicationType::Standalone, ReplicationFactor::Three)
            .unwrap();
        let p2 = mgr
            .allocate_container("c2", ReplicationType::Standalone, ReplicationFactor::Three)
            .unwrap();
        for pipeline in [&p1, &p2] {
            let distinct: HashSet<Uuid> = pipeline.members.iter().map(|m| m.uuid).collect();
            assert_eq!(distinct.len(), 3);
        }
    }

    #[test]
    fn test_insufficient_nodes() {
        let dir = tempdir().unwrap();
        let mgr = manager(2, &dir);
        assert!(matches!(
            mgr.allocate_container("c1", ReplicationType::Standalone, ReplicationFactor::Three),
            Err(Error::InsufficientNodes { .. })
        ));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let mgr = manager(1, &dir);

        mgr.allocate_container("c1", ReplicationType::Standalone, ReplicationFactor::One)
            .unwrap();
        mgr.delete_container("c1").unwrap();
        assert!(mgr.get_container("c1").is_err());
        // Second delete is a success and mutates nothing.
        mgr.delete_container("c1").unwrap();
        mgr.delete_container("never-existed").unwrap();
    }

    #[test]
    fn test_dead_node_cannot_host_containers() {
        // One registered node that stops heartbeating: once it has decayed
        // to DEAD, allocation fails for lack of healthy nodes.
        let dir = tempdir().unwrap();
        let nodes = Arc::new(NodeManager::new(NodeManagerConfig {
            cluster_id: "test".to_string(),
            stale_interval: Duration::from_millis(10),
            dead_interval: Duration::from_millis(20),
        }));
        nodes
            .register(
                DatanodeDetails {
                    uuid: Uuid::new_v4(),
                    hostname: "dn0".to_string(),
                    ip_address: "127.0.0.1".to_string(),
                    container_port: 9859,
                },
                NodeStat::new(1 << 30, 0, 1 << 30),
            )
            .unwrap();
        let mgr = ContainerManager::new(
            dir.path().join("scm.db"),
            PlacementPolicy::Random,
            5 * 1024 * 1024,
            Arc::clone(&nodes),
        )
        .unwrap();

        mgr.allocate_container("c1", ReplicationType::Standalone, ReplicationFactor::One)
            .unwrap();

        std::thread::sleep(Duration::from_millis(15));
        nodes.sweep();
        std::thread::sleep(Duration::from_millis(15));
        nodes.sweep();

        assert!(matches!(
            mgr.allocate_container("c2", ReplicationType::Standalone, ReplicationFactor::One),
            Err(Error::InsufficientNodes { .. })
        ));
    }

    #[test]
    fn test_pipeline_survives_reload() {
        let dir = tempdir().unwrap();
        let nodes = node_manager_with_nodes(1);
        let path = dir.path().join("scm.db");
        let pipeline = {
            let mgr = ContainerManager::new(
                &path,
                PlacementPolicy::Random,
                5 * 1024 * 1024,
                Arc::clone(&nodes),
            )
            .unwrap();
            mgr.allocate_container("c1", ReplicationType::Standalone, ReplicationFactor::One)
                .unwrap()
        };
        let reloaded = ContainerManager::new(&path, PlacementPolicy::Random, 5 * 1024 * 1024, nodes)
            .unwrap();
        assert_eq!(reloaded.get_container("c1").unwrap(), pipeline);
    }

    #[test]
    fn test_report_closes_full_container() {
        let dir = tempdir().unwrap();
        let mgr = manager(1, &dir);

        mgr.allocate_container("c1", ReplicationType::Standalone, ReplicationFactor::One)
            .unwrap();
        mgr.process_report("c1", 5 * 1024 * 1024);
        assert_eq!(mgr.get_info("c1").unwrap().state, ContainerState::Closing);
        assert_eq!(mgr.remaining_space("c1").unwrap(), 0);
    }

    #[test]
    fn test_illegal_state_transition_rejected() {
        let dir = tempdir().unwrap();
        let mgr = manager(1, &dir);

        mgr.allocate_container("c1", ReplicationType::Standalone, ReplicationFactor::One)
            .unwrap();
        assert!(mgr
            .update_container_state("c1", ContainerState::Closed)
            .is_err());
        mgr.update_container_state("c1", ContainerState::Closing)
            .unwrap();
        mgr.update_container_state("c1", ContainerState::Closed)
            .unwrap();
    }
}
