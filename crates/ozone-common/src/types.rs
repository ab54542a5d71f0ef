//! Core type definitions for the Ozone control plane.
//!
//! These are the native counterparts of the wire messages in `ozone-proto`;
//! conversions live here so that SCM, KSM, datanodes and clients all agree
//! on how a pipeline or a datanode identity crosses the wire.

use crate::error::{Error, Result};
use ozone_proto::hdds;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Replication transport for a container pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicationType {
    #[default]
    Standalone,
    Ratis,
}

impl ReplicationType {
    pub fn from_proto(value: i32) -> Result<Self> {
        match hdds::ReplicationType::try_from(value) {
            Ok(hdds::ReplicationType::Standalone) => Ok(Self::Standalone),
            Ok(hdds::ReplicationType::Ratis) => Ok(Self::Ratis),
            Err(_) => Err(Error::invalid_argument(format!(
                "unknown replication type: {value}"
            ))),
        }
    }

    pub fn to_proto(self) -> hdds::ReplicationType {
        match self {
            Self::Standalone => hdds::ReplicationType::Standalone,
            Self::Ratis => hdds::ReplicationType::Ratis,
        }
    }
}

impl fmt::Display for ReplicationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standalone => write!(f, "STANDALONE"),
            Self::Ratis => write!(f, "RATIS"),
        }
    }
}

/// Number of datanodes serving a container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicationFactor {
    #[default]
    One,
    Three,
}

impl ReplicationFactor {
    /// The number of pipeline members this factor requires.
    pub fn number(self) -> usize {
        match self {
            Self::One => 1,
            Self::Three => 3,
        }
    }

    pub fn from_proto(value: i32) -> Result<Self> {
        match hdds::ReplicationFactor::try_from(value) {
            Ok(hdds::ReplicationFactor::One) => Ok(Self::One),
            Ok(hdds::ReplicationFactor::Three) => Ok(Self::Three),
            _ => Err(Error::invalid_argument(format!(
                "unknown replication factor: {value}"
            ))),
        }
    }

    pub fn to_proto(self) -> hdds::ReplicationFactor {
        match self {
            Self::One => hdds::ReplicationFactor::One,
            Self::Three => hdds::ReplicationFactor::Three,
        }
    }
}

impl fmt::Display for ReplicationFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One => write!(f, "ONE"),
            Self::Three => write!(f, "THREE"),
        }
    }
}

/// Liveness state of a datanode in SCM's registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    #[default]
    Healthy,
    Stale,
    Dead,
    Decommissioning,
    Decommissioned,
}

impl NodeState {
    pub fn from_proto(value: i32) -> Result<Self> {
        match hdds::NodeState::try_from(value) {
            Ok(hdds::NodeState::Healthy) => Ok(Self::Healthy),
            Ok(hdds::NodeState::Stale) => Ok(Self::Stale),
            Ok(hdds::NodeState::Dead) => Ok(Self::Dead),
            Ok(hdds::NodeState::Decommissioning) => Ok(Self::Decommissioning),
            Ok(hdds::NodeState::Decommissioned) => Ok(Self::Decommissioned),
            Err(_) => Err(Error::invalid_argument(format!(
                "unknown node state: {value}"
            ))),
        }
    }

    pub fn to_proto(self) -> hdds::NodeState {
        match self {
            Self::Healthy => hdds::NodeState::Healthy,
            Self::Stale => hdds::NodeState::Stale,
            Self::Dead => hdds::NodeState::Dead,
            Self::Decommissioning => hdds::NodeState::Decommissioning,
            Self::Decommissioned => hdds::NodeState::Decommissioned,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Stale => write!(f, "STALE"),
            Self::Dead => write!(f, "DEAD"),
            Self::Decommissioning => write!(f, "DECOMMISSIONING"),
            Self::Decommissioned => write!(f, "DECOMMISSIONED"),
        }
    }
}

/// Lifecycle state of a storage container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    Allocated,
    Creating,
    Open,
    Closing,
    Closed,
    Deleted,
}

impl ContainerState {
    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: ContainerState) -> bool {
        use ContainerState::*;
        matches!(
            (self, next),
            (Allocated, Creating)
                | (Creating, Open)
                | (Allocated, Open)
                | (Open, Closing)
                | (Closing, Closed)
                | (Closed, Deleted)
        )
    }
}

/// Identity of a datanode.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatanodeDetails {
    pub uuid: Uuid,
    pub hostname: String,
    pub ip_address: String,
    pub container_port: u16,
}

impl DatanodeDetails {
    pub fn from_proto(proto: &hdds::DatanodeDetailsProto) -> Result<Self> {
        let uuid = Uuid::parse_str(&proto.uuid)
            .map_err(|_| Error::invalid_argument(format!("invalid datanode uuid: {:?}", proto.uuid)))?;
        Ok(Self {
            uuid,
            hostname: proto.hostname.clone(),
            ip_address: proto.ip_address.clone(),
            container_port: proto.container_port as u16,
        })
    }

    pub fn to_proto(&self) -> hdds::DatanodeDetailsProto {
        hdds::DatanodeDetailsProto {
            uuid: self.uuid.to_string(),
            hostname: self.hostname.clone(),
            ip_address: self.ip_address.clone(),
            container_port: u32::from(self.container_port),
        }
    }
}

impl fmt::Display for DatanodeDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.hostname, self.uuid)
    }
}

/// The ordered set of datanodes serving a container. The first member is the
/// leader; ordering carries write-sequencing semantics for RATIS pipelines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pipeline {
    pub container_name: String,
    pub leader_id: Uuid,
    pub members: Vec<DatanodeDetails>,
    pub replication_type: ReplicationType,
    pub factor: ReplicationFactor,
}

impl Pipeline {
    /// Build a pipeline from an ordered member list; the first member leads.
    pub fn new(
        container_name: impl Into<String>,
        members: Vec<DatanodeDetails>,
        replication_type: ReplicationType,
        factor: ReplicationFactor,
    ) -> Result<Self> {
        let leader = members
            .first()
            .ok_or_else(|| Error::invalid_argument("pipeline requires at least one member"))?;
        Ok(Self {
            container_name: container_name.into(),
            leader_id: leader.uuid,
            members,
            replication_type,
            factor,
        })
    }

    pub fn leader(&self) -> Option<&DatanodeDetails> {
        self.members.iter().find(|m| m.uuid == self.leader_id)
    }

    pub fn from_proto(proto: &hdds::PipelineProto) -> Result<Self> {
        let leader_id = Uuid::parse_str(&proto.leader_id)
            .map_err(|_| Error::invalid_argument("invalid pipeline leader id"))?;
        let members = proto
            .members
            .iter()
            .map(DatanodeDetails::from_proto)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            container_name: proto.container_name.clone(),
            leader_id,
            members,
            replication_type: ReplicationType::from_proto(proto.replication_type)?,
            factor: ReplicationFactor::from_proto(proto.replication_factor)?,
        })
    }

    pub fn to_proto(&self) -> hdds::PipelineProto {
        hdds::PipelineProto {
            leader_id: self.leader_id.to_string(),
            members: self.members.iter().map(DatanodeDetails::to_proto).collect(),
            container_name: self.container_name.clone(),
            replication_type: self.replication_type.to_proto() as i32,
            replication_factor: self.factor.to_proto() as i32,
        }
    }
}

/// Capacity statistics reported by a datanode and aggregated by SCM.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeStat {
    pub capacity: u64,
    pub used: u64,
    pub remaining: u64,
}

impl NodeStat {
    pub fn new(capacity: u64, used: u64, remaining: u64) -> Self {
        Self {
            capacity,
            used,
            remaining,
        }
    }

    pub fn add(&mut self, other: &NodeStat) {
        self.capacity += other.capacity;
        self.used += other.used;
        self.remaining += other.remaining;
    }

    pub fn subtract(&mut self, other: &NodeStat) {
        self.capacity = self.capacity.saturating_sub(other.capacity);
        self.used = self.used.saturating_sub(other.used);
        self.remaining = self.remaining.saturating_sub(other.remaining);
    }
}

/// The result of an SCM block allocation: an opaque block key, the pipeline
/// to write through and whether the caller must first create the container.
#[derive(Clone, Debug)]
pub struct AllocatedBlock {
    pub key: String,
    pub pipeline: Pipeline,
    pub create_container: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datanode(port: u16) -> DatanodeDetails {
        DatanodeDetails {
            uuid: Uuid::new_v4(),
            hostname: format!("dn-{port}"),
            ip_address: "127.0.0.1".to_string(),
            container_port: port,
        }
    }

    #[test]
    fn test_replication_factor_number() {
        assert_eq!(ReplicationFactor::One.number(), 1);
        assert_eq!(ReplicationFactor::Three.number(), 3);
    }

    #[test]
    fn test_pipeline_leader_is_first_member() {
        let members = vec![datanode(1), datanode(2), datanode(3)];
        let leader_uuid = members[0].uuid;
        let pipeline = Pipeline::new(
            "c1",
            members,
            ReplicationType::Standalone,
            ReplicationFactor::Three,
        )
        .unwrap();
        assert_eq!(pipeline.leader_id, leader_uuid);
        assert_eq!(pipeline.leader().unwrap().uuid, leader_uuid);
    }

    #[test]
    fn test_pipeline_proto_round_trip() {
        let pipeline = Pipeline::new(
            "c1",
            vec![datanode(1)],
            ReplicationType::Standalone,
            ReplicationFactor::One,
        )
        .unwrap();
        let restored = Pipeline::from_proto(&pipeline.to_proto()).unwrap();
        assert_eq!(restored, pipeline);
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        assert!(Pipeline::new(
            "c1",
            vec![],
            ReplicationType::Standalone,
            ReplicationFactor::One
        )
        .is_err());
    }

    #[test]
    fn test_container_state_transitions() {
        assert!(ContainerState::Open.can_transition_to(ContainerState::Closing));
        assert!(ContainerState::Closing.can_transition_to(ContainerState::Closed));
        assert!(!ContainerState::Closed.can_transition_to(ContainerState::Open));
        assert!(!ContainerState::Open.can_transition_to(ContainerState::Deleted));
    }

    #[test]
    fn test_node_stat_add_subtract() {
        let mut total = NodeStat::default();
        total.add(&NodeStat::new(100, 10, 90));
        total.add(&NodeStat::new(50, 5, 45));
        assert_eq!(total, NodeStat::new(150, 15, 135));
        total.subtract(&NodeStat::new(50, 5, 45));
        assert_eq!(total, NodeStat::new(100, 10, 90));
    }
}
