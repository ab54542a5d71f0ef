//! Datanode registry and liveness tracking.
//!
//! Nodes enter the registry through registration, stay HEALTHY by
//! heartbeating and decay HEALTHY -> STALE -> DEAD through a periodic sweep
//! over monotonic timestamps. A DEAD node only returns through a successful
//! re-registration.

use crate::commands::ScmCommand;
use ozone_common::{DatanodeDetails, Error, NodeState, NodeStat, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Liveness thresholds for the sweep.
#[derive(Clone, Debug)]
pub struct NodeManagerConfig {
    pub cluster_id: String,
    pub stale_interval: Duration,
    pub dead_interval: Duration,
}

#[derive(Clone, Debug)]
struct DatanodeEntry {
    details: DatanodeDetails,
    stat: NodeStat,
    state: NodeState,
    last_heartbeat: Instant,
}

/// Confirmation returned to a datanode on successful registration.
#[derive(Clone, Debug)]
pub struct RegisteredNode {
    pub datanode_uuid: Uuid,
    pub cluster_id: String,
    pub hostname: String,
    pub ip_address: String,
}

pub struct NodeManager {
    config: NodeManagerConfig,
    nodes: RwLock<HashMap<Uuid, DatanodeEntry>>,
    commands: Mutex<HashMap<Uuid, VecDeque<ScmCommand>>>,
}

impl NodeManager {
    pub fn new(config: NodeManagerConfig) -> Self {
        Self {
            config,
            nodes: RwLock::new(HashMap::new()),
            commands: Mutex::new(HashMap::new()),
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.config.cluster_id
    }

    /// Register a datanode, creating or refreshing its entry as HEALTHY.
    pub fn register(&self, details: DatanodeDetails, stat: NodeStat) -> Result<RegisteredNode> {
        if details.uuid.is_nil() {
            return Err(Error::InvalidRegistration(
                "datanode uuid must not be nil".to_string(),
            ));
        }
        let registered = RegisteredNode {
            datanode_uuid: details.uuid,
            cluster_id: self.config.cluster_id.clone(),
            hostname: details.hostname.clone(),
            ip_address: details.ip_address.clone(),
        };
        let mut nodes = self.nodes.write();
        let refreshed = nodes
            .insert(
                details.uuid,
                DatanodeEntry {
                    details,
                    stat,
                    state: NodeState::Healthy,
                    last_heartbeat: Instant::now(),
                },
            )
            .is_some();
        info!(
            datanode = %registered.datanode_uuid,
            refreshed,
            "registered datanode"
        );
        Ok(registered)
    }

    /// Record a heartbeat and return the commands queued for the node.
    ///
    /// A heartbeat only refreshes the monotonic timestamp; state transitions
    /// happen in the next sweep. Unknown and DEAD nodes are handed a
    /// re-register command instead of being resurrected.
    pub fn send_heartbeat(&self, uuid: Uuid, stat: Option<NodeStat>) -> Vec<ScmCommand> {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(&uuid) {
            None => {
                warn!(datanode = %uuid, "heartbeat from unregistered datanode");
                vec![ScmCommand::ReRegister]
            }
            Some(entry) if entry.state == NodeState::Dead => {
                warn!(datanode = %uuid, "heartbeat from DEAD datanode, requesting re-registration");
                vec![ScmCommand::ReRegister]
            }
            Some(entry) => {
                entry.last_heartbeat = Instant::now();
                if let Some(stat) = stat {
                    entry.stat = stat;
                }
                drop(nodes);
                self.drain_commands(uuid)
            }
        }
    }

    fn drain_commands(&self, uuid: Uuid) -> Vec<ScmCommand> {
        let mut commands = self.commands.lock();
        commands
            .get_mut(&uuid)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Queue a command for delivery on the node's next heartbeat.
    pub fn queue_command(&self, uuid: Uuid, command: ScmCommand) {
        self.commands.lock().entry(uuid).or_default().push_back(command);
    }

    /// Evaluate liveness transitions against the monotonic clock.
    ///
    /// HEALTHY decays to STALE and STALE to DEAD; a STALE node with a recent
    /// heartbeat recovers to HEALTHY. DEAD is terminal until the node
    /// re-registers, so a node never moves HEALTHY -> DEAD in one sweep.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut nodes = self.nodes.write();
        for (uuid, entry) in nodes.iter_mut() {
            let elapsed = now.saturating_duration_since(entry.last_heartbeat);
            match entry.state {
                NodeState::Healthy => {
                    if elapsed > self.config.stale_interval {
                        info!(datanode = %uuid, ?elapsed, "datanode is STALE");
                        entry.state = NodeState::Stale;
                    }
                }
                NodeState::Stale => {
                    if elapsed <= self.config.stale_interval {
                        info!(datanode = %uuid, "datanode recovered to HEALTHY");
                        entry.state = NodeState::Healthy;
                    } else if elapsed > self.config.dead_interval {
                        warn!(datanode = %uuid, ?elapsed, "datanode is DEAD");
                        entry.state = NodeState::Dead;
                    }
                }
                NodeState::Dead
                | NodeState::Decommissioning
                | NodeState::Decommissioned => {}
            }
        }
    }

    pub fn node_state(&self, uuid: Uuid) -> Option<NodeState> {
        self.nodes.read().get(&uuid).map(|e| e.state)
    }

    pub fn nodes_by_state(&self, state: NodeState) -> Vec<DatanodeDetails> {
        self.nodes
            .read()
            .values()
            .filter(|e| e.state == state)
            .map(|e| e.details.clone())
            .collect()
    }

    /// Healthy nodes with their latest reported stats, for placement.
    pub fn healthy_nodes(&self) -> Vec<(DatanodeDetails, NodeStat)> {
        self.nodes
            .read()
            .values()
            .filter(|e| e.state == NodeState::Healthy)
            .map(|e| (e.details.clone(), e.stat))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Cluster-wide stat aggregate.
    pub fn aggregate_stat(&self) -> NodeStat {
        let mut total = NodeStat::default();
        for entry in self.nodes.read().values() {
            total.add(&entry.stat);
        }
        debug!(?total, "aggregated node stats");
        total
    }
}
