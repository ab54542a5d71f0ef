//! Block allocation brokering.
//!
//! KSM asks SCM for blocks; SCM hands back a block key plus the pipeline of
//! an open container with room, creating a fresh container when none fits.
//! Deletions are recorded as transactions and pushed to the container's
//! datanodes through the heartbeat command queue.

use crate::commands::{DeletedBlocksTransaction, ScmCommand};
use crate::container_manager::ContainerManager;
use crate::node_manager::NodeManager;
use ozone_common::{
    AllocatedBlock, Error, Pipeline, ReplicationFactor, ReplicationType, Result,
};
use ozone_meta::MetaStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

// Key layout inside the block store.
const BLOCK_PREFIX: &[u8] = b"blk:";
const KEY_PREFIX: &[u8] = b"key:";

/// Per-key outcome of a block deletion request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteBlockResult {
    Success,
    ErrorNotFound,
    UnknownFailure,
}

/// A namespace key resolved to the container serving it.
#[derive(Clone, Debug)]
pub struct LocatedContainer {
    pub key: String,
    pub matched_key_prefix: String,
    pub container_name: String,
    pub pipeline: Pipeline,
}

struct DeletedBlockLog {
    next_tx_id: i64,
    transactions: Vec<DeletedBlocksTransaction>,
}

pub struct BlockManager {
    blocks: MetaStore,
    open_containers: Mutex<HashMap<(ReplicationType, ReplicationFactor), Vec<String>>>,
    container_manager: Arc<ContainerManager>,
    node_manager: Arc<NodeManager>,
    replication_type: ReplicationType,
    factor: ReplicationFactor,
    deleted_blocks: Mutex<DeletedBlockLog>,
    deletion_max_retry: u32,
}

impl BlockManager {
    pub fn new(
        store_path: impl AsRef<Path>,
        container_manager: Arc<ContainerManager>,
        node_manager: Arc<NodeManager>,
        replication_type: ReplicationType,
        factor: ReplicationFactor,
        deletion_max_retry: u32,
    ) -> Result<Self> {
        let blocks = MetaStore::open(store_path)?;
        Ok(Self {
            blocks,
            open_containers: Mutex::new(HashMap::new()),
            container_manager,
            node_manager,
            replication_type,
            factor,
            deleted_blocks: Mutex::new(DeletedBlockLog {
                next_tx_id: 1,
                transactions: Vec::new(),
            }),
            deletion_max_retry,
        })
    }

    /// Allocate a block of `size` bytes.
    ///
    /// Picks any open container with room; otherwise creates one and flags
    /// `create_container` so the caller initializes it on the datanodes.
    pub fn allocate_block(&self, size: u64) -> Result<AllocatedBlock> {
        if size == 0 {
            return Err(Error::invalid_argument("block size must be positive"));
        }
        if size > self.container_manager.container_size() {
            return Err(Error::invalid_argument(format!(
                "block size {size} exceeds container size {}",
                self.container_manager.container_size()
            )));
        }

        let (container_name, pipeline, created) = self.pick_or_create_container(size)?;

        let block_key = Self::new_block_key();
        let mut db_key = BLOCK_PREFIX.to_vec();
        db_key.extend_from_slice(block_key.as_bytes());
        self.blocks.put(&db_key, container_name.as_bytes())?;

        debug!(
            block = %block_key,
            container = %container_name,
            created,
            "allocated block"
        );
        Ok(AllocatedBlock {
            key: block_key,
            pipeline,
            create_container: created,
        })
    }

    /// Choose an open container with at least `size` bytes free, creating a
    /// new one when none fits. The open-container lock is held only for the
    /// pick-or-create step.
    fn pick_or_create_container(&self, size: u64) -> Result<(String, Pipeline, bool)> {
        let mut open = self.open_containers.lock();
        let entry = open
            .entry((self.replication_type, self.factor))
            .or_default();

        // Drop containers that vanished or filled up while scanning.
        let mut chosen = None;
        entry.retain(|name| {
            if chosen.is_some() {
                return true;
            }
            match self.container_manager.remaining_space(name) {
                Ok(remaining) if remaining >= size => {
                    chosen = Some(name.clone());
                    true
                }
                Ok(_) => true,
                Err(_) => false,
            }
        });

        if let Some(name) = chosen {
            self.container_manager.note_block_allocated(&name, size)?;
            let pipeline = self.container_manager.get_container(&name)?;
            return Ok((name, pipeline, false));
        }

        let name = Uuid::new_v4().to_string();
        let pipeline =
            self.container_manager
                .allocate_container(&name, self.replication_type, self.factor)?;
        self.container_manager.note_block_allocated(&name, size)?;
        entry.push(name.clone());
        info!(container = %name, "created container for block allocation");
        Ok((name, pipeline, true))
    }

    fn new_block_key() -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        format!("{}:{}", nanos, Uuid::new_v4())
    }

    /// Resolve block keys to their pipelines. Unknown keys are skipped.
    pub fn get_block_locations(&self, keys: &[String]) -> Result<Vec<(String, Pipeline)>> {
        let mut located = Vec::new();
        for key in keys {
            let mut db_key = BLOCK_PREFIX.to_vec();
            db_key.extend_from_slice(key.as_bytes());
            let Some(container) = self.blocks.get(&db_key)? else {
                debug!(block = %key, "location requested for unknown block");
                continue;
            };
            let container = String::from_utf8(container)
                .map_err(|_| Error::storage("non-utf8 container name in block store"))?;
            match self.container_manager.get_container(&container) {
                Ok(pipeline) => located.push((key.clone(), pipeline)),
                Err(err) => warn!(block = %key, %err, "block maps to missing container"),
            }
        }
        Ok(located)
    }

    /// Delete blocks: unmap each key, record deletion transactions and queue
    /// delete commands toward the owning datanodes.
    pub fn delete_blocks(&self, keys: &[String]) -> Result<Vec<(String, DeleteBlockResult)>> {
        let mut results = Vec::with_capacity(keys.len());
        let mut by_container: HashMap<String, Vec<String>> = HashMap::new();

        for key in keys {
            let mut db_key = BLOCK_PREFIX.to_vec();
            db_key.extend_from_slice(key.as_bytes());
            match self.blocks.get(&db_key)? {
                None => results.push((key.clone(), DeleteBlockResult::ErrorNotFound)),
                Some(container) => {
                    let container = String::from_utf8(container)
                        .map_err(|_| Error::storage("non-utf8 container name in block store"))?;
                    self.blocks.delete(&db_key)?;
                    by_container.entry(container).or_default().push(key.clone());
                    results.push((key.clone(), DeleteBlockResult::Success));
                }
            }
        }

        for (container, blocks) in by_container {
            let tx = {
                let mut log = self.deleted_blocks.lock();
                let tx = DeletedBlocksTransaction {
                    tx_id: log.next_tx_id,
                    container_name: container.clone(),
                    blocks,
                    count: 0,
                };
                log.next_tx_id += 1;
                log.transactions.push(tx.clone());
                tx
            };
            match self.container_manager.get_container(&container) {
                Ok(pipeline) => {
                    for member in &pipeline.members {
                        self.node_manager
                            .queue_command(member.uuid, ScmCommand::DeleteBlocks(vec![tx.clone()]));
                    }
                }
                Err(err) => {
                    warn!(container = %container, %err, "cannot route deletion transaction")
                }
            }
        }
        Ok(results)
    }

    /// Re-drive pending deletion transactions, dropping those past the retry
    /// cap. Called from the SCM background loop.
    pub fn retry_pending_deletes(&self) {
        let max_retry = self.deletion_max_retry as i32;
        let mut log = self.deleted_blocks.lock();
        let mut kept = Vec::with_capacity(log.transactions.len());
        for mut tx in log.transactions.drain(..) {
            tx.count += 1;
            if tx.count > max_retry {
                warn!(
                    tx_id = tx.tx_id,
                    container = %tx.container_name,
                    "dropping deletion transaction past retry cap"
                );
                continue;
            }
            if let Ok(pipeline) = self.container_manager.get_container(&tx.container_name) {
                for member in &pipeline.members {
                    self.node_manager
                        .queue_command(member.uuid, ScmCommand::DeleteBlocks(vec![tx.clone()]));
                }
            }
            kept.push(tx);
        }
        log.transactions = kept;
    }

    /// Number of deletion transactions still pending.
    pub fn pending_delete_count(&self) -> usize {
        self.deleted_blocks.lock().transactions.len()
    }

    /// Map namespace keys onto containers, assigning each unmapped key to an
    /// open container (creating one if needed).
    pub fn get_key_locations(&self, keys: &[String]) -> Result<Vec<LocatedContainer>> {
        let mut located = Vec::new();
        for key in keys {
            let mut db_key = KEY_PREFIX.to_vec();
            db_key.extend_from_slice(key.as_bytes());
            let container_name = match self.blocks.get(&db_key)? {
                Some(bytes) => String::from_utf8(bytes)
                    .map_err(|_| Error::storage("non-utf8 container name in key store"))?,
                None => {
                    let (name, _, _) = self.pick_or_create_container(0)?;
                    self.blocks.put(&db_key, name.as_bytes())?;
                    name
                }
            };
            let pipeline = self.container_manager.get_container(&container_name)?;
            located.push(LocatedContainer {
                key: key.clone(),
                matched_key_prefix: key.clone(),
                container_name,
                pipeline,
            });
        }
        Ok(located)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_manager::NodeManagerConfig;
    use crate::placement::PlacementPolicy;
    use ozone_common::{DatanodeDetails, NodeStat};
    use std::time::Duration;
    use tempfile::tempdir;

    const CONTAINER_SIZE: u64 = 1024 * 1024;

    fn cluster(dir: &tempfile::TempDir, nodes: usize) -> (Arc<NodeManager>, BlockManager) {
        let node_manager = Arc::new(NodeManager::new(NodeManagerConfig {
            cluster_id: "test".to_string(),
            stale_interval: Duration::from_secs(90),
            dead_interval: Duration::from_secs(300),
        }));
        for i in 0..nodes {
            node_manager
                .register(
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
        let container_manager = Arc::new(
            ContainerManager::new(
                dir.path().join("containers.db"),
                PlacementPolicy::Random,
                CONTAINER_SIZE,
                Arc::clone(&node_manager),
            )
            .unwrap(),
        );
        let block_manager = BlockManager::new(
            dir.path().join("blocks.db"),
            container_manager,
            Arc::clone(&node_manager),
            ReplicationType::Standalone,
            ReplicationFactor::One,
            4,
        )
        .unwrap();
        (node_manager, block_manager)
    }

    #[test]
    fn test_first_allocation_creates_container() {
        let dir = tempdir().unwrap();
        let (_, blocks) = cluster(&dir, 1);

        let block = blocks.allocate_block(4096).unwrap();
        assert!(block.create_container);
        assert!(block.key.contains(':'));
    }

    #[test]
    fn test_second_allocation_reuses_open_container() {
        let dir = tempdir().unwrap();
        let (_, blocks) = cluster(&dir, 1);

        let first = blocks.allocate_block(4096).unwrap();
        let second = blocks.allocate_block(4096).unwrap();
        assert!(!second.create_container);
        assert_eq!(
            first.pipeline.container_name,
            second.pipeline.container_name
        );
        assert_ne!(first.key, second.key);
    }

    #[test]
    fn test_full_container_rolls_over() {
        let dir = tempdir().unwrap();
        let (_, blocks) = cluster(&dir, 1);

        let first = blocks.allocate_block(CONTAINER_SIZE).unwrap();
        let second = blocks.allocate_block(4096).unwrap();
        assert!(second.create_container);
        assert_ne!(
            first.pipeline.container_name,
            second.pipeline.container_name
        );
    }

    #[test]
    fn test_oversized_block_rejected() {
        let dir = tempdir().unwrap();
        let (_, blocks) = cluster(&dir, 1);
        assert!(blocks.allocate_block(CONTAINER_SIZE + 1).is_err());
        assert!(blocks.allocate_block(0).is_err());
    }

    #[test]
    fn test_allocation_fails_without_nodes() {
        let dir = tempdir().unwrap();
        let (_, blocks) = cluster(&dir, 0);
        assert!(matches!(
            blocks.allocate_block(4096),
            Err(Error::InsufficientNodes { .. })
        ));
    }

    #[test]
    fn test_block_locations() {
        let dir = tempdir().unwrap();
        let (_, blocks) = cluster(&dir, 1);

        let block = blocks.allocate_block(4096).unwrap();
        let located = blocks
            .get_block_locations(&[block.key.clone(), "missing".to_string()])
            .unwrap();
        assert_eq!(located.len(), 1);
        assert_eq!(located[0].0, block.key);
        assert_eq!(
            located[0].1.container_name,
            block.pipeline.container_name
        );
    }

    #[test]
    fn test_delete_blocks_queues_commands() {
        let dir = tempdir().unwrap();
        let (node_manager, blocks) = cluster(&dir, 1);

        let block = blocks.allocate_block(4096).unwrap();
        let member = block.pipeline.members[0].uuid;

        let results = blocks
            .delete_blocks(&[block.key.clone(), "missing".to_string()])
            .unwrap();
        assert_eq!(
            results,
            vec![
                (block.key.clone(), DeleteBlockResult::Success),
                ("missing".to_string(), DeleteBlockResult::ErrorNotFound),
            ]
        );

        let commands = node_manager.send_heartbeat(member, None);
        assert_eq!(commands.len(), 1);
        assert!(matches!(&commands[0], ScmCommand::DeleteBlocks(txs)
            if txs[0].blocks == vec![block.key.clone()]));

        // Deleted blocks no longer resolve.
        assert!(blocks.get_block_locations(&[block.key]).unwrap().is_empty());
    }

    #[test]
    fn test_deletion_retry_cap() {
        let dir = tempdir().unwrap();
        let (_, blocks) = cluster(&dir, 1);

        let block = blocks.allocate_block(4096).unwrap();
        blocks.delete_blocks(&[block.key]).unwrap();
        assert_eq!(blocks.pending_delete_count(), 1);

        for _ in 0..4 {
            blocks.retry_pending_deletes();
            assert_eq!(blocks.pending_delete_count(), 1);
        }
        // The fifth retry crosses the cap of 4 and drops the transaction.
        blocks.retry_pending_deletes();
        assert_eq!(blocks.pending_delete_count(), 0);
    }

    #[test]
    fn test_key_locations_are_stable() {
        let dir = tempdir().unwrap();
        let (_, blocks) = cluster(&dir, 1);

        let keys = vec!["/v1/b1/k1".to_string()];
        let first = blocks.get_key_locations(&keys).unwrap();
        let second = blocks.get_key_locations(&keys).unwrap();
        assert_eq!(first[0].container_name, second[0].container_name);
        assert_eq!(first[0].key, "/v1/b1/k1");
    }
}
