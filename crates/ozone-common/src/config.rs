//! Configuration types for the Ozone core.
//!
//! Defaults carry the documented values; daemons override individual fields
//! from flags or a config file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration shared by all Ozone components
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OzoneConfig {
    /// SCM configuration
    pub scm: ScmConfig,
    /// KSM configuration
    pub ksm: KsmConfig,
    /// Datanode configuration
    pub datanode: DatanodeConfig,
    /// Container client configuration
    pub client: ClientConfig,
}

/// Storage Container Manager configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScmConfig {
    /// Client-facing RPC address
    pub address: String,
    /// Datanode-facing RPC address
    pub datanode_address: String,
    /// Size of a storage container in bytes
    pub container_size: u64,
    /// Chunk size used by clients writing through pipelines
    pub chunk_size: u64,
    /// Hard cap on the chunk size; larger configured values are clamped
    pub chunk_max_size: u64,
    /// Container placement policy name ("random" or "capacity")
    pub placement_impl: String,
    /// Retry cap for block deletion transactions
    pub block_deletion_max_retry: u32,
    /// Datanode heartbeat interval (milliseconds)
    pub heartbeat_interval_ms: u64,
    /// Missed-heartbeat window after which a node turns STALE (milliseconds)
    pub stale_node_interval_ms: u64,
    /// Missed-heartbeat window after which a node turns DEAD (milliseconds)
    pub dead_node_interval_ms: u64,
    /// RPC deadline (milliseconds)
    pub rpc_timeout_ms: u64,
}

impl Default for ScmConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9860".to_string(),
            datanode_address: "127.0.0.1:9861".to_string(),
            container_size: 5 * 1024 * 1024 * 1024, // 5 GiB
            chunk_size: 16 * 1024 * 1024,           // 16 MiB
            chunk_max_size: 32 * 1024 * 1024,       // 32 MiB
            placement_impl: "random".to_string(),
            block_deletion_max_retry: 4096,
            heartbeat_interval_ms: 30_000,
            stale_node_interval_ms: 90_000,
            dead_node_interval_ms: 300_000,
            rpc_timeout_ms: 15_000,
        }
    }
}

impl ScmConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn stale_node_interval(&self) -> Duration {
        Duration::from_millis(self.stale_node_interval_ms)
    }

    pub fn dead_node_interval(&self) -> Duration {
        Duration::from_millis(self.dead_node_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// The chunk size clients should use: the configured value clamped to
    /// the hard maximum.
    pub fn effective_chunk_size(&self) -> u64 {
        self.chunk_size.min(self.chunk_max_size)
    }
}

/// Key-Space Manager configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KsmConfig {
    /// Client-facing RPC address
    pub address: String,
    /// RPC handler thread count
    pub handler_count: usize,
    /// Maximum number of volumes a single user may own
    pub max_user_volumes: usize,
}

impl Default for KsmConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9862".to_string(),
            handler_count: 20,
            max_user_volumes: 1024,
        }
    }
}

/// Datanode configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatanodeConfig {
    /// Container data-plane listen address
    pub address: String,
    /// Root directory for container data
    pub data_dir: PathBuf,
    /// Capacity advertised to SCM in node reports
    pub capacity: u64,
    /// Consecutive missed heartbeats before falling back to re-registration
    pub heartbeat_max_misses: u32,
}

impl Default for DatanodeConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9859".to_string(),
            data_dir: PathBuf::from("/var/lib/ozone/containers"),
            capacity: 100 * 1024 * 1024 * 1024, // 100 GiB
            heartbeat_max_misses: 10,
        }
    }
}

/// Container client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Grace window before an idle pooled connection is closed (milliseconds)
    pub idle_grace_ms: u64,
    /// Payloads at or below this size take the single-RPC small-file path
    pub small_file_threshold: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            idle_grace_ms: 10_000,
            small_file_threshold: 1024 * 1024, // 1 MiB
        }
    }
}

impl ClientConfig {
    pub fn idle_grace(&self) -> Duration {
        Duration::from_millis(self.idle_grace_ms)
    }
}
