//! Pooling of xceiver connections.
//!
//! At most one logical connection exists per pipeline leader; acquisition
//! bumps a refcount and release drops it. Idle connections linger for a
//! grace window and are evicted on the next acquire pass.

use crate::xceiver::{XceiverClient, XceiverClientMetrics};
use ozone_common::{Pipeline, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

struct PoolEntry {
    client: Arc<XceiverClient>,
    refs: usize,
    released_at: Instant,
}

pub struct XceiverClientManager {
    clients: Mutex<HashMap<Uuid, PoolEntry>>,
    metrics: Arc<XceiverClientMetrics>,
    idle_grace: Duration,
    rpc_timeout: Duration,
}

impl XceiverClientManager {
    pub fn new(idle_grace: Duration, rpc_timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            metrics: Arc::new(XceiverClientMetrics::default()),
            idle_grace,
            rpc_timeout,
        }
    }

    pub fn metrics(&self) -> &Arc<XceiverClientMetrics> {
        &self.metrics
    }

    /// Acquire the connection for a pipeline's leader, connecting if none is
    /// pooled. May block on the TCP connect.
    pub async fn acquire_client(&self, pipeline: &Pipeline) -> Result<Arc<XceiverClient>> {
        let mut clients = self.clients.lock().await;

        // Sweep idle entries past their grace window.
        let grace = self.idle_grace;
        clients.retain(|_, entry| entry.refs > 0 || entry.released_at.elapsed() <= grace);

        if let Some(entry) = clients.get_mut(&pipeline.leader_id) {
            entry.refs += 1;
            return Ok(Arc::clone(&entry.client));
        }

        let client = Arc::new(
            XceiverClient::connect(
                pipeline.clone(),
                Arc::clone(&self.metrics),
                self.rpc_timeout,
            )
            .await?,
        );
        clients.insert(
            pipeline.leader_id,
            PoolEntry {
                client: Arc::clone(&client),
                refs: 1,
                released_at: Instant::now(),
            },
        );
        debug!(leader = %pipeline.leader_id, "pooled new xceiver client");
        Ok(client)
    }

    /// Return a connection to the pool.
    pub async fn release_client(&self, client: Arc<XceiverClient>) {
        let mut clients = self.clients.lock().await;
        if let Some(entry) = clients.get_mut(&client.pipeline().leader_id) {
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs == 0 {
                entry.released_at = Instant::now();
            }
        }
    }

    /// Number of pooled connections, idle or busy.
    pub async fn pooled_count(&self) -> usize {
        self.clients.lock().await.len()
    }
}
