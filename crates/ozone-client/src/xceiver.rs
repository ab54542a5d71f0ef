//! Connection to a pipeline leader.

use ozone_common::{Error, Pipeline, Result};
use ozone_proto::container::{
    xceiver_client_protocol_service_client::XceiverClientProtocolServiceClient,
    ContainerCommandRequestProto, ContainerCommandResponseProto, Type,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

const TYPE_COUNT: usize = 11;

/// Pending- and total-operation counters per container command type.
///
/// Pending counts go up when a command is issued and come back down on
/// completion or failure, so a stuck pipeline is visible.
#[derive(Debug, Default)]
pub struct XceiverClientMetrics {
    pending: [AtomicU64; TYPE_COUNT],
    total: [AtomicU64; TYPE_COUNT],
}

impl XceiverClientMetrics {
    fn begin(&self, cmd_type: Type) {
        self.pending[cmd_type as usize].fetch_add(1, Ordering::Relaxed);
        self.total[cmd_type as usize].fetch_add(1, Ordering::Relaxed);
    }

    fn end(&self, cmd_type: Type) {
        self.pending[cmd_type as usize].fetch_sub(1, Ordering::Relaxed);
    }

    pub fn pending_ops(&self, cmd_type: Type) -> u64 {
        self.pending[cmd_type as usize].load(Ordering::Relaxed)
    }

    pub fn total_ops(&self, cmd_type: Type) -> u64 {
        self.total[cmd_type as usize].load(Ordering::Relaxed)
    }
}

/// One logical connection to the leader of a pipeline.
pub struct XceiverClient {
    pipeline: Pipeline,
    client: XceiverClientProtocolServiceClient<Channel>,
    metrics: Arc<XceiverClientMetrics>,
}

impl XceiverClient {
    /// Connect to the pipeline leader. Blocks on the TCP connect.
    pub async fn connect(
        pipeline: Pipeline,
        metrics: Arc<XceiverClientMetrics>,
        rpc_timeout: Duration,
    ) -> Result<Self> {
        let leader = pipeline
            .leader()
            .ok_or_else(|| Error::invalid_argument("pipeline has no leader"))?;
        let uri = format!("http://{}:{}", leader.ip_address, leader.container_port);
        debug!(container = %pipeline.container_name, %uri, "connecting to pipeline leader");
        let channel = Endpoint::from_shared(uri)
            .map_err(|e| Error::rpc(e.to_string()))?
            .timeout(rpc_timeout)
            .connect()
            .await
            .map_err(|e| Error::rpc(format!("connect to leader failed: {e}")))?;
        Ok(Self {
            pipeline,
            client: XceiverClientProtocolServiceClient::new(channel),
            metrics,
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn metrics(&self) -> &Arc<XceiverClientMetrics> {
        &self.metrics
    }

    /// Issue one container command and wait for its response envelope.
    pub async fn send_command(
        &self,
        request: ContainerCommandRequestProto,
    ) -> Result<ContainerCommandResponseProto> {
        let cmd_type = Type::try_from(request.cmd_type).unwrap_or(Type::InvalidCommand);
        self.metrics.begin(cmd_type);
        let result = self.client.clone().send(request).await;
        self.metrics.end(cmd_type);
        result
            .map(tonic::Response::into_inner)
            .map_err(|status| Error::rpc(status.to_string()))
    }

    /// Issue a command without waiting; the returned handle resolves to the
    /// response. The pending count drops when the command settles either way.
    pub fn send_command_async(
        &self,
        request: ContainerCommandRequestProto,
    ) -> tokio::task::JoinHandle<Result<ContainerCommandResponseProto>> {
        let cmd_type = Type::try_from(request.cmd_type).unwrap_or(Type::InvalidCommand);
        let mut client = self.client.clone();
        let metrics = Arc::clone(&self.metrics);
        metrics.begin(cmd_type);
        tokio::spawn(async move {
            let result = client.send(request).await;
            metrics.end(cmd_type);
            result
                .map(tonic::Response::into_inner)
                .map_err(|status| Error::rpc(status.to_string()))
        })
    }
}
