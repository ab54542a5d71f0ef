//! Ozone datanode daemon.
//!
//! Serves the container data plane and runs the SCM endpoint state machine.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use ozone_common::config::{DatanodeConfig, ScmConfig};
use ozone_common::DatanodeDetails;
use ozone_container::{ContainerEngine, Dispatcher, EndpointStateMachine, ScmConnection, XceiverService};
use ozone_proto::container::xceiver_client_protocol_service_server::XceiverClientProtocolServiceServer;
use ozone_proto::datanode::{
    storage_container_datanode_service_client::StorageContainerDatanodeServiceClient,
    ScmHeartbeatRequestProto, ScmHeartbeatResponseProto, ScmRegisterRequestProto,
    ScmRegisteredResponseProto, ScmVersionRequestProto, ScmVersionResponseProto,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tonic::transport::{Channel, Endpoint};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "ozone-datanode")]
#[command(about = "Ozone Datanode")]
#[command(version)]
struct Args {
    /// Listen address for the container data plane
    #[arg(short, long, default_value = "127.0.0.1:9859")]
    listen: String,

    /// SCM datanode-protocol address
    #[arg(long, default_value = "127.0.0.1:9861")]
    scm: String,

    /// Root directory for container data
    #[arg(long, default_value = "/var/lib/ozone/containers")]
    data_dir: PathBuf,

    /// Storage capacity advertised to SCM, in bytes
    #[arg(long)]
    capacity: Option<u64>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// gRPC implementation of the SCM endpoint connection.
struct GrpcScmConnection {
    client: StorageContainerDatanodeServiceClient<Channel>,
}

impl GrpcScmConnection {
    fn connect(address: &str, rpc_timeout: std::time::Duration) -> Result<Self> {
        // Lazy connect: the endpoint state machine owns retry behavior.
        let channel = Endpoint::from_shared(format!("http://{address}"))?
            .timeout(rpc_timeout)
            .connect_lazy();
        Ok(Self {
            client: StorageContainerDatanodeServiceClient::new(channel),
        })
    }
}

#[async_trait]
impl ScmConnection for GrpcScmConnection {
    async fn get_version(
        &self,
        request: ScmVersionRequestProto,
    ) -> ozone_common::Result<ScmVersionResponseProto> {
        self.client
            .clone()
            .get_version(request)
            .await
            .map(tonic::Response::into_inner)
            .map_err(|s| ozone_common::Error::rpc(s.to_string()))
    }

    async fn register(
        &self,
        request: ScmRegisterRequestProto,
    ) -> ozone_common::Result<ScmRegisteredResponseProto> {
        self.client
            .clone()
            .register(request)
            .await
            .map(tonic::Response::into_inner)
            .map_err(|s| ozone_common::Error::rpc(s.to_string()))
    }

    async fn send_heartbeat(
        &self,
        request: ScmHeartbeatRequestProto,
    ) -> ozone_common::Result<ScmHeartbeatResponseProto> {
        self.client
            .clone()
            .send_heartbeat(request)
            .await
            .map(tonic::Response::into_inner)
            .map_err(|s| ozone_common::Error::rpc(s.to_string()))
    }
}

/// Load or mint this datanode's stable identity.
fn datanode_id(data_dir: &Path) -> Result<Uuid> {
    let id_file = data_dir.join("datanode.id");
    if id_file.exists() {
        let text = std::fs::read_to_string(&id_file)?;
        return Ok(Uuid::parse_str(text.trim())?);
    }
    let uuid = Uuid::new_v4();
    std::fs::write(&id_file, uuid.to_string())?;
    Ok(uuid)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Ozone Datanode");

    let scm_config = ScmConfig::default();
    let datanode_config = DatanodeConfig::default();
    std::fs::create_dir_all(&args.data_dir)?;

    let addr: SocketAddr = args.listen.parse()?;
    let uuid = datanode_id(&args.data_dir)?;
    let details = DatanodeDetails {
        uuid,
        hostname: hostname(),
        ip_address: addr.ip().to_string(),
        container_port: addr.port(),
    };
    info!(datanode = %details.uuid, "datanode identity loaded");

    let engine = Arc::new(ContainerEngine::new(
        &args.data_dir,
        args.capacity.unwrap_or(datanode_config.capacity),
    )?);
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&engine)));

    let connection = Arc::new(GrpcScmConnection::connect(
        &args.scm,
        scm_config.rpc_timeout(),
    )?);
    let machine = Arc::new(EndpointStateMachine::new(
        connection,
        Arc::clone(&engine),
        details,
        scm_config.heartbeat_interval(),
        datanode_config.heartbeat_max_misses,
    ));
    {
        let machine = Arc::clone(&machine);
        tokio::spawn(async move { machine.run().await });
    }
    // Drain SCM commands delivered on heartbeats.
    {
        let machine = Arc::clone(&machine);
        let interval = scm_config.heartbeat_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for command in machine.take_commands() {
                    info!(command_type = command.command_type, "received SCM command");
                }
            }
        });
    }
    info!(scm = %args.scm, "endpoint state machine started");

    info!("Starting container RPC server on {addr}");
    tonic::transport::Server::builder()
        .add_service(XceiverClientProtocolServiceServer::new(XceiverService::new(
            dispatcher,
        )))
        .serve_with_shutdown(addr, async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    machine.stop();
    info!("Datanode shut down gracefully");
    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
