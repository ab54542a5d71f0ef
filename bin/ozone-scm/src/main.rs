//! Ozone Storage Container Manager daemon.
//!
//! Serves the client-facing location protocol and the datanode protocol on
//! separate addresses and runs the liveness sweeper in the background.

use anyhow::Result;
use clap::Parser;
use ozone_common::config::ScmConfig;
use ozone_common::{ReplicationFactor, ReplicationType};
use ozone_proto::datanode::storage_container_datanode_service_server::StorageContainerDatanodeServiceServer;
use ozone_proto::scm::storage_container_location_service_server::StorageContainerLocationServiceServer;
use ozone_scm::node_manager::NodeManagerConfig;
use ozone_scm::{
    BlockManager, ContainerManager, NodeManager, PlacementPolicy, ScmDatanodeService,
    ScmLocationService,
};
use std::path::PathBuf;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ozone-scm")]
#[command(about = "Ozone Storage Container Manager")]
#[command(version)]
struct Args {
    /// Listen address for the client-facing location protocol
    #[arg(short, long, default_value = "127.0.0.1:9860")]
    listen: String,

    /// Listen address for the datanode protocol
    #[arg(long, default_value = "127.0.0.1:9861")]
    datanode_listen: String,

    /// Directory for SCM metadata stores
    #[arg(long, default_value = "/var/lib/ozone/scm")]
    data_dir: PathBuf,

    /// Cluster ID handed to registering datanodes (random if not set)
    #[arg(long)]
    cluster_id: Option<String>,

    /// Container placement policy ("random" or "capacity")
    #[arg(long, default_value = "random")]
    placement: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
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

    info!("Starting Ozone Storage Container Manager");

    let config = ScmConfig::default();
    let cluster_id = args
        .cluster_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    std::fs::create_dir_all(&args.data_dir)?;

    let node_manager = Arc::new(NodeManager::new(NodeManagerConfig {
        cluster_id: cluster_id.clone(),
        stale_interval: config.stale_node_interval(),
        dead_interval: config.dead_node_interval(),
    }));
    let container_manager = Arc::new(ContainerManager::new(
        args.data_dir.join("scm-containers.db"),
        PlacementPolicy::from_name(&args.placement)?,
        config.container_size,
        Arc::clone(&node_manager),
    )?);
    let block_manager = Arc::new(BlockManager::new(
        args.data_dir.join("scm-blocks.db"),
        Arc::clone(&container_manager),
        Arc::clone(&node_manager),
        ReplicationType::Standalone,
        ReplicationFactor::One,
        config.block_deletion_max_retry,
    )?);

    info!(cluster = %cluster_id, "SCM state initialized");

    // Liveness sweep and deletion retry run on the heartbeat cadence.
    {
        let node_manager = Arc::clone(&node_manager);
        let block_manager = Arc::clone(&block_manager);
        let sweep_interval = config.heartbeat_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            let mut sweeps: u64 = 0;
            loop {
                ticker.tick().await;
                node_manager.sweep();
                sweeps += 1;
                if sweeps % 10 == 0 {
                    block_manager.retry_pending_deletes();
                }
            }
        });
    }

    let datanode_service = ScmDatanodeService::new(
        Arc::clone(&node_manager),
        Arc::clone(&container_manager),
    );
    let datanode_addr = args.datanode_listen.parse()?;
    info!("Starting datanode RPC server on {datanode_addr}");
    tokio::spawn(
        Server::builder()
            .add_service(StorageContainerDatanodeServiceServer::new(datanode_service))
            .serve(datanode_addr),
    );

    let location_service =
        ScmLocationService::new(container_manager, block_manager, node_manager);
    let addr = args.listen.parse()?;
    info!("Starting client RPC server on {addr}");
    Server::builder()
        .add_service(StorageContainerLocationServiceServer::new(location_service))
        .serve_with_shutdown(addr, async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    info!("Storage Container Manager shut down gracefully");
    Ok(())
}
