//! Ozone Key-Space Manager daemon.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use ozone_client::StorageContainerLocationClient;
use ozone_common::config::ScmConfig;
use ozone_common::AllocatedBlock;
use ozone_ksm::{
    BucketManager, KeyManager, KeySpaceManagerService, KsmMetrics, MetadataManager,
    ScmBlockClient, VolumeManager,
};
use ozone_proto::ksm::key_space_manager_service_server::KeySpaceManagerServiceServer;
use std::path::PathBuf;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ozone-ksm")]
#[command(about = "Ozone Key-Space Manager")]
#[command(version)]
struct Args {
    /// Listen address for the KSM protocol
    #[arg(short, long, default_value = "127.0.0.1:9862")]
    listen: String,

    /// Directory for the KSM metadata store
    #[arg(long, default_value = "/var/lib/ozone/ksm")]
    data_dir: PathBuf,

    /// SCM client address for block allocation
    #[arg(long, default_value = "127.0.0.1:9860")]
    scm: String,

    /// RPC handler thread count
    #[arg(long, default_value = "20")]
    handler_count: usize,

    /// Maximum volumes a single user may own
    #[arg(long, default_value = "1024")]
    max_user_volumes: usize,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// SCM access over gRPC for the key manager.
struct GrpcScmBlockClient {
    location: StorageContainerLocationClient,
}

#[async_trait]
impl ScmBlockClient for GrpcScmBlockClient {
    async fn allocate_block(&self, size: u64) -> ozone_common::Result<AllocatedBlock> {
        self.location.allocate_scm_block(size).await
    }

    async fn delete_blocks(&self, keys: Vec<String>) -> ozone_common::Result<()> {
        self.location.delete_scm_blocks(keys).await?;
        Ok(())
    }

    async fn delete_container(&self, name: &str) -> ozone_common::Result<()> {
        self.location.delete_container(name).await
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    // The handler count sizes the RPC worker pool.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.handler_count.max(1))
        .enable_all()
        .build()?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Ozone Key-Space Manager");

    std::fs::create_dir_all(&args.data_dir)?;
    let metadata = Arc::new(MetadataManager::open(args.data_dir.join("ksm.db"))?);

    let scm_config = ScmConfig::default();
    let location =
        StorageContainerLocationClient::connect(&args.scm, scm_config.rpc_timeout()).await?;
    let scm_client: Arc<dyn ScmBlockClient> = Arc::new(GrpcScmBlockClient { location });
    info!(scm = %args.scm, "connected to SCM");

    let service = KeySpaceManagerService::new(
        Arc::new(VolumeManager::new(
            Arc::clone(&metadata),
            args.max_user_volumes,
        )),
        Arc::new(BucketManager::new(Arc::clone(&metadata))),
        Arc::new(KeyManager::new(metadata, scm_client)),
        Arc::new(KsmMetrics::new()),
    );

    let addr = args.listen.parse()?;
    info!("Starting KSM RPC server on {addr}");
    Server::builder()
        .add_service(KeySpaceManagerServiceServer::new(service))
        .serve_with_shutdown(addr, async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    info!("Key-Space Manager shut down gracefully");
    Ok(())
}
