//! Administrative CLI: thin wrappers over SCM's container operations.
//!
//! Exits 0 on success, 1 on any error.

use anyhow::Result;
use clap::{Parser, Subcommand};
use ozone_client::{ContainerOperationClient, StorageContainerLocationClient, XceiverClientManager};
use ozone_common::config::{ClientConfig, ScmConfig};
use ozone_common::{ReplicationFactor, ReplicationType};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ozone")]
#[command(about = "Ozone administrative commands")]
#[command(version)]
struct Cli {
    /// SCM client address
    #[arg(long, default_value = "127.0.0.1:9860")]
    scm: String,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Container operations
    Container {
        #[command(subcommand)]
        command: ContainerCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ContainerCommand {
    /// Create a container
    Create {
        /// Container name
        #[arg(long)]
        name: String,

        /// Replication factor: one or three
        #[arg(long, default_value = "one")]
        factor: String,

        /// Replication type: standalone or ratis
        #[arg(long, default_value = "standalone")]
        replication: String,
    },
    /// Delete a container
    Delete {
        /// Container name
        #[arg(long)]
        name: String,
    },
    /// Show a container's pipeline
    Info {
        /// Container name
        #[arg(long)]
        name: String,
    },
}

fn parse_factor(name: &str) -> Result<ReplicationFactor> {
    match name {
        "one" => Ok(ReplicationFactor::One),
        "three" => Ok(ReplicationFactor::Three),
        other => anyhow::bail!("unknown replication factor: {other}"),
    }
}

fn parse_replication(name: &str) -> Result<ReplicationType> {
    match name {
        "standalone" => Ok(ReplicationType::Standalone),
        "ratis" => Ok(ReplicationType::Ratis),
        other => anyhow::bail!("unknown replication type: {other}"),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let scm_config = ScmConfig::default();
    let client_config = ClientConfig::default();
    let location =
        StorageContainerLocationClient::connect(&cli.scm, scm_config.rpc_timeout()).await?;
    let manager = Arc::new(XceiverClientManager::new(
        client_config.idle_grace(),
        scm_config.rpc_timeout(),
    ));
    let client = ContainerOperationClient::new(location, manager);

    match cli.command {
        Command::Container { command } => match command {
            ContainerCommand::Create {
                name,
                factor,
                replication,
            } => {
                let pipeline = client
                    .create_container(&name, parse_replication(&replication)?, parse_factor(&factor)?)
                    .await?;
                println!("created container {name}");
                for member in &pipeline.members {
                    println!("  member: {member}");
                }
            }
            ContainerCommand::Delete { name } => {
                client.delete_container(&name).await?;
                println!("deleted container {name}");
            }
            ContainerCommand::Info { name } => {
                let pipeline = client.get_container(&name).await?;
                println!("container: {name}");
                println!("  leader: {}", pipeline.leader_id);
                println!("  replication: {} / {}", pipeline.replication_type, pipeline.factor);
                for member in &pipeline.members {
                    println!("  member: {member}");
                }
            }
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
