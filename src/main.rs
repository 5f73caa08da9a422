//! Inspection and maintenance commands for a running cluster.
//!
//! Pods are read from a `kubectl get pods -o json` snapshot; node health
//! and membership are queried live through `redis-cli`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use redis_operator::observability::{init_logging, LogConfig};
use redis_operator::platform::{RedisCluster, SnapshotPlatform};
use redis_operator::rediscli::RedisCli;
use redis_operator::{ClusterOperator, OperatorConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Redis cluster operator tooling
#[derive(Parser)]
#[command(name = "redis-operator")]
#[command(version)]
#[command(about = "Inspect and maintain a leader/follower Redis cluster", long_about = None)]
struct Cli {
    /// Path to the operator configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cluster view and whether it is complete
    View {
        #[command(flatten)]
        source: Source,
    },

    /// Forget members that no longer back a healthy pod
    Cleanup {
        #[command(flatten)]
        source: Source,
    },
}

#[derive(clap::Args)]
struct Source {
    /// RedisCluster resource (JSON)
    #[arg(long)]
    cluster: PathBuf,

    /// Pod list snapshot (JSON)
    #[arg(long)]
    pods: PathBuf,
}

fn load_cluster(path: &Path) -> Result<RedisCluster> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid cluster resource {}", path.display()))
}

fn operator(config: Arc<OperatorConfig>, source: &Source) -> Result<ClusterOperator> {
    let cluster = load_cluster(&source.cluster)?;
    let platform = SnapshotPlatform::load(&source.pods)
        .with_context(|| format!("invalid pod list {}", source.pods.display()))?;
    let commands = RedisCli::new(&config.redis);
    Ok(ClusterOperator::new(
        cluster,
        Arc::new(commands),
        Arc::new(platform),
        config,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => OperatorConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => OperatorConfig::default(),
    };
    init_logging(&LogConfig::from_section(&config.logging)?)?;
    let config = Arc::new(config);

    match cli.command {
        Commands::View { source } => {
            let operator = operator(config, &source)?;
            let view = operator.cluster_view().await?;
            println!("{}", view);
            println!("complete: {}", view.is_complete());
            println!("up to date: {}", operator.is_cluster_up_to_date().await?);
        }
        Commands::Cleanup { source } => {
            let operator = operator(config, &source)?;
            operator.forget_lost_nodes().await?;
            info!(cluster = %operator.cluster().name(), "node tables cleaned up");
        }
    }
    Ok(())
}
