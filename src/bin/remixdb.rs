//! remixdb server entrypoint

use clap::Parser;
use remixdb::common::config::{Config, DEFAULT_CACHE_BYTES, DEFAULT_PORT};
use remixdb::Server;
use std::path::PathBuf;

/// Sharded document-oriented key-value database node.
#[derive(Parser)]
#[command(name = "remixdb")]
#[command(about = "remixdb database node")]
#[command(version)]
struct Cli {
    /// Port for the HTTP listener (external API and cluster RPC)
    #[arg(long, default_value_t = DEFAULT_PORT, env = "REMIXDB_PORT")]
    port: u16,

    /// Data directory
    #[arg(long, default_value = "./remixdb_data", env = "REMIXDB_DATA_DIR")]
    data_dir: PathBuf,

    /// Shared secret for intra-cluster RPC
    #[arg(long, env = "INNER_CLUSTER_TOKEN")]
    inner_cluster_token: Option<String>,

    /// URL of an existing cluster member to join through
    #[arg(long, env = "OTHER_SHARD_URL")]
    other_shard_url: Option<String>,

    /// URL peers can reach this node at
    #[arg(long, env = "THIS_SHARD_URL")]
    this_shard_url: Option<String>,

    /// Seed a full-rights capability token on first boot
    #[arg(long, env = "REMIXDB_ADMIN_TOKEN")]
    admin_token: Option<String>,

    /// Soft cap of the in-memory value cache, in bytes
    #[arg(long, default_value_t = DEFAULT_CACHE_BYTES)]
    cache_bytes: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config {
        port: cli.port,
        data_dir: cli.data_dir,
        inner_cluster_token: cli.inner_cluster_token,
        other_shard_url: cli.other_shard_url,
        this_shard_url: cli.this_shard_url,
        cache_bytes: cli.cache_bytes,
        admin_token: cli.admin_token,
    };

    tracing::info!(version = remixdb::VERSION, "starting remixdb");
    let server = Server::init(config)?;
    server.serve().await?;
    Ok(())
}
