//! fetch CLI - run the caching file server
//!
//! Usage:
//!   fetch serve [--config <path>]     Serve files through the cache
//!   fetch config                      Print a sample configuration

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fetch_core::{Config, OriginConfig};
use fetch_daemon::{origin, server, Cache};

#[derive(Parser)]
#[command(name = "fetch")]
#[command(about = "Disk-backed read-through file cache", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve files through the cache
    Serve {
        /// Configuration file (default: platform config dir)
        #[arg(short, long, env = "FETCH_CONFIG")]
        config: Option<PathBuf>,

        /// Bind address
        #[arg(short, long)]
        bind: Option<IpAddr>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Cache directory
        #[arg(long, env = "FETCH_CACHE_ROOT")]
        root: Option<PathBuf>,

        /// Cache capacity in bytes
        #[arg(long, env = "FETCH_CAPACITY")]
        capacity: Option<u64>,

        /// Serve from a local directory
        #[arg(long, conflicts_with = "s3_bucket")]
        origin_dir: Option<PathBuf>,

        /// Serve from an S3 bucket
        #[arg(long, env = "FETCH_S3_BUCKET")]
        s3_bucket: Option<String>,

        /// S3 region
        #[arg(long, requires = "s3_bucket")]
        s3_region: Option<String>,

        /// Custom S3 endpoint (MinIO, R2, ...)
        #[arg(long, requires = "s3_bucket")]
        s3_endpoint: Option<String>,
    },

    /// Print a sample configuration file
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            port,
            root,
            capacity,
            origin_dir,
            s3_bucket,
            s3_region,
            s3_endpoint,
        } => {
            let mut config = match config {
                Some(path) => Config::load_from(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?,
                None => Config::load(),
            };

            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if root.is_some() {
                config.cache.root = root;
            }
            if let Some(capacity) = capacity {
                config.cache.capacity_bytes = capacity;
            }
            if let Some(path) = origin_dir {
                config.origin = OriginConfig::Dir { path };
            }
            if let Some(bucket) = s3_bucket {
                config.origin = OriginConfig::S3 {
                    bucket,
                    region: s3_region,
                    endpoint: s3_endpoint.clone(),
                    force_path_style: s3_endpoint.is_some(),
                    timeout_secs: 0,
                };
            }

            run_serve(config).await?;
        }
        Commands::Config => {
            print!("{}", Config::sample());
        }
    }

    Ok(())
}

async fn run_serve(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let root = config.cache_root();
    let origin = origin::from_config(&config.origin)
        .await
        .context("failed to set up origin")?;

    info!("Starting fetch cache...");
    info!("  Cache root: {:?}", root);
    info!("  Capacity: {} bytes", config.cache.capacity_bytes);
    info!("  Shards: {}", config.cache.shards);

    let (cache, workers) = Cache::from_config(&config.cache, &root, origin)?;

    let result = server::serve(config.server.socket_addr(), cache.clone()).await;

    info!("Shutting down...");
    cache.shutdown();
    tokio::task::spawn_blocking(move || {
        for worker in workers {
            let _ = worker.join();
        }
    })
    .await?;

    result
}
