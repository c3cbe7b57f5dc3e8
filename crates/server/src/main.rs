//! Standalone cache monitoring server
//!
//! This process owns its own near cache, so its hit/miss counters only
//! describe requests served here. The distributed tier fields (`redis`) and
//! the `clear`/`DELETE` actions act on the shared tier every service uses.
//! Applications that want their own counters mount
//! [`cache_router`](tierstore_server::cache_router) over their service's cache.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tierstore_cache::CacheStore;
use tierstore_config::{StorageConfig, StorageConfigLoader};
use tierstore_server::cache_router;
use tierstore_storage::build_cache;
use tracing::{info, Level};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "tierstore cache monitoring server",
    long_about = "tierstore cache monitoring server\n\n\
        Reports and clears the shared distributed cache tier of one service \
        namespace. Near-cache hit/miss counters describe this process only; \
        mount `cache_router` inside an application to see its own counters."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON config file (defaults to $TIERSTORE_CONFIG or the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Service namespace whose caches are monitored
    #[arg(short, long, global = true, default_value = "default")]
    service: String,

    /// Log level, used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the /cache monitoring endpoint
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        address: SocketAddr,
    },
    /// Print one statistics snapshot as JSON and exit
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(cli.log_level).into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(true),
        )
        .with(filter)
        .init();

    let config = load_config(&cli)?;
    let cache: Arc<dyn CacheStore> = Arc::new(build_cache(&config).await);

    match cli.command {
        Command::Serve { address } => serve(address, &config, cache).await,
        Command::Stats => {
            let stats = cache.stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<StorageConfig> {
    let mut loader = StorageConfigLoader::new(&cli.service);
    if let Some(path) = &cli.config {
        loader = loader.with_config_file(path);
    }
    loader
        .load()
        .with_context(|| format!("failed to load configuration for service '{}'", cli.service))
}

async fn serve(address: SocketAddr, config: &StorageConfig, cache: Arc<dyn CacheStore>) -> Result<()> {
    info!(
        service = %config.service_name,
        source = ?config.source,
        distributed = config.redis_url.is_some(),
        "starting tierstore monitoring server on {address}"
    );

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    axum::serve(listener, cache_router(cache))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("monitoring server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
