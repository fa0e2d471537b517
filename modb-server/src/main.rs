//! MODB Server - HTTP API for the multi-tenant key-value store

mod api;
mod protocol;

use clap::{Parser, ValueEnum};
use modb_core::journal::{JournalConfig, SyncPolicy};
use modb_core::{StorageConfig, TenantRegistry};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SyncMode {
    /// fsync after every write
    Always,
    /// fsync on a timer
    Interval,
    /// Leave flushing to the OS
    Never,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "modb")]
#[command(author, version, about = "MODB HTTP server", long_about = None)]
struct Args {
    /// HTTP listen address
    #[arg(long, env = "MODB_HTTP_ADDR", default_value = "0.0.0.0:8086")]
    http_addr: SocketAddr,

    /// Root data directory
    #[arg(long, env = "MODB_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Key granting access to the tenant administration endpoints
    #[arg(long, env = "MODB_ADMIN_KEY", hide_env_values = true)]
    admin_key: String,

    /// Journal manifests for new databases
    #[arg(long, env = "MODB_MANIFESTS", default_value_t = modb_core::config::DEFAULT_MANIFESTS)]
    manifests: usize,

    /// Journal segment size in bytes
    #[arg(long, env = "MODB_SEGMENT_SIZE", default_value_t = modb_core::config::SEGMENT_SIZE)]
    segment_size: usize,

    /// Journal sync mode
    #[arg(long, env = "MODB_SYNC", value_enum, default_value = "always")]
    sync: SyncMode,

    /// Sync period for `--sync interval`
    #[arg(long, env = "MODB_SYNC_INTERVAL_MS", default_value = "1000")]
    sync_interval_ms: u64,

    #[arg(long, env = "MODB_LOG_FORMAT", value_enum, default_value = "pretty")]
    log_format: LogFormat,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Storage settings
    pub storage: StorageConfig,
    pub admin_key: String,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        let sync_policy = match args.sync {
            SyncMode::Always => SyncPolicy::Immediate,
            SyncMode::Interval => SyncPolicy::Interval {
                millis: args.sync_interval_ms,
            },
            SyncMode::Never => SyncPolicy::None,
        };

        let storage = StorageConfig {
            journal: JournalConfig {
                sync_policy,
                segment_size: args.segment_size,
                ..JournalConfig::default()
            },
            default_manifests: args.manifests,
            ..StorageConfig::new(args.data_dir)
        };

        Self {
            http_addr: args.http_addr,
            storage,
            admin_key: args.admin_key,
        }
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_format);

    let config = ServerConfig::from(args);
    if config.admin_key.is_empty() {
        anyhow::bail!("admin key must not be empty");
    }
    config.storage.validate()?;

    info!("Starting MODB server...");
    info!(data_dir = %config.storage.data_dir.display(), "Opening tenant registry");

    // Opening walks every tenant collection and replays its journals
    let registry = TenantRegistry::open(config.storage.clone())?;
    info!(tenants = registry.len(), "Tenant registry ready");

    let app = api::create_router(api::AppState::new(registry, config.admin_key.as_str()));

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!("MODB server listening on {}", config.http_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
