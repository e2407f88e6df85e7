//! Mapper Engine Daemon
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! mapper-engine
//!
//! # Start with custom config
//! mapper-engine --config /path/to/config.toml
//!
//! # Start with custom HTTP port and storage directory
//! mapper-engine --http-port 8091 --storage-dir /data/mapper
//! ```
//!
//! Set `RUST_LOG` to change verbosity, e.g. `RUST_LOG=mapper_engine=debug`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mapper_engine::services::events::spawn_logging_listener;
use mapper_engine::{jobs, Config, Engine, HttpServer, MapperDb};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mapper-engine")]
#[command(about = "Territory assignment and aggregation engine")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "MAPPER_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory for the database and config
    #[arg(long, env = "MAPPER_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "MAPPER_HTTP_PORT")]
    http_port: Option<u16>,

    /// Disable the scheduled jobs regardless of config
    #[arg(long)]
    no_jobs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("mapper_engine=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }

    config.validate()?;

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        "Starting mapper-engine"
    );

    // Ensure storage directory exists
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(MapperDb::open(&config.database_path(), config.pool_size)?);
    let engine = Arc::new(Engine::new(db));
    let _listener = spawn_logging_listener(engine.events.clone());

    let job_handles = if args.no_jobs {
        info!("Scheduled jobs disabled via --no-jobs");
        Vec::new()
    } else {
        jobs::spawn_jobs(engine.clone(), &config.jobs)
    };

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let http_server = Arc::new(HttpServer::new(engine.clone(), http_addr));
    info!("HTTP API available at http://{}", http_addr);

    info!("Press Ctrl+C to stop.");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    for handle in job_handles {
        handle.abort();
    }

    let stale = engine.aggregation.stale().len();
    if stale > 0 {
        info!(stale, "Exiting with stale aggregate views; the next sweep will refresh them");
    }

    Ok(())
}
