/*
spectroscope - single-binary main.rs
Starts the Rocket HTTP server for balanced news aggregation.
*/

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use common::{init_db_pool, Config, ServerConfig};

use spectroscope::aggregator::Aggregator;
use spectroscope::server::launch_rocket;
use spectroscope::storage;

#[derive(Parser, Debug)]
#[command(name = "spectroscope", about = "Balanced news aggregation server")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the bind address from config
    #[arg(long)]
    address: Option<String>,

    /// Override the bind port from config
    #[arg(long)]
    port: Option<u16>,

    /// Override the sqlite database path from config
    #[arg(long, value_name = "FILE")]
    db: Option<String>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Shipped defaults, optionally overridden by config.toml (or --config)
    let default_path = PathBuf::from("config.default.toml");
    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            anyhow::bail!("config file not found: {}", p.display());
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let mut config = Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await?;
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    if let Some(db_path) = args.db {
        config.database.path = db_path;
    }
    if args.address.is_some() || args.port.is_some() {
        let server_cfg = config.server.get_or_insert_with(ServerConfig::default);
        if let Some(address) = args.address {
            server_cfg.address = Some(address);
        }
        if let Some(port) = args.port {
            server_cfg.port = Some(port);
        }
    }

    info!(db_path = %config.database.path, "initializing database");
    let db_pool = init_db_pool(&config.database.path).await?;
    storage::ensure_schema(&db_pool).await?;

    let aggregator = Arc::new(Aggregator::new(&config, db_pool)?);

    info!("launching Rocket HTTP server");
    if let Err(e) = launch_rocket(aggregator, &config).await {
        error!(%e, "Rocket server failed");
        return Err(e);
    }

    info!("shutdown complete");
    Ok(())
}
