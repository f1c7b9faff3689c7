use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use nop_tiles::store::PgFeatureStore;
use nop_tiles::{http, TileService, TileSourceConfig};

/// Process settings read from the environment. Layer definitions live in the
/// tile source YAML.
#[derive(Debug, Clone)]
struct Config {
    listen_addr: SocketAddr,
    database_url: String,
    tile_source: String,
    max_connections: u32,
}

impl Config {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            listen_addr: std::env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".into())
                .parse()
                .context("Failed to parse LISTEN_ADDR")?,
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            tile_source: std::env::var("TILE_SOURCE").unwrap_or_else(|_| "tiles.yml".into()),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "16".into())
                .parse()
                .context("Failed to parse DATABASE_MAX_CONNECTIONS")?,
        })
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::from_env()?;
    info!(
        listen_addr = %config.listen_addr,
        tile_source = %config.tile_source,
        max_connections = config.max_connections,
        "Loaded configuration"
    );

    let source = TileSourceConfig::load(&config.tile_source)
        .with_context(|| format!("Failed to load tile source {}", config.tile_source))?;
    info!(
        name = %source.name,
        layers = ?source.layers.iter().map(|l| l.id.as_str()).collect::<Vec<_>>(),
        "Loaded tile source"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to the spatial store")?;

    let service = TileService::new(source, Arc::new(PgFeatureStore::new(pool)));
    let app = http::router(Arc::new(service));

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "serving tiles");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    Ok(())
}
