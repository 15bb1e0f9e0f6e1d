use std::path::PathBuf;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use canopy_core::condition::AcceptAll;
use canopy_server::cache::build_cache;
use canopy_server::config::{AppConfig, LogFormat};
use canopy_server::rest::{self, AppState};
use canopy_server::service::IamService;
use canopy_storage::PostgresStore;
use canopy_storage::postgres::run_migrations;

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    match config.log.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    let config = AppConfig::load(config_path.as_deref())?;
    init_logging(&config);

    tracing::info!(
        address = %config.server.address,
        database = %config.database.dbname,
        cache_type = ?config.cache.cache_type,
        "starting canopy server"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_conns)
        .min_connections(config.database.max_idle)
        .connect(&config.database.url())
        .await?;
    run_migrations(&pool).await?;

    let cache = build_cache(&config.cache).await?;
    let store = Arc::new(PostgresStore::new(pool));
    let service = Arc::new(IamService::new(store, cache, Arc::new(AcceptAll)));

    let router = rest::create_router(AppState { service });
    let listener = tokio::net::TcpListener::bind(&config.server.address).await?;
    tracing::info!(address = %config.server.address, "REST server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => { tracing::info!("received SIGINT"); }
        _ = sigterm.recv() => { tracing::info!("received SIGTERM"); }
    }
}
