//! ATTUNE API Server Entry Point
//!
//! Bootstraps configuration, seeds default users, and starts the Axum HTTP
//! server with the built-in sequential search engine.

use std::net::SocketAddr;
use std::sync::Arc;

use attune_api::{
    create_api_router, seed_default_users, ApiConfig, ApiError, ApiResult, AppState, AuthConfig,
    DbClient, DbConfig,
};
use attune_optimizer::{OptimizerEngine, SequentialSearchEngine};
use axum::Router;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing();

    let db_config = DbConfig::from_env();
    let db = DbClient::from_config(&db_config)?;

    seed_default_users(&db).await?;

    let api_config = ApiConfig::from_env();
    let auth_config = AuthConfig::from_env();

    let engine = build_engine();
    tracing::info!(engine = engine.name(), "Optimizer engine ready");

    let state = AppState {
        db,
        engine,
        auth: Arc::new(auth_config),
    };

    let app: Router = create_api_router(state, &api_config)?;

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting ATTUNE API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if std::env::var("ATTUNE_LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// The built-in engine, deterministic when `ATTUNE_ENGINE_SEED` is set.
fn build_engine() -> Arc<dyn OptimizerEngine> {
    match std::env::var("ATTUNE_ENGINE_SEED")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
    {
        Some(seed) => Arc::new(SequentialSearchEngine::seeded(seed)),
        None => Arc::new(SequentialSearchEngine::new()),
    }
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("ATTUNE_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("ATTUNE_API_PORT").ok())
        .unwrap_or_else(|| "8000".to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
