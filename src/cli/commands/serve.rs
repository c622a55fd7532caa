use anyhow::Result;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace};

use compute::SystemClock;

use crate::config::{build_app_state, initialize_app_state, Settings};
use crate::router::create_router;

pub async fn serve(settings: Settings) -> Result<()> {
    trace!("Entering serve function");
    info!("MeterBill application starting up");

    let state = initialize_app_state(settings).await.map_err(|e| {
        error!("Failed to initialize application state: {}", e);
        e
    })?;
    run_server(state).await
}

/// Serves an already migrated database.
pub async fn serve_connection(db: DatabaseConnection, settings: Settings) -> Result<()> {
    run_server(build_app_state(db, settings, Arc::new(SystemClock))).await
}

async fn run_server(state: crate::schemas::AppState) -> Result<()> {
    let bind_address = state.settings.bind_address.clone();

    tokio::fs::create_dir_all(state.storage.dir()).await.map_err(|e| {
        error!("Failed to create upload directory {:?}: {}", state.storage.dir(), e);
        e
    })?;

    trace!("Creating application router");
    let app = create_router(state);
    debug!("Router created successfully");

    info!("Starting server on {}", bind_address);
    let listener = TcpListener::bind(&bind_address).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", bind_address, e);
        e
    })?;

    info!("MeterBill API server running on http://{}", bind_address);
    info!("Swagger UI available at http://{}/swagger-ui", bind_address);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("Server shutdown gracefully");
    Ok(())
}
