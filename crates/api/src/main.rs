//! Herald API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use herald_common::config::{AppConfig, StoreBackend};
use herald_common::db;
use herald_engine::store::{MemoryNotificationStore, NotificationStore, PgNotificationStore};
use herald_notifier::HttpConfirmationSender;

use herald_api::routes::create_router;
use herald_api::state::AppState;

/// Upper bound on request bodies; a bulk dispatch with thousands of targets fits well inside.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("herald_api=debug,herald_engine=debug,herald_notifier=debug,tower_http=debug")
    });
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    tracing::info!(store = ?config.store_backend, "Starting Herald API server...");

    let store: Arc<dyn NotificationStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let pool = db::connect(&config).await?;
            Arc::new(PgNotificationStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory notification store; records are lost on restart");
            Arc::new(MemoryNotificationStore::new())
        }
    };

    let sender = Arc::new(HttpConfirmationSender::new(Duration::from_millis(
        config.callback_timeout_ms,
    ))?);

    // Build application state
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let state = AppState::new(store, sender, config);
    let shutdown = state.shutdown.clone();

    // Build router
    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Herald API server stopped.");
    Ok(())
}

/// Wait for Ctrl+C, then end every open push stream so connections can drain.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Received shutdown signal, stopping gracefully...");
    shutdown.cancel();
}
