//! Shared application state for the Axum API server.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use herald_common::config::AppConfig;
use herald_engine::dispatch::DispatchEngine;
use herald_engine::registry::ConnectionRegistry;
use herald_engine::store::NotificationStore;
use herald_engine::tracker::DeliveryTracker;
use herald_notifier::ConfirmationSender;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn NotificationStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<DispatchEngine>,
    pub tracker: Arc<DeliveryTracker>,
    pub config: AppConfig,
    /// Cancelled on shutdown so open push streams end.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the core around `store`. The registry always starts empty.
    pub fn new(
        store: Arc<dyn NotificationStore>,
        sender: Arc<dyn ConfirmationSender>,
        config: AppConfig,
    ) -> Self {
        let registry = ConnectionRegistry::shared();
        let dispatcher = Arc::new(DispatchEngine::new(store.clone(), registry.clone()));
        let tracker = Arc::new(DeliveryTracker::new(store.clone(), sender));

        Self {
            store,
            registry,
            dispatcher,
            tracker,
            config,
            shutdown: CancellationToken::new(),
        }
    }
}
