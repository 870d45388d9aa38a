use crate::{
    config::Config,
    services::{DashboardService, DeliveryDispatcher, EmailRelay, PushGateway, SessionService},
    storage::Storage,
    websocket::ConnectionRegistry,
};
use std::sync::Arc;
use tracing::info;

/// Process-wide context owning the realtime core.
///
/// Constructed once at startup and passed in explicitly; there is no
/// ambient global state. Everything inside is cheaply cloneable.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub storage: Arc<dyn Storage>,
    pub registry: ConnectionRegistry,
    pub sessions: Arc<SessionService>,
    pub dispatcher: Arc<DeliveryDispatcher>,
    pub dashboard: Arc<DashboardService>,
}

impl AppContext {
    pub fn new(
        config: Arc<Config>,
        storage: Arc<dyn Storage>,
        push_gateway: Option<Arc<dyn PushGateway>>,
        email_relay: Option<Arc<dyn EmailRelay>>,
    ) -> Self {
        let registry = ConnectionRegistry::new();

        let sessions = Arc::new(SessionService::new(storage.clone(), registry.clone()));
        let dispatcher = Arc::new(DeliveryDispatcher::new(
            storage.clone(),
            registry.clone(),
            push_gateway,
            email_relay,
        ));
        let dashboard = Arc::new(DashboardService::new(
            storage.clone(),
            registry.clone(),
            config.dashboard_window_hours,
        ));

        Self {
            config,
            storage,
            registry,
            sessions,
            dispatcher,
            dashboard,
        }
    }

    /// Release live resources on process shutdown
    pub fn shutdown(&self) {
        let dropped = self.registry.connection_count();
        self.registry.clear();
        info!("Shutdown: dropped {} live connections", dropped);
    }
}
