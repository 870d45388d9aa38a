use actix_web::{middleware, web, App, HttpServer};
use realtime_service::{
    config::Config,
    db,
    handlers::{
        dashboard::register_routes as register_dashboard,
        devices::register_routes as register_devices,
        notifications::register_routes as register_notifications,
        preferences::register_routes as register_preferences,
        sessions::register_routes as register_sessions, ws::register_routes as register_ws,
    },
    metrics,
    services::{EmailRelay, HttpEmailRelay, HttpPushGateway, PushGateway},
    storage::PgStore,
    AppContext,
};
use std::io;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting realtime service");

    let config = Arc::new(
        Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?,
    );

    let db_pool = match db::init_pool(&config.database_url).await {
        Ok(pool) => {
            tracing::info!("Successfully connected to database");
            pool
        }
        Err(e) => {
            tracing::error!("Failed to connect to database: {}", e);
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "Database connection failed",
            ));
        }
    };

    // Provider capability is resolved once here: configured and present,
    // or absent by design
    let push_gateway: Option<Arc<dyn PushGateway>> = match &config.push_gateway {
        Some(cfg) => {
            tracing::info!("Push gateway configured at {}", cfg.endpoint);
            let gateway = HttpPushGateway::new(cfg)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            Some(Arc::new(gateway))
        }
        None => {
            tracing::info!("No push gateway configured; push deliveries will fail fast");
            None
        }
    };

    let email_relay: Option<Arc<dyn EmailRelay>> = match &config.email_relay {
        Some(cfg) => {
            tracing::info!("Email relay configured at {}", cfg.endpoint);
            let relay = HttpEmailRelay::new(cfg)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            Some(Arc::new(relay))
        }
        None => {
            tracing::info!("No email relay configured; email deliveries will fail fast");
            None
        }
    };

    let app_context = AppContext::new(
        config.clone(),
        Arc::new(PgStore::new(db_pool)),
        push_gateway,
        email_relay,
    );
    tracing::info!("Realtime core initialized");

    // Sweep idle connections in the background
    let sweeper_registry = app_context.registry.clone();
    let idle_timeout = chrono::Duration::seconds(config.ws_idle_timeout_secs as i64);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            sweeper_registry.evict_idle(idle_timeout);
            metrics::set_live_connections(sweeper_registry.connection_count());
        }
    });

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting HTTP server on {}", addr);

    let server_context = app_context.clone();
    let result = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(server_context.clone()))
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .route("/", web::get().to(|| async { "SwipeSavvy Realtime Service v1.0" }))
            .configure(|cfg| {
                register_sessions(cfg);
                register_notifications(cfg);
                register_devices(cfg);
                register_preferences(cfg);
                register_dashboard(cfg);
                register_ws(cfg);
                realtime_service::websocket::route::register_routes(cfg);
            })
    })
    .bind(&addr)?
    .run()
    .await;

    app_context.shutdown();
    result
}
