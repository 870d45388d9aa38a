use dotenvy::dotenv;
use std::env;

/// Push provider endpoint configuration
///
/// Present only when the deployment has a push provider wired up; the
/// decision is made once at startup, never per-call.
#[derive(Debug, Clone)]
pub struct PushGatewayConfig {
    pub endpoint: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

/// Outbound email relay configuration
#[derive(Debug, Clone)]
pub struct EmailRelayConfig {
    pub endpoint: String,
    pub api_key: String,
    pub sender: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub push_gateway: Option<PushGatewayConfig>,
    pub email_relay: Option<EmailRelayConfig>,
    /// Connections silent past this are evicted by the sweeper task
    pub ws_idle_timeout_secs: u64,
    /// Trailing window for dashboard aggregation
    pub dashboard_window_hours: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| crate::error::AppError::Config("DATABASE_URL missing".into()))?;
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080);

        // Push gateway: both endpoint and key required, otherwise absent by design
        let push_gateway = match (env::var("PUSH_GATEWAY_URL"), env::var("PUSH_GATEWAY_API_KEY")) {
            (Ok(endpoint), Ok(api_key)) => Some(PushGatewayConfig {
                endpoint,
                api_key,
                timeout_secs: env::var("PUSH_GATEWAY_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            }),
            _ => None,
        };

        let email_relay = match (env::var("EMAIL_RELAY_URL"), env::var("EMAIL_RELAY_API_KEY")) {
            (Ok(endpoint), Ok(api_key)) => Some(EmailRelayConfig {
                endpoint,
                api_key,
                sender: env::var("EMAIL_SENDER")
                    .unwrap_or_else(|_| "support@swipesavvy.com".to_string()),
            }),
            _ => None,
        };

        let ws_idle_timeout_secs = env::var("WS_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(300);

        let dashboard_window_hours = env::var("DASHBOARD_WINDOW_HOURS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(24);

        Ok(Self {
            database_url,
            port,
            push_gateway,
            email_relay,
            ws_idle_timeout_secs,
            dashboard_window_hours,
        })
    }
}
