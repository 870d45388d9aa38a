use super::ApiResponse;
use crate::error::AppError;
/// WebSocket status and targeted-send handlers
use crate::state::AppContext;
use crate::websocket::WsEvent;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotifyPayload {
    pub title: String,
    pub body: String,
}

/// Connection status for one identity
///
/// GET /api/v1/ws/status/{identity}
pub async fn ws_status(
    app: web::Data<AppContext>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let identity = path.into_inner();
    let connected_since = app.registry.connected_since(identity);

    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "identity": identity.to_string(),
        "connected": connected_since.is_some(),
        "connected_since": connected_since.map(|t| t.to_rfc3339()),
    }))))
}

/// Live connection totals
///
/// GET /api/v1/ws/metrics
pub async fn ws_metrics(app: web::Data<AppContext>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "live_connections": app.registry.connection_count(),
    }))))
}

/// Push an ad-hoc realtime frame to one connected identity.
///
/// Requires a live connection: this endpoint is for realtime-only nudges,
/// not for durable notifications (use the dispatcher for those).
///
/// POST /api/v1/ws/notify/{identity}
pub async fn notify_identity(
    app: web::Data<AppContext>,
    path: web::Path<Uuid>,
    req: web::Json<NotifyPayload>,
) -> Result<HttpResponse, AppError> {
    let identity = path.into_inner();
    let delivered = app.registry.send(
        identity,
        WsEvent::notification(Uuid::new_v4(), &req.title, &req.body),
    );
    if !delivered {
        return Err(AppError::RecipientNotFound);
    }
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "identity": identity.to_string(),
        "delivered": true,
    }))))
}

/// List connected identities
///
/// GET /api/v1/ws/users
pub async fn connected_users(app: web::Data<AppContext>) -> Result<HttpResponse, AppError> {
    let identities = app.registry.connected_identities();
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "count": identities.len(),
        "users": identities
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>(),
    }))))
}

/// Register routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/ws")
            .route("/status/{identity}", web::get().to(ws_status))
            .route("/metrics", web::get().to(ws_metrics))
            .route("/notify/{identity}", web::post().to(notify_identity))
            .route("/users", web::get().to(connected_users)),
    );
}
