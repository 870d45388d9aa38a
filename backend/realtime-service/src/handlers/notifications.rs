use super::ApiResponse;
use crate::error::AppError;
use crate::models::{DeliveryChannel, NotificationRequest};
/// Notification dispatch and inbox handlers
use crate::state::AppContext;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to dispatch a notification
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DispatchPayload {
    pub recipient_id: Uuid,
    pub title: String,
    pub body: String,
    /// Channel names: "push", "email", "in_app"
    pub channels: Vec<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct InboxQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Dispatch a notification across its requested channels
///
/// POST /api/v1/notifications/dispatch
pub async fn dispatch(
    app: web::Data<AppContext>,
    req: web::Json<DispatchPayload>,
) -> Result<HttpResponse, AppError> {
    let mut channels = Vec::with_capacity(req.channels.len());
    for raw in &req.channels {
        let channel = DeliveryChannel::parse(raw)
            .ok_or_else(|| AppError::BadRequest(format!("unknown channel: {}", raw)))?;
        channels.push(channel);
    }

    let receipt = app
        .dispatcher
        .dispatch(NotificationRequest {
            recipient_id: req.recipient_id,
            title: req.title.clone(),
            body: req.body.clone(),
            channels,
            metadata: req.metadata.clone(),
        })
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(receipt)))
}

/// Read an identity's in-app inbox, newest first
///
/// GET /api/v1/notifications/inbox/{identity}
pub async fn inbox(
    app: web::Data<AppContext>,
    path: web::Path<Uuid>,
    query: web::Query<InboxQuery>,
) -> Result<HttpResponse, AppError> {
    let entries = app
        .dispatcher
        .inbox(
            path.into_inner(),
            query.limit.unwrap_or(50),
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(entries)))
}

/// Mark one inbox entry read
///
/// POST /api/v1/notifications/inbox/{entry_id}/read
pub async fn mark_inbox_read(
    app: web::Data<AppContext>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let updated = app.dispatcher.mark_inbox_read(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "updated": updated
    }))))
}

/// Register routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/notifications")
            .route("/dispatch", web::post().to(dispatch))
            .route("/inbox/{identity}", web::get().to(inbox))
            .route("/inbox/{entry_id}/read", web::post().to(mark_inbox_read)),
    );
}
