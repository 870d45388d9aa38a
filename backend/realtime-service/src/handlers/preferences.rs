use super::ApiResponse;
use crate::error::AppError;
use crate::models::DeliveryChannel;
/// Per-channel notification preference handlers
use crate::state::AppContext;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SetPreferencePayload {
    pub channel: String,
    pub enabled: bool,
}

/// List an identity's channel preferences.
///
/// Channels without a record are opted in by default; only explicit
/// records appear here.
///
/// GET /api/v1/preferences/{identity}
pub async fn get_preferences(
    app: web::Data<AppContext>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let prefs = app.storage.list_preferences(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(prefs)))
}

/// Set one channel preference
///
/// PUT /api/v1/preferences/{identity}
pub async fn set_preference(
    app: web::Data<AppContext>,
    path: web::Path<Uuid>,
    req: web::Json<SetPreferencePayload>,
) -> Result<HttpResponse, AppError> {
    let channel = DeliveryChannel::parse(&req.channel)
        .ok_or_else(|| AppError::BadRequest(format!("unknown channel: {}", req.channel)))?;

    let pref = app
        .storage
        .set_preference(path.into_inner(), channel, req.enabled)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(pref)))
}

/// Register routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/preferences")
            .route("/{identity}", web::get().to(get_preferences))
            .route("/{identity}", web::put().to(set_preference)),
    );
}
