use super::ApiResponse;
use crate::error::AppError;
use crate::models::DevicePlatform;
/// Device token management handlers
use crate::state::AppContext;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Register device token request
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegisterDevicePayload {
    pub identity: Uuid,
    pub platform: String, // "ios", "android", "web"
    pub token: String,
}

/// Unregister device token request
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UnregisterDevicePayload {
    pub identity: Uuid,
    pub token: String,
}

/// Register a device token
///
/// POST /api/v1/devices/register
pub async fn register_device(
    app: web::Data<AppContext>,
    req: web::Json<RegisterDevicePayload>,
) -> Result<HttpResponse, AppError> {
    let device = app
        .dispatcher
        .register_device_token(
            req.identity,
            DevicePlatform::parse(&req.platform),
            &req.token,
        )
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(device)))
}

/// Unregister (revoke) a device token
///
/// POST /api/v1/devices/unregister
pub async fn unregister_device(
    app: web::Data<AppContext>,
    req: web::Json<UnregisterDevicePayload>,
) -> Result<HttpResponse, AppError> {
    let removed = app
        .dispatcher
        .remove_device_token(req.identity, &req.token)
        .await?;
    if !removed {
        return Err(AppError::NotFound);
    }
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "success": true
    }))))
}

/// List an identity's device tokens
///
/// GET /api/v1/devices/user/{identity}
pub async fn list_devices(
    app: web::Data<AppContext>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let devices = app.dispatcher.device_tokens(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(devices)))
}

/// Register routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/devices")
            .route("/register", web::post().to(register_device))
            .route("/unregister", web::post().to(unregister_device))
            .route("/user/{identity}", web::get().to(list_devices)),
    );
}
