use super::ApiResponse;
use crate::error::AppError;
/// Operational dashboard handlers (read-only)
use crate::state::AppContext;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct WaitingQuery {
    pub limit: Option<i64>,
}

/// Aggregate stats over the trailing window
///
/// GET /api/v1/dashboard/stats
pub async fn stats(app: web::Data<AppContext>) -> Result<HttpResponse, AppError> {
    let stats = app.dashboard.stats().await;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(stats)))
}

/// Sessions still waiting for an agent, oldest first
///
/// GET /api/v1/dashboard/waiting
pub async fn waiting_sessions(
    app: web::Data<AppContext>,
    query: web::Query<WaitingQuery>,
) -> Result<HttpResponse, AppError> {
    let sessions = app
        .dashboard
        .waiting_sessions(query.limit.unwrap_or(20))
        .await;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(sessions)))
}

/// Connected member count for one session
///
/// GET /api/v1/dashboard/sessions/{session_id}/presence
pub async fn session_presence(
    app: web::Data<AppContext>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "session_id": session_id.to_string(),
        "connected_members": app.dashboard.session_presence(session_id),
    }))))
}

/// Register routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/dashboard")
            .route("/stats", web::get().to(stats))
            .route("/waiting", web::get().to(waiting_sessions))
            .route(
                "/sessions/{session_id}/presence",
                web::get().to(session_presence),
            ),
    );
}
