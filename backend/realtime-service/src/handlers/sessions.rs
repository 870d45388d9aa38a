use super::ApiResponse;
use crate::error::AppError;
use crate::models::{MessageStatus, ParticipantRole};
/// Chat session lifecycle and message handlers
use crate::state::AppContext;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenSessionPayload {
    pub initiator_id: Uuid,
    pub assigned_agent_id: Option<Uuid>,
    pub title: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AddParticipantPayload {
    pub identity: Uuid,
    pub role: String, // "owner", "support_agent", "observer"
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PostMessagePayload {
    pub sender_id: Uuid,
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CloseSessionPayload {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AckPayload {
    pub identity: Uuid,
    pub status: String, // "delivered" or "read"
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Open a new session
///
/// POST /api/v1/sessions
pub async fn open_session(
    app: web::Data<AppContext>,
    req: web::Json<OpenSessionPayload>,
) -> Result<HttpResponse, AppError> {
    let session = app
        .sessions
        .open_session(
            req.initiator_id,
            req.assigned_agent_id,
            req.title.clone(),
            req.metadata.clone(),
        )
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(session)))
}

/// Get a session by id
///
/// GET /api/v1/sessions/{session_id}
pub async fn get_session(
    app: web::Data<AppContext>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let session = app.sessions.get_session(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(session)))
}

/// List active participants
///
/// GET /api/v1/sessions/{session_id}/participants
pub async fn list_participants(
    app: web::Data<AppContext>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let participants = app.sessions.participants(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(participants)))
}

/// Add a participant to a session
///
/// POST /api/v1/sessions/{session_id}/participants
pub async fn add_participant(
    app: web::Data<AppContext>,
    path: web::Path<Uuid>,
    req: web::Json<AddParticipantPayload>,
) -> Result<HttpResponse, AppError> {
    let participant = app
        .sessions
        .add_participant(
            path.into_inner(),
            req.identity,
            ParticipantRole::parse(&req.role),
        )
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(participant)))
}

/// Post a message to a session
///
/// POST /api/v1/sessions/{session_id}/messages
pub async fn post_message(
    app: web::Data<AppContext>,
    path: web::Path<Uuid>,
    req: web::Json<PostMessagePayload>,
) -> Result<HttpResponse, AppError> {
    let message = app
        .sessions
        .post_message(path.into_inner(), req.sender_id, &req.body)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(message)))
}

/// Chronological message history; reconnecting clients fetch this instead
/// of relying on any replay
///
/// GET /api/v1/sessions/{session_id}/messages
pub async fn message_history(
    app: web::Data<AppContext>,
    path: web::Path<Uuid>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let messages = app
        .sessions
        .message_history(
            path.into_inner(),
            query.limit.unwrap_or(50),
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(messages)))
}

/// Close a session (idempotent)
///
/// POST /api/v1/sessions/{session_id}/close
pub async fn close_session(
    app: web::Data<AppContext>,
    path: web::Path<Uuid>,
    req: web::Json<CloseSessionPayload>,
) -> Result<HttpResponse, AppError> {
    let session = app
        .sessions
        .close_session(path.into_inner(), req.reason.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(session)))
}

/// Explicit delivery/read acknowledgment over HTTP
///
/// POST /api/v1/messages/{message_id}/ack
pub async fn acknowledge_message(
    app: web::Data<AppContext>,
    path: web::Path<Uuid>,
    req: web::Json<AckPayload>,
) -> Result<HttpResponse, AppError> {
    let message = app
        .sessions
        .acknowledge(
            path.into_inner(),
            req.identity,
            MessageStatus::parse(&req.status),
        )
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(message)))
}

/// Register routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/sessions")
            .route("", web::post().to(open_session))
            .route("/{session_id}", web::get().to(get_session))
            .route(
                "/{session_id}/participants",
                web::get().to(list_participants),
            )
            .route(
                "/{session_id}/participants",
                web::post().to(add_participant),
            )
            .route("/{session_id}/messages", web::post().to(post_message))
            .route("/{session_id}/messages", web::get().to(message_history))
            .route("/{session_id}/close", web::post().to(close_session)),
    );
    cfg.service(
        web::scope("/api/v1/messages")
            .route("/{message_id}/ack", web::post().to(acknowledge_message)),
    );
}
