use crate::models::SessionStatus;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("recipient not found")]
    RecipientNotFound,

    #[error("invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("session is closed")]
    SessionClosed,

    #[error("sender is not a participant of this session")]
    NotAParticipant,

    #[error("database error: {0}")]
    Database(String),

    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("internal server error")]
    Internal,
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound,
            other => AppError::Database(other.to_string()),
        }
    }
}

impl AppError {
    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::NotFound | AppError::RecipientNotFound => 404,
            AppError::NotAParticipant => 403,
            // 409 Conflict: the session lifecycle refuses the change
            AppError::InvalidTransition { .. } | AppError::SessionClosed => 409,
            AppError::GatewayUnavailable(_) => 503,
            _ => 500,
        }
    }

    /// Machine-readable error code for API payloads
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG",
            AppError::StartServer(_) => "START_SERVER",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::NotFound => "NOT_FOUND",
            AppError::RecipientNotFound => "RECIPIENT_NOT_FOUND",
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::SessionClosed => "SESSION_CLOSED",
            AppError::NotAParticipant => "NOT_A_PARTICIPANT",
            AppError::Database(_) => "DATABASE",
            AppError::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            AppError::Internal => "INTERNAL",
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = actix_web::http::StatusCode::from_u16(self.status_code())
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
        HttpResponse::build(status).json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "code": self.code(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(AppError::NotFound.status_code(), 404);
        assert_eq!(AppError::SessionClosed.status_code(), 409);
        assert_eq!(
            AppError::InvalidTransition {
                from: SessionStatus::Closed,
                to: SessionStatus::Active,
            }
            .status_code(),
            409
        );
        assert_eq!(AppError::Database("boom".into()).status_code(), 500);
        assert_eq!(AppError::GatewayUnavailable("push".into()).status_code(), 503);
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AppError::NotFound));
    }
}
