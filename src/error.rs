use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use utoipa::ToSchema;

use crate::access::UnknownRole;

/// AuthError
///
/// Failures of authentication. `SessionExpired` is the one case clients must react to
/// with a forced sign-out (see `SessionManager::handle_auth_error`); its response
/// code is distinct so the client redirects to login exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("session expired")]
    SessionExpired,
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("no portal account for this identity")]
    UnknownUser,
}

/// PortalError
///
/// Every failure the portal reports. The pure components (access policy, reorder
/// planning, step editing) never produce one; all of these originate at a
/// collaborator boundary or in request validation.
#[derive(Debug, Error)]
pub enum PortalError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    /// A multi-write operation stopped midway and its rollback could not be confirmed.
    #[error("partial write: {applied} of {total} changes applied")]
    PartialWrite { applied: usize, total: usize },
    #[error("timed out: {0}")]
    Timeout(String),
}

pub type PortalResult<T> = Result<T, PortalError>;

impl PortalError {
    pub fn not_found(what: impl Into<String>) -> Self {
        PortalError::NotFound(what.into())
    }

    pub fn forbidden(what: impl Into<String>) -> Self {
        PortalError::Forbidden(what.into())
    }

    pub fn validation(what: impl Into<String>) -> Self {
        PortalError::Validation(what.into())
    }

    /// A stored value that no longer parses, such as a role string the portal does not
    /// know. The request was fine; the record is not.
    pub fn corrupt_record(err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "stored record failed to parse");
        PortalError::Persistence(format!("corrupt record: {err}"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PortalError::Auth(_) => StatusCode::UNAUTHORIZED,
            PortalError::Forbidden(_) => StatusCode::FORBIDDEN,
            PortalError::NotFound(_) => StatusCode::NOT_FOUND,
            PortalError::Validation(_) => StatusCode::BAD_REQUEST,
            PortalError::Conflict(_) => StatusCode::CONFLICT,
            PortalError::Persistence(_) | PortalError::PartialWrite { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            PortalError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PortalError::Auth(AuthError::SessionExpired) => "session_expired",
            PortalError::Auth(AuthError::InvalidCredentials) => "invalid_credentials",
            PortalError::Auth(_) => "unauthorized",
            PortalError::Forbidden(_) => "forbidden",
            PortalError::NotFound(_) => "not_found",
            PortalError::Validation(_) => "validation_error",
            PortalError::Conflict(_) => "conflict",
            PortalError::Persistence(_) => "internal",
            PortalError::PartialWrite { .. } => "partial_write",
            PortalError::Timeout(_) => "timeout",
        }
    }

    /// Only timeouts are worth retrying; the portal itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortalError::Timeout(_))
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, PortalError::Auth(AuthError::SessionExpired))
    }
}

/// Request payloads only; rows read from storage go through `corrupt_record`.
impl From<UnknownRole> for PortalError {
    fn from(err: UnknownRole) -> Self {
        PortalError::Validation(err.to_string())
    }
}

impl From<sqlx::Error> for PortalError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => PortalError::NotFound("row".to_string()),
            sqlx::Error::PoolTimedOut => PortalError::Timeout("database pool".to_string()),
            other => {
                tracing::error!(error = ?other, "database error");
                PortalError::Persistence(other.to_string())
            }
        }
    }
}

impl From<reqwest::Error> for PortalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PortalError::Timeout("auth provider".to_string())
        } else {
            tracing::error!(error = ?err, "auth provider request failed");
            PortalError::Persistence(err.to_string())
        }
    }
}

/// ErrorResponse
///
/// JSON body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Backend detail stays in the logs.
        let message = match &self {
            PortalError::Persistence(_) => "the operation could not be completed".to_string(),
            other => other.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message,
            retryable: self.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}
