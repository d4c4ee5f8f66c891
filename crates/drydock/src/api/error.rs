//! Unified API error handling with structured responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::agent::AgentError;
use crate::project::ProjectError;
use crate::pty::PtyError;

/// API error type with structured responses.
///
/// Every variant carries a stable machine code; internal detail stays in
/// the logs.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Agent command failed: {0}")]
    AgentFailed(String),

    #[error("Command failed: {0}")]
    ExecFailed(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Provisioning(_) => StatusCode::BAD_GATEWAY,
            Self::Template(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::AgentUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::AgentFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ExecFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::AccessDenied(_) => "ACCESS_DENIED",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Provisioning(_) => "PROVISIONING_ERROR",
            Self::Template(_) => "TEMPLATE_ERROR",
            Self::AgentUnavailable(_) => "AGENT_UNAVAILABLE",
            Self::Timeout(_) => "TIMEOUT",
            Self::AgentFailed(_) => "AGENT_ERROR",
            Self::ExecFailed(_) => "EXEC_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        // Internal detail is logged, never returned to the client.
        let message = match &self {
            ApiError::Internal(detail) => {
                error!(error_code = code, message = %detail, "API error");
                "internal server error".to_string()
            }
            ApiError::Provisioning(detail) => {
                error!(error_code = code, message = %detail, "Provisioning error");
                self.to_string()
            }
            ApiError::AgentUnavailable(detail) => {
                warn!(error_code = code, message = %detail, "Agent unavailable");
                self.to_string()
            }
            _ => {
                tracing::debug!(error_code = code, message = %self, "Client error");
                self.to_string()
            }
        };

        let body = ErrorResponse {
            error: message,
            code,
        };

        (status, Json(body)).into_response()
    }
}

impl From<ProjectError> for ApiError {
    fn from(err: ProjectError) -> Self {
        match err {
            ProjectError::NotFound(msg) => ApiError::NotFound(msg),
            ProjectError::AccessDenied(msg) => ApiError::AccessDenied(msg),
            ProjectError::Provisioning(msg) => ApiError::Provisioning(msg),
            ProjectError::Template(msg) => ApiError::Template(msg),
            ProjectError::Exec { status, stderr } => {
                ApiError::ExecFailed(format!("status {status}: {stderr}"))
            }
            ProjectError::Io(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Unavailable(binary) => ApiError::AgentUnavailable(binary),
            AgentError::Timeout(secs) => ApiError::Timeout(format!("after {secs}s")),
            AgentError::Failed { status, stderr } => {
                ApiError::AgentFailed(format!("status {status}: {stderr}"))
            }
            AgentError::Io(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<PtyError> for ApiError {
    fn from(err: PtyError) -> Self {
        match err {
            PtyError::Spawn(msg) => ApiError::Internal(msg),
            PtyError::Io(e) => ApiError::Internal(e.to_string()),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_error_mapping() {
        let err: ApiError = ProjectError::NotFound("p1".to_string()).into();
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: ApiError = ProjectError::AccessDenied("../etc".to_string()).into();
        assert_eq!(err.error_code(), "ACCESS_DENIED");
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_agent_error_mapping() {
        let err: ApiError = AgentError::Unavailable("pi".to_string()).into();
        assert_eq!(err.error_code(), "AGENT_UNAVAILABLE");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err: ApiError = AgentError::Timeout(30).into();
        assert_eq!(err.error_code(), "TIMEOUT");
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let err: ApiError = AgentError::Failed {
            status: 2,
            stderr: "boom".to_string(),
        }
        .into();
        assert_eq!(err.error_code(), "AGENT_ERROR");
    }

    #[test]
    fn test_internal_detail_suppressed() {
        let response = ApiError::internal("secret database path").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
