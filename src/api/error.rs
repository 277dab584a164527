//! HTTP error type with a structured JSON body.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::engine::EngineError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthenticated,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Insufficient credit: {0}")]
    InsufficientCredit(String),
    #[error("Reference mismatch: {0}")]
    ReferenceMismatch(String),
    #[error("Scheduling conflict: {0}")]
    SchedulingConflict(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) | ApiError::ReferenceMismatch(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidInput(_)
            | ApiError::InsufficientCredit(_)
            | ApiError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
            ApiError::SchedulingConflict(_) | ApiError::AlreadyExists(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "UNAUTHENTICATED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::InsufficientCredit(_) => "INSUFFICIENT_CREDIT",
            ApiError::ReferenceMismatch(_) => "REFERENCE_MISMATCH",
            ApiError::SchedulingConflict(_) => "SCHEDULING_CONFLICT",
            ApiError::AlreadyExists(_) => "ALREADY_EXISTS",
            ApiError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            ApiError::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Unauthenticated => "Authentication required".to_string(),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                "An internal error occurred".to_string()
            }
            ApiError::Forbidden(m)
            | ApiError::NotFound(m)
            | ApiError::InvalidInput(m)
            | ApiError::InsufficientCredit(m)
            | ApiError::ReferenceMismatch(m)
            | ApiError::SchedulingConflict(m)
            | ApiError::AlreadyExists(m)
            | ApiError::LimitExceeded(m) => m.clone(),
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message,
            },
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::NotFound { .. } => ApiError::NotFound(message),
            EngineError::AlreadyExists(_) => ApiError::AlreadyExists(message),
            EngineError::ReferenceMismatch { .. } => ApiError::ReferenceMismatch(message),
            EngineError::InvalidInput(_) => ApiError::InvalidInput(message),
            EngineError::InsufficientCredit(_) => ApiError::InsufficientCredit(message),
            EngineError::Conflict(_) => ApiError::SchedulingConflict(message),
            EngineError::LimitExceeded(_) => ApiError::LimitExceeded(message),
            EngineError::WalError(_) => ApiError::Internal(message),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidInput(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidInput(rejection.body_text())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use ulid::Ulid;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn unauthenticated_returns_401() {
        let response = ApiError::Unauthenticated.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn internal_hides_details() {
        let response = ApiError::Internal("disk on fire".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"]["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn conflict_maps_to_409() {
        let id = Ulid::new();
        let response = ApiError::from(EngineError::Conflict(id)).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "SCHEDULING_CONFLICT");
        assert!(json["error"]["message"].as_str().unwrap().contains(&id.to_string()));
    }

    #[test]
    fn engine_errors_map_to_statuses() {
        let id = Ulid::new();
        let cases = [
            (EngineError::not_found("patient", id), StatusCode::NOT_FOUND),
            (EngineError::mismatch("service", id), StatusCode::FORBIDDEN),
            (EngineError::InvalidInput("end must be after start"), StatusCode::BAD_REQUEST),
            (EngineError::InsufficientCredit(id), StatusCode::BAD_REQUEST),
            (EngineError::LimitExceeded("group is full"), StatusCode::BAD_REQUEST),
            (EngineError::AlreadyExists("employee"), StatusCode::CONFLICT),
            (EngineError::WalError("io".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
