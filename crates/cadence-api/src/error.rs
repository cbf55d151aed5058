//! Mapping of domain errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cadence_core::CoreError;
use serde::Serialize;
use tracing::error;

/// Error body for everything except validation failures.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

/// Handler error.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl ApiError {
    /// Shorthand for a 404.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self(CoreError::NotFound(what.into()))
    }

    /// Status code this error maps to.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CoreError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CoreError::ConstraintViolation(_) => StatusCode::CONFLICT,
            CoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self.0 {
            CoreError::Validation(errors) => {
                (status, Json(serde_json::json!({ "errors": errors }))).into_response()
            },
            CoreError::Database(message) => {
                error!(error = %message, "request failed on database error");
                let body = ErrorResponse {
                    error: ErrorDetail {
                        code: "database_error".to_string(),
                        message: "Internal error".to_string(),
                    },
                };
                (status, Json(body)).into_response()
            },
            other => {
                let body = ErrorResponse {
                    error: ErrorDetail { code: other.code().to_string(), message: other.to_string() },
                };
                (status, Json(body)).into_response()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use cadence_core::ValidationErrors;

    use super::*;

    #[test]
    fn core_errors_map_to_status_codes() {
        let cases = [
            (CoreError::Validation(ValidationErrors::base("bad")), StatusCode::UNPROCESSABLE_ENTITY),
            (CoreError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (CoreError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (CoreError::ConstraintViolation("x".into()), StatusCode::CONFLICT),
            (CoreError::Database("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }
}
