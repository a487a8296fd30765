//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use profiles_db::DbError;
use profiles_models::FieldErrors;

use crate::auth::AuthError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(FieldErrors),

    #[error("Conflict: {0}")]
    Conflict(FieldErrors),

    #[error("Rate limited")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(DbError),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// A validation failure on a single field.
    pub fn invalid_field(field: &str, msg: impl Into<String>) -> Self {
        Self::Validation(FieldErrors::single(field, msg))
    }

    /// A uniqueness conflict on a single field.
    pub fn conflict(field: &str, msg: impl Into<String>) -> Self {
        Self::Conflict(FieldErrors::single(field, msg))
    }

    /// Field errors carried by this error, if any.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            ApiError::Validation(errors) | ApiError::Conflict(errors) => Some(errors),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Validation(_) | ApiError::Conflict(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) | ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "invalid_token",
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Validation(_) => "validation_error",
            ApiError::Conflict(_) => "conflict",
            ApiError::RateLimited => "rate_limited",
            ApiError::Internal(_) | ApiError::Database(_) => "internal_error",
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            // Our key fetch failed, not the caller's token
            AuthError::KeysUnavailable(_) => ApiError::Internal(err.to_string()),
            other => ApiError::Unauthorized(other.to_string()),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => ApiError::NotFound(what),
            DbError::UniqueViolation { field } => {
                let message = unique_message(&field);
                ApiError::Conflict(FieldErrors::single(field, message))
            }
            other => ApiError::Database(other),
        }
    }
}

/// Client-facing message for a violated unique column.
pub(crate) fn unique_message(field: &str) -> String {
    match field {
        "phone_number" => "Phone number already exists.".to_string(),
        "email" => "A user with this email already exists.".to_string(),
        "external_subject_id" => "This account is already linked to another user.".to_string(),
        other => format!("A user with this {} already exists.", other.replace('_', " ")),
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<FieldErrors>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal details never leave the process
        let detail = match &self {
            ApiError::Internal(_) | ApiError::Database(_) => {
                error!(error = %self, "request failed");
                "An internal error occurred".to_string()
            }
            ApiError::Validation(_) | ApiError::Conflict(_) => "Invalid input.".to_string(),
            ApiError::Unauthorized(msg)
            | ApiError::NotFound(msg)
            | ApiError::BadRequest(msg) => msg.clone(),
            ApiError::RateLimited => "Rate limit exceeded. Please try again later.".to_string(),
        };

        let code = self.code();
        let errors = match self {
            ApiError::Validation(errors) | ApiError::Conflict(errors) => Some(errors),
            _ => None,
        };

        let body = ErrorResponse { detail, code, errors };

        (status, Json(body)).into_response()
    }
}
