//! Error types for the Greenlight server.
//!
//! Every failure a handler or middleware can produce is an [`ApiError`].
//! Errors render as a JSON envelope with a single `error` field:
//!
//! ```json
//! { "error": "rate limit exceeded" }
//! ```
//!
//! Validation failures carry a map of field names to messages in place of
//! the string.

use std::collections::BTreeMap;

use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::identity::IdentityError;
use crate::store::StoreError;

/// Message returned for any internal failure; details go to the log only.
const SERVER_ERROR_MESSAGE: &str =
    "the server encountered a problem and could not process your request";

/// Top-level error type for HTTP handlers and middleware.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The route or record does not exist.
    #[error("the requested resource could not be found")]
    NotFound,

    /// The route exists but not for this method.
    #[error("the {0} method is not supported for this resource")]
    MethodNotAllowed(Method),

    /// The request body or query could not be decoded.
    #[error("{0}")]
    BadRequest(String),

    /// The request decoded fine but failed validation.
    #[error("failed validation")]
    FailedValidation(BTreeMap<String, String>),

    /// The record changed between read and write.
    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,

    /// The client has no tokens left.
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// Unexpected failure on the server side.
    #[error("internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Creates a new bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Creates a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::FailedValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::EditConflict => StatusCode::CONFLICT,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound,
            StoreError::EditConflict => Self::EditConflict,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match self {
            Self::FailedValidation(errors) => json!({ "error": errors }),
            Self::Internal(ref detail) => {
                error!(error = %detail, "Request failed with internal error");
                json!({ "error": SERVER_ERROR_MESSAGE })
            }
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

/// A specialized Result type for handlers.
pub type Result<T> = std::result::Result<T, ApiError>;
