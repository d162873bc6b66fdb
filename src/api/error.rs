use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::DbErr;
use serde_json::json;
use thiserror::Error;

use crate::checkout::{CheckoutError, ErrorKind};

const INTERNAL_MESSAGE: &str = "internal server error";

/// Handler failure. Renders as `{success: false, message, error?}` and is
/// also attached to the response for `logging_middleware`.
#[derive(Clone, Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest {
        message: String,
        detail: Option<String>,
    },
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    /// The payload is logged but never sent to the client.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            detail: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::BadRequest {
                message,
                detail: Some(detail),
            } => json!({ "success": false, "message": message, "error": detail }),
            Self::Internal(_) => json!({ "success": false, "message": INTERNAL_MESSAGE }),
            other => json!({ "success": false, "message": other.to_string() }),
        };

        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(Err::<(), ApiError>(self));
        response
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        match err.kind() {
            ErrorKind::Validation | ErrorKind::Conflict => Self::bad_request(err.to_string()),
            ErrorKind::Infrastructure => Self::Internal(err.to_string()),
        }
    }
}

impl From<DbErr> for ApiError {
    fn from(err: DbErr) -> Self {
        Self::Internal(format!("database error: {err}"))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest {
            message: "invalid request body".into(),
            detail: Some(rejection.body_text()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::BadRequest {
            message: "validation failed".into(),
            detail: Some(errors.to_string()),
        }
    }
}
