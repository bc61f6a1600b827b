//! The single error type returned by every handler and service.
//!
//! `AppError` renders as `{ "ok": false, "message": ... }` with the matching
//! HTTP status. Internal failures are logged and reported with a generic
//! message.

use axum::{
    Json,
    extract::{
        FromRequest, FromRequestParts, Path,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed input. 400.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or invalid credentials. 401.
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated but not allowed. 403.
    #[error("{0}")]
    Forbidden(String),

    /// No matching user, friendship, resource or permission. 404.
    #[error("{0}")]
    NotFound(String),

    /// Route exists but not for this method. 405.
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Uniqueness or state invariant violated. 409.
    #[error("{0}")]
    Conflict(String),

    /// Well-formed request that fails field validation. 422.
    #[error("{0}")]
    Unprocessable(String),

    /// Anything raised by the database layer that is not a constraint violation. 500.
    #[error(transparent)]
    Database(anyhow::Error),

    /// 500 with a custom message that is logged, never returned.
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// SQLite constraint violations (duplicate username, duplicate edge, ...)
/// surface as conflicts; everything else from the database is internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let constraint = err
            .downcast_ref::<rusqlite::Error>()
            .and_then(|e| e.sqlite_error_code())
            == Some(rusqlite::ErrorCode::ConstraintViolation);

        if constraint {
            warn!("Constraint violation: {}", err);
            AppError::Conflict("Record conflicts with existing data".to_string())
        } else {
            AppError::Database(err)
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(msg) => msg.to_string(),
                    None => format!("Invalid value for '{}'", field),
                })
            })
            .collect();
        messages.sort();
        messages.dedup();
        AppError::Unprocessable(messages.join(" "))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        if rejection.status().is_server_error() {
            AppError::Internal(rejection.body_text())
        } else {
            AppError::BadRequest(rejection.body_text())
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Database(err) => {
                error!("Database error: {:#}", err);
                "Internal server error".to_string()
            }
            Self::Internal(msg) => {
                error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "ok": false, "message": message }))).into_response()
    }
}

/// `Json` extractor whose rejections use the `{ok, message}` error body.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// `Path` extractor with the same error body.
#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_of(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn renders_envelope_with_status() {
        let (status, body) = body_of(AppError::Conflict("already friends".into())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["ok"], false);
        assert_eq!(body["message"], "already friends");
    }

    #[tokio::test]
    async fn hides_internal_details() {
        let (status, body) = body_of(AppError::Database(anyhow::anyhow!("disk on fire"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
    }

    #[test]
    fn constraint_violations_become_conflicts() {
        let sqlite = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed: users.email".into()),
        );
        let err: AppError = anyhow::Error::from(sqlite).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err: AppError = anyhow::anyhow!("something else").into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
