//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use keepsake_engine::Error as StoreError;
use serde::Serialize;

use crate::remote::RemoteError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

impl AppError {
    fn status(&self) -> (StatusCode, Option<&'static str>) {
        match self {
            AppError::Store(e) => match e {
                StoreError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, Some("validation")),
                StoreError::RecordNotFound(_) => (StatusCode::NOT_FOUND, Some("not_found")),
                StoreError::InvalidRecord(_) => (StatusCode::BAD_REQUEST, Some("invalid_record")),
                StoreError::CollectionMismatch { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, None)
                }
                StoreError::Fetch(_) => (StatusCode::BAD_GATEWAY, Some("fetch")),
                StoreError::RemoteWrite { .. } => (StatusCode::BAD_GATEWAY, Some("remote_write")),
                StoreError::NotificationChannel(_) => {
                    (StatusCode::BAD_GATEWAY, Some("notification_channel"))
                }
            },
            AppError::Remote(_) => (StatusCode::BAD_GATEWAY, None),
            AppError::Database(_) | AppError::Migration(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, Some("not_found")),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status();

        let error = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            match &self {
                AppError::Database(_) | AppError::Migration(_) => "Database error".to_string(),
                _ => self.to_string(),
            }
        } else {
            tracing::debug!(error = %self, "Request rejected");
            self.to_string()
        };

        (status, Json(ErrorResponse { error, kind })).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
