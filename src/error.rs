use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
};
use thiserror::Error;

use crate::admin::auth::AuthError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid deal: {0}")]
    Validation(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Write failed: {0}")]
    Write(#[source] sqlx::Error),

    #[error("Live feed unavailable: {0}")]
    Subscription(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(e) => e.status(),
            AppError::Subscription(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::UNAUTHORIZED {
            return (status, [(header::LOCATION, "/login")], self.to_string()).into_response();
        }
        (status, self.to_string()).into_response()
    }
}
