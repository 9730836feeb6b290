// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transaction not found")]
    NotFound,

    #[error("M-Pesa auth error: {0}")]
    Auth(String),

    #[error("M-Pesa error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound => (StatusCode::NOT_FOUND, "Transaction not found".to_string()),
            // Provider/auth failures carry the provider's message through
            // so the caller sees what Daraja rejected.
            AppError::Auth(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Provider(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Configuration(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
            ),
        };

        let body = Json(json!({
            "success": false,
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Provider(format!("HTTP request failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
