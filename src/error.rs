use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use thiserror::Error;

use crate::services::encryption::EncryptionError;

pub const LOGIN_PATH: &str = "/profile/login";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller lacks the role for the page; the page they wanted has
    /// already been stored in the session.
    #[error("Login required")]
    LoginRequired,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Graph error: {0}")]
    Graph(#[from] image::ImageError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<tower_sessions::session::Error> for AppError {
    fn from(e: tower_sessions::session::Error) -> Self {
        AppError::Session(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::LoginRequired = self {
            return Redirect::to(LOGIN_PATH).into_response();
        }

        tracing::error!(error = ?self, "Request failed");

        let (status, message) = match self {
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
            ),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Session(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Session error".to_string(),
            ),
            AppError::Encryption(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Graph(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not render graph".to_string(),
            ),
            AppError::Internal(_) | AppError::LoginRequired => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        (status, message).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
