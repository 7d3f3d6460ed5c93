use crate::services::asset_service::AssetError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

const INTERNAL_MESSAGE: &str = "internal server error";

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<AssetError> for AppError {
    fn from(err: AssetError) -> Self {
        let status = match &err {
            AssetError::InvalidBucket(_)
            | AssetError::InvalidId
            | AssetError::InvalidFormat(_)
            | AssetError::EmptyBody => StatusCode::BAD_REQUEST,
            AssetError::NotFound { .. } | AssetError::NoFallback { .. } => StatusCode::NOT_FOUND,
            AssetError::AlreadyExists { .. } => StatusCode::CONFLICT,
            AssetError::NotOwner => StatusCode::FORBIDDEN,
            AssetError::Storage(_) | AssetError::Transform(_) => {
                tracing::error!("request failed: {}", err);
                return AppError::internal(INTERNAL_MESSAGE);
            }
        };
        AppError::new(status, err.to_string())
    }
}
