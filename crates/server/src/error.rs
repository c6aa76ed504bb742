use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use courier_core::TransportError;
use thiserror::Error;

/// Errors that can occur when running the Courier server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The submitted message cannot be delivered as given.
    #[error("invalid email: {0}")]
    Validation(String),

    /// The broker refused or failed to accept the message.
    #[error("broker error: {0}")]
    Transport(#[from] TransportError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) | Self::Io(_) | Self::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match self {
            Self::Validation(msg) => msg,
            other => other.to_string(),
        };

        (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
    }
}
