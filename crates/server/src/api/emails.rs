//! Message submission.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use courier_core::EmailMessage;
use serde::Serialize;
use tracing::{debug, warn};

use super::AppState;
use crate::error::ServerError;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub status: &'static str,
    pub recipients: usize,
}

/// `POST /v1/emails`: validate the message and hand it to the broker.
///
/// Acceptance only means the broker took the message; delivery happens
/// later on one of the consumers.
pub async fn submit(
    State(state): State<AppState>,
    Json(message): Json<EmailMessage>,
) -> Result<(StatusCode, Json<SubmitResponse>), ServerError> {
    validate(&message)?;

    if let Err(e) = state.producer.produce(&message).await {
        warn!(error = %e, backend = state.producer.backend_name(), "publish failed");
        return Err(e.into());
    }

    let recipients = message.recipients().count();
    debug!(subject = %message.subject, recipients, "email queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            status: "queued",
            recipients,
        }),
    ))
}

fn validate(message: &EmailMessage) -> Result<(), ServerError> {
    if message.from.trim().is_empty() {
        return Err(ServerError::Validation("`from` is required".to_owned()));
    }
    if message.recipients().all(|r| r.trim().is_empty()) {
        return Err(ServerError::Validation(
            "at least one recipient is required".to_owned(),
        ));
    }
    Ok(())
}
