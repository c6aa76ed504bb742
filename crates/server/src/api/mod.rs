pub mod emails;
pub mod health;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use courier_broker::{ConsumerPool, EmailProducer};
use tower_http::trace::TraceLayer;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Publishes accepted messages to the broker.
    pub producer: Arc<dyn EmailProducer>,
    /// Consumers draining the broker into SMTP.
    pub pool: Arc<ConsumerPool>,
}

/// Build the Axum router with all API routes and middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/v1/emails", post(emails::submit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
