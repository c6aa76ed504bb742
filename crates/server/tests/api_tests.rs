use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{self, Request, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::mpsc;
use tower::ServiceExt;

use courier_broker::{
    BrokerConsumer, ChannelObserver, ConsumerFactory, ConsumerPool, EmailConsumer, EmailSentEvent,
    MemoryBroker,
};
use courier_core::TransportError;
use courier_server::api::{AppState, router};
use courier_smtp::{EmailSender, MockSmtpConnector};

// -- Mock consumers -------------------------------------------------------

struct MockConsumerFactory {
    broker: MemoryBroker,
}

#[async_trait]
impl ConsumerFactory for MockConsumerFactory {
    async fn create(&self, index: usize) -> Result<Box<dyn EmailConsumer>, TransportError> {
        let sender = EmailSender::new(Box::new(MockSmtpConnector::new()), Duration::from_secs(30));
        Ok(Box::new(BrokerConsumer::new(
            format!("test-consumer-{index}"),
            self.broker.source(),
            sender,
        )))
    }
}

// -- Helpers --------------------------------------------------------------

struct Harness {
    broker: MemoryBroker,
    pool: Arc<ConsumerPool>,
    events: mpsc::Receiver<EmailSentEvent>,
    app: axum::Router,
}

async fn harness(consumers: usize) -> Harness {
    let broker = MemoryBroker::default();
    let pool = Arc::new(ConsumerPool::new(Arc::new(MockConsumerFactory {
        broker: broker.clone(),
    })));
    let (observer, events) = ChannelObserver::new(16);
    pool.add_observer(Arc::new(observer)).await;
    pool.start(consumers).await.unwrap();

    let app = router(AppState {
        producer: Arc::new(broker.producer()),
        pool: Arc::clone(&pool),
    });
    Harness {
        broker,
        pool,
        events,
        app,
    }
}

async fn post_email(app: axum::Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    post_raw(app, body.to_string()).await
}

async fn post_raw(app: axum::Router, body: String) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method(http::Method::POST)
                .uri("/v1/emails")
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn next_event(rx: &mut mpsc::Receiver<EmailSentEvent>) -> EmailSentEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("observer channel closed")
}

// -- Health ---------------------------------------------------------------

#[tokio::test]
async fn health_reports_backend_and_consumers() {
    let h = harness(2).await;

    let response = h
        .app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["backend"], "memory");
    assert_eq!(json["consumers"], 2);
    assert_eq!(json["running"], 2);

    h.pool.stop_all().await;
}

// -- Submission -----------------------------------------------------------

#[tokio::test]
async fn accepted_email_is_delivered() {
    let mut h = harness(1).await;

    let (status, json) = post_email(
        h.app.clone(),
        serde_json::json!({
            "from": "noreply@example.com",
            "to": ["alice@example.com"],
            "cc": ["bob@example.com"],
            "subject": "Welcome",
            "textContent": "hello",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["status"], "queued");
    assert_eq!(json["recipients"], 2);

    let event = next_event(&mut h.events).await;
    assert_eq!(event.subject, "Welcome");
    assert_eq!(event.to, vec!["alice@example.com"]);
    assert_eq!(event.consumer_id, "test-consumer-0");

    h.pool.stop_all().await;
}

#[tokio::test]
async fn capitalized_fields_and_attachments_are_accepted() {
    let mut h = harness(1).await;

    let (status, _) = post_email(
        h.app.clone(),
        serde_json::json!({
            "From": "noreply@example.com",
            "To": ["alice@example.com"],
            "Subject": "Invoice",
            "HtmlContent": "<p>attached</p>",
            "Attachments": { "invoice.pdf": STANDARD.encode(b"%PDF-1.4") },
        }),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(next_event(&mut h.events).await.subject, "Invoice");

    h.pool.stop_all().await;
}

#[tokio::test]
async fn missing_sender_is_rejected() {
    let h = harness(1).await;

    let (status, json) = post_email(
        h.app.clone(),
        serde_json::json!({ "to": ["alice@example.com"], "subject": "no sender" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("from"));
    assert_eq!(h.broker.published(), 0);

    h.pool.stop_all().await;
}

#[tokio::test]
async fn missing_recipients_are_rejected() {
    let h = harness(1).await;

    let (status, json) = post_email(
        h.app.clone(),
        serde_json::json!({ "from": "noreply@example.com", "subject": "nobody" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("recipient"));
    assert_eq!(h.broker.published(), 0);

    h.pool.stop_all().await;
}

#[tokio::test]
async fn malformed_json_is_a_client_error() {
    let h = harness(1).await;

    let (status, _) = post_raw(h.app.clone(), "{not json".to_owned()).await;
    assert!(status.is_client_error());
    assert_eq!(h.broker.published(), 0);

    h.pool.stop_all().await;
}

#[tokio::test]
async fn closed_broker_is_a_server_error() {
    let h = harness(1).await;
    h.broker.close();

    let (status, json) = post_email(
        h.app.clone(),
        serde_json::json!({
            "from": "noreply@example.com",
            "to": ["alice@example.com"],
            "subject": "too late",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().starts_with("broker error"));

    h.pool.stop_all().await;
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let h = harness(0).await;

    let response = h
        .app
        .oneshot(
            Request::builder()
                .uri("/v1/unknown")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
