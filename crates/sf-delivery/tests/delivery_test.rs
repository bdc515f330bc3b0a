//! Delivery executor tests against a mock subscriber endpoint

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sf_common::{
    CustomerData, DeliveryError, EventData, EventKind, JobExecutor, LineItemData, OrderPaidData,
    Subscription, WebhookPayload,
};
use sf_delivery::{sign_payload, verify_signature, DeliveryConfig, DeliveryExecutor};
use sf_store::InMemoryOutcomeRepository;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn paid_payload() -> WebhookPayload {
    let created_at = Utc::now() - chrono::Duration::minutes(10);
    WebhookPayload::new(EventData::OrderPaid(OrderPaidData {
        order_id: "O123".to_string(),
        order_number: "1001".to_string(),
        customer: CustomerData {
            id: "C42".to_string(),
            email: "ada@example.com".to_string(),
            name: "Ada Lovelace".to_string(),
        },
        items: vec![LineItemData {
            product_id: "course-rust".to_string(),
            title: "Rust for Educators".to_string(),
            quantity: 1,
            unit_price_cents: 4900,
            total_cents: 4900,
        }],
        total_cents: 4900,
        currency: "USD".to_string(),
        payment_reference: None,
        created_at,
        paid_at: created_at + chrono::Duration::minutes(1),
    }))
    .unwrap()
}

fn executor(outcomes: Arc<InMemoryOutcomeRepository>, timeout: Duration) -> DeliveryExecutor {
    DeliveryExecutor::new(
        DeliveryConfig {
            timeout,
            user_agent: "StorefrontWebhooks/1.0".to_string(),
        },
        outcomes,
    )
    .unwrap()
}

#[tokio::test]
async fn test_successful_delivery_is_signed_and_recorded() {
    let server = MockServer::start().await;
    let payload = paid_payload();
    let expected_signature = sign_payload("abc", &payload.to_json_bytes().unwrap());

    Mock::given(method("POST"))
        .and(path("/hooks/orders"))
        .and(header("content-type", "application/json"))
        .and(header("user-agent", "StorefrontWebhooks/1.0"))
        .and(header("x-webhook-event", "order.paid"))
        .and(header("x-webhook-attempt", "2"))
        .and(header("x-webhook-signature", expected_signature.as_str()))
        .and(header_exists("x-webhook-delivery"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let outcomes = Arc::new(InMemoryOutcomeRepository::new());
    let executor = executor(outcomes.clone(), Duration::from_secs(5));
    let subscription = Subscription::new(
        "crm",
        format!("{}/hooks/orders", server.uri()),
        [EventKind::OrderPaid],
    )
    .with_secret("abc");

    executor.execute("job-1", &subscription, &payload, 2).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(verify_signature("abc", &requests[0].body, &expected_signature));
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["event"], "order.paid");
    assert_eq!(body["data"]["orderId"], "O123");

    let records = outcomes.all();
    assert_eq!(records.len(), 1);
    assert!(records[0].succeeded());
    assert_eq!(records[0].response.status_code, Some(204));
    assert_eq!(records[0].attempt, 2);
    assert_eq!(records[0].job_id, "job-1");
    assert_eq!(records[0].subscription_id, subscription.id);
    assert_eq!(records[0].payload.order_id(), "O123");
}

#[tokio::test]
async fn test_non_2xx_is_failure_and_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let outcomes = Arc::new(InMemoryOutcomeRepository::new());
    let executor = executor(outcomes.clone(), Duration::from_secs(5));
    let subscription = Subscription::new("crm", server.uri(), [EventKind::OrderPaid]);

    let err = executor
        .execute("job-2", &subscription, &paid_payload(), 1)
        .await
        .unwrap_err();
    assert_eq!(err, DeliveryError::Status { status_code: 500 });

    let records = outcomes.all();
    assert_eq!(records.len(), 1);
    assert!(!records[0].succeeded());
    assert_eq!(records[0].response.status_code, Some(500));
    assert!(records[0].response.error.is_some());
}

#[tokio::test]
async fn test_unsigned_delivery_sends_empty_signature() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header_exists("x-webhook-signature"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let outcomes = Arc::new(InMemoryOutcomeRepository::new());
    let executor = executor(outcomes, Duration::from_secs(5));
    let subscription = Subscription::new("crm", server.uri(), [EventKind::OrderPaid]);

    executor.execute("job-3", &subscription, &paid_payload(), 1).await.unwrap();
}

#[tokio::test]
async fn test_custom_headers_override_defaults_but_not_signature() {
    let server = MockServer::start().await;
    let payload = paid_payload();
    let expected_signature = sign_payload("abc", &payload.to_json_bytes().unwrap());

    Mock::given(method("POST"))
        .and(header("user-agent", "Fulfillment/2.0"))
        .and(header("authorization", "Bearer token-1"))
        .and(header("x-webhook-signature", expected_signature.as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let outcomes = Arc::new(InMemoryOutcomeRepository::new());
    let executor = executor(outcomes, Duration::from_secs(5));
    let subscription = Subscription::new("fulfillment", server.uri(), [EventKind::OrderPaid])
        .with_secret("abc")
        .with_header("User-Agent", "Fulfillment/2.0")
        .with_header("Authorization", "Bearer token-1")
        .with_header("X-Webhook-Signature", "sha256=forged");

    executor.execute("job-4", &subscription, &payload, 1).await.unwrap();
}

#[tokio::test]
async fn test_timeout_is_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let outcomes = Arc::new(InMemoryOutcomeRepository::new());
    let executor = executor(outcomes.clone(), Duration::from_millis(50));
    let subscription = Subscription::new("slow", server.uri(), [EventKind::OrderPaid]);

    let err = executor
        .execute("job-5", &subscription, &paid_payload(), 1)
        .await
        .unwrap_err();
    assert_eq!(err, DeliveryError::Timeout { timeout_ms: 50 });

    let records = outcomes.all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].response.status_code, None);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_failure() {
    let outcomes = Arc::new(InMemoryOutcomeRepository::new());
    let executor = executor(outcomes.clone(), Duration::from_secs(2));
    let subscription = Subscription::new("gone", "http://127.0.0.1:1/hook", [EventKind::OrderPaid]);

    let err = executor
        .execute("job-6", &subscription, &paid_payload(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::Transport(_)));
    assert_eq!(outcomes.len(), 1);
}

#[tokio::test]
async fn test_each_attempt_gets_a_fresh_delivery_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let outcomes = Arc::new(InMemoryOutcomeRepository::new());
    let executor = executor(outcomes.clone(), Duration::from_secs(5));
    let subscription = Subscription::new("crm", server.uri(), [EventKind::OrderPaid]);
    let payload = paid_payload();

    executor.execute("job-7", &subscription, &payload, 1).await.unwrap();
    executor.execute("job-7", &subscription, &payload, 2).await.unwrap();

    let records = outcomes.all();
    assert_eq!(records.len(), 2);
    assert_ne!(records[0].delivery_id, records[1].delivery_id);
}
