//! End-to-end dispatch: builders, registry, in-process queue and HTTP delivery

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sf_common::{EventKind, JobState, OutcomeFilter, QueueOptions};
use sf_config::{BackendPreference, QueueConfig};
use sf_delivery::{DeliveryConfig, DeliveryExecutor};
use sf_dispatch::{ServiceConfig, ServiceError, SubscriptionInput, WebhookService};
use sf_events::{
    CartReminderBuilder, Customer, InMemoryOrderStatusStore, Order, OrderItem, OrderStatus,
};
use sf_queue::InProcessQueue;
use sf_store::{InMemoryOutcomeRepository, InMemorySubscriptionRepository};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    service: WebhookService,
    outcomes: Arc<InMemoryOutcomeRepository>,
    orders: Arc<InMemoryOrderStatusStore>,
}

fn harness(cart_reminder_delay: Duration) -> Harness {
    let subscriptions = Arc::new(InMemorySubscriptionRepository::new());
    let outcomes = Arc::new(InMemoryOutcomeRepository::new());
    let orders = Arc::new(InMemoryOrderStatusStore::new());

    let executor = DeliveryExecutor::new(
        DeliveryConfig {
            timeout: Duration::from_secs(2),
            ..Default::default()
        },
        outcomes.clone(),
    )
    .unwrap();
    let queue = InProcessQueue::start(
        &QueueConfig {
            backend: BackendPreference::Memory,
            max_concurrent: 2,
            max_retries: 3,
            retry_delays_ms: vec![20, 40],
            drain_timeout_ms: 2_000,
            ..Default::default()
        },
        Arc::new(executor),
    );

    let service = WebhookService::new(
        ServiceConfig {
            cart_reminder_delay,
            registry_cache_ttl: Duration::ZERO,
        },
        subscriptions,
        outcomes.clone(),
        orders.clone(),
        Arc::new(queue),
    );

    Harness {
        service,
        outcomes,
        orders,
    }
}

fn input(url: &str, events: &[EventKind]) -> SubscriptionInput {
    SubscriptionInput {
        name: "crm".to_string(),
        url: url.to_string(),
        secret: Some("abc".to_string()),
        events: events.iter().copied().collect(),
        headers: BTreeMap::new(),
        active: true,
    }
}

fn order(status: OrderStatus) -> Order {
    let created_at = Utc::now() - chrono::Duration::hours(1);
    Order {
        id: "O123".to_string(),
        order_number: "1001".to_string(),
        status,
        customer: Customer {
            id: "C42".to_string(),
            email: "ada@example.com".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
        },
        items: vec![OrderItem {
            product_id: "course-rust".to_string(),
            title: "Rust for Educators".to_string(),
            quantity: 2,
            unit_price_cents: 2500,
        }],
        total_cents: 5000,
        currency: "USD".to_string(),
        payment_reference: Some("pay_789".to_string()),
        checkout_url: Some("https://shop.example.com/checkout/O123".to_string()),
        created_at,
        paid_at: (status == OrderStatus::Paid).then(|| created_at + chrono::Duration::minutes(10)),
    }
}

async fn wait_for_state(service: &WebhookService, id: &str, state: JobState) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = service.get_job_status(id).await.unwrap();
        if status.as_ref().map(|s| s.state) == Some(state) {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "job {} never reached {:?}, last {:?}",
            id,
            state,
            status
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_dispatch_creates_one_job_per_matching_subscription() {
    let h = harness(Duration::from_secs(60));
    h.service
        .create_subscription(input("https://a.example.com/hooks", &[EventKind::OrderPaid]))
        .await
        .unwrap();
    h.service
        .create_subscription(input(
            "https://b.example.com/hooks",
            &[EventKind::OrderPaid, EventKind::OrderCreated],
        ))
        .await
        .unwrap();
    h.service
        .create_subscription(input("https://c.example.com/hooks", &[EventKind::CartReminder]))
        .await
        .unwrap();

    let delayed = QueueOptions::default().with_delay(Duration::from_secs(60));
    let payload = sf_events::OrderPaidBuilder.build(&order(OrderStatus::Paid)).unwrap();
    let jobs = h.service.dispatch_event(payload, Some(delayed)).await.unwrap();

    assert_eq!(jobs.len(), 2);
    assert_ne!(jobs[0], jobs[1]);
    for id in &jobs {
        let status = h.service.get_job_status(id).await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Waiting);
    }
    h.service.close().await.unwrap();
}

#[tokio::test]
async fn test_dispatch_without_subscribers_enqueues_nothing() {
    let h = harness(Duration::from_secs(60));
    let jobs = h.service.notify_order_created(&order(OrderStatus::Pending)).await.unwrap();
    assert!(jobs.is_empty());
}

#[tokio::test]
async fn test_invalid_order_is_rejected_before_enqueue() {
    let h = harness(Duration::from_secs(60));
    h.service
        .create_subscription(input("https://a.example.com/hooks", &[EventKind::OrderCreated]))
        .await
        .unwrap();

    let mut bad = order(OrderStatus::Pending);
    bad.customer.email = "not-an-email".to_string();
    bad.total_cents = 1;

    let err = h.service.notify_order_created(&bad).await.unwrap_err();
    match err {
        ServiceError::Validation(e) => {
            assert!(e.has_field("customer.email"));
            assert!(e.has_field("totalCents"));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    assert!(h.outcomes.is_empty());
}

#[tokio::test]
async fn test_paid_order_retries_until_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hooks"))
        .and(header_exists("x-webhook-signature"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = harness(Duration::from_secs(60));
    let subscription = h
        .service
        .create_subscription(input(&format!("{}/hooks", server.uri()), &[EventKind::OrderPaid]))
        .await
        .unwrap();

    let jobs = h.service.notify_order_paid(&order(OrderStatus::Paid)).await.unwrap();
    assert_eq!(jobs.len(), 1);
    wait_for_state(&h.service, &jobs[0], JobState::Completed).await;

    let mut records = h.outcomes.all();
    records.sort_by_key(|r| r.attempt);
    assert_eq!(records.len(), 3);
    assert_eq!(records.iter().map(|r| r.attempt).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(records.iter().filter(|r| r.succeeded()).count(), 1);
    assert!(records[2].succeeded());
    assert_eq!(records[0].response.status_code, Some(500));
    assert!(records.iter().all(|r| r.payload.order_id() == "O123"));
    assert!(records.iter().all(|r| r.subscription_id == subscription.id));

    let stats = h.service.delivery_stats(Some(&subscription.id)).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 2);

    let page = h
        .service
        .list_outcomes(
            OutcomeFilter {
                success: Some(false),
                ..Default::default()
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.records.len(), 2);

    h.service.close().await.unwrap();
}

#[tokio::test]
async fn test_cart_reminder_marks_abandoned_once_and_is_delayed() {
    let h = harness(Duration::from_secs(60));
    h.orders.set_status("O123", OrderStatus::Draft);
    h.service
        .create_subscription(input("https://a.example.com/hooks", &[EventKind::CartReminder]))
        .await
        .unwrap();

    let first = h.service.notify_cart_reminder(&order(OrderStatus::Draft)).await.unwrap();
    let second = h.service.notify_cart_reminder(&order(OrderStatus::Draft)).await.unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(h.orders.transitions(), 1);
    assert_eq!(h.orders.status("O123"), Some(OrderStatus::Abandoned));

    let status = h.service.get_job_status(&first[0]).await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Waiting);
    let scheduled = status.scheduled_for.expect("cart reminder should be delayed");
    assert!(scheduled > Utc::now() + chrono::Duration::seconds(50));

    assert!(h.service.cancel_job(&first[0]).await.unwrap());
    assert!(h.service.get_job_status(&first[0]).await.unwrap().is_none());
    h.service.close().await.unwrap();
}

#[tokio::test]
async fn test_cart_reminder_payload_dispatch_abandons_order_once() {
    let h = harness(Duration::from_secs(60));
    h.orders.set_status("O123", OrderStatus::Draft);
    h.service
        .create_subscription(input("https://a.example.com/hooks", &[EventKind::CartReminder]))
        .await
        .unwrap();

    let payload = CartReminderBuilder::new(h.orders.clone())
        .build(&order(OrderStatus::Draft))
        .unwrap();
    assert_eq!(h.orders.transitions(), 0);

    let first = h.service.dispatch_event(payload.clone(), None).await.unwrap();
    let second = h.service.dispatch_event(payload, None).await.unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(h.orders.status("O123"), Some(OrderStatus::Abandoned));
    assert_eq!(h.orders.transitions(), 1);
    h.service.close().await.unwrap();
}

#[tokio::test]
async fn test_out_of_range_queue_options_are_rejected_before_any_effect() {
    let h = harness(Duration::from_secs(60));
    h.orders.set_status("O123", OrderStatus::Draft);
    h.service
        .create_subscription(input("https://a.example.com/hooks", &[EventKind::CartReminder]))
        .await
        .unwrap();

    let payload = CartReminderBuilder::new(h.orders.clone())
        .build(&order(OrderStatus::Draft))
        .unwrap();
    let options = QueueOptions::default().with_delay(Duration::from_millis(10_000_000_000_000_000));

    let err = h.service.dispatch_event(payload, Some(options)).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(ref e) if e.has_field("delayMs")));
    assert_eq!(h.orders.transitions(), 0);
    assert_eq!(h.orders.status("O123"), Some(OrderStatus::Draft));
}

#[tokio::test]
async fn test_cart_reminder_rejects_paid_order_without_transition() {
    let h = harness(Duration::from_secs(60));
    h.orders.set_status("O123", OrderStatus::Paid);

    let err = h.service.notify_cart_reminder(&order(OrderStatus::Paid)).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(ref e) if e.has_field("status")));
    assert_eq!(h.orders.transitions(), 0);
}

#[tokio::test]
async fn test_subscription_lifecycle() {
    let h = harness(Duration::from_secs(60));

    let mut bad = input("ftp://a.example.com", &[]);
    bad.name = String::new();
    let err = h.service.create_subscription(bad).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Validation(ref e) if e.has_field("url") && e.has_field("events")
    ));

    let created = h
        .service
        .create_subscription(input("https://a.example.com/hooks", &[EventKind::OrderCreated]))
        .await
        .unwrap();

    let mut replacement = input("https://b.example.com/hooks", &[EventKind::OrderCreated]);
    replacement.secret = None;
    let updated = h.service.update_subscription(&created.id, replacement).await.unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.url, "https://b.example.com/hooks");
    assert!(updated.secret.is_none());

    let missing = h
        .service
        .update_subscription("nope", input("https://a.example.com", &[EventKind::OrderCreated]))
        .await
        .unwrap_err();
    assert!(matches!(missing, ServiceError::NotFound { .. }));

    h.service.delete_subscription(&created.id).await.unwrap();
    assert!(h.service.get_subscription(&created.id).await.unwrap().is_none());
    assert!(matches!(
        h.service.delete_subscription(&created.id).await.unwrap_err(),
        ServiceError::NotFound { .. }
    ));

    assert!(h.service.list_subscriptions(false).await.unwrap().is_empty());
    assert_eq!(h.service.list_subscriptions(true).await.unwrap().len(), 1);

    let jobs = h.service.notify_order_created(&order(OrderStatus::Pending)).await.unwrap();
    assert!(jobs.is_empty());
}

#[tokio::test]
async fn test_inactive_subscription_receives_nothing() {
    let h = harness(Duration::from_secs(60));
    let mut paused = input("https://a.example.com/hooks", &[EventKind::OrderCreated]);
    paused.active = false;
    h.service.create_subscription(paused).await.unwrap();

    let jobs = h.service.notify_order_created(&order(OrderStatus::Pending)).await.unwrap();
    assert!(jobs.is_empty());
    assert_eq!(h.service.backend_name(), "in-process");
}
