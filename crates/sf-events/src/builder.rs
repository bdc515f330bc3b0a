//! Per-event payload builders
//!
//! Each builder maps an [`Order`] into the flat data record for its event
//! kind and validates the result. Order status must be compatible with the
//! event: `order.paid` requires a paid order, `cart.reminder` a draft or
//! abandoned one. Building never changes order state; the cart reminder's
//! `draft -> abandoned` transition is a separate, idempotent step.

use std::sync::Arc;

use chrono::Utc;
use sf_common::{
    CartReminderData, CustomerData, EventData, LineItemData, OrderCreatedData, OrderPaidData,
    ValidationError, Violations, WebhookPayload,
};
use tracing::{debug, info};

use crate::domain::{Customer, Order, OrderItem, OrderStatus};
use crate::store::{OrderStatusStore, OrderStoreError};

fn customer_data(customer: &Customer) -> CustomerData {
    CustomerData {
        id: customer.id.clone(),
        email: customer.email.clone(),
        name: customer.full_name(),
    }
}

fn line_items(items: &[OrderItem]) -> Vec<LineItemData> {
    items
        .iter()
        .map(|item| LineItemData {
            product_id: item.product_id.clone(),
            title: item.title.clone(),
            quantity: item.quantity,
            unit_price_cents: item.unit_price_cents,
            total_cents: item.line_total_cents(),
        })
        .collect()
}

/// Validate `data` together with the status checks already collected
fn finish(mut violations: Violations, data: EventData) -> Result<WebhookPayload, ValidationError> {
    violations.merge(data.validate());
    violations.into_result()?;
    WebhookPayload::new(data)
}

// ============================================================================
// order.created
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderCreatedBuilder;

impl OrderCreatedBuilder {
    pub fn build(&self, order: &Order) -> Result<WebhookPayload, ValidationError> {
        let data = EventData::OrderCreated(OrderCreatedData {
            order_id: order.id.clone(),
            order_number: order.order_number.clone(),
            status: order.status.to_string(),
            customer: customer_data(&order.customer),
            items: line_items(&order.items),
            total_cents: order.total_cents,
            currency: order.currency.clone(),
            created_at: order.created_at,
        });
        finish(Violations::new(), data)
    }
}

// ============================================================================
// order.paid
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderPaidBuilder;

impl OrderPaidBuilder {
    pub fn build(&self, order: &Order) -> Result<WebhookPayload, ValidationError> {
        let mut violations = Violations::new();
        violations.check(
            order.status == OrderStatus::Paid,
            "status",
            format!("must be 'paid' for order.paid, got '{}'", order.status),
        );

        violations.check(order.paid_at.is_some(), "paidAt", "is required");

        // A missing paidAt already fails above; the placeholder only lets the
        // remaining fields be checked in the same pass.
        let paid_at = order.paid_at.unwrap_or(order.created_at);
        finish(violations, EventData::OrderPaid(self.data(order, paid_at)))
    }

    fn data(&self, order: &Order, paid_at: chrono::DateTime<Utc>) -> OrderPaidData {
        OrderPaidData {
            order_id: order.id.clone(),
            order_number: order.order_number.clone(),
            customer: customer_data(&order.customer),
            items: line_items(&order.items),
            total_cents: order.total_cents,
            currency: order.currency.clone(),
            payment_reference: order.payment_reference.clone(),
            created_at: order.created_at,
            paid_at,
        }
    }
}

// ============================================================================
// cart.reminder
// ============================================================================

/// Builds cart reminders and moves their draft orders to abandoned
#[derive(Clone)]
pub struct CartReminderBuilder {
    store: Arc<dyn OrderStatusStore>,
}

impl CartReminderBuilder {
    pub fn new(store: Arc<dyn OrderStatusStore>) -> Self {
        Self { store }
    }

    pub fn build(&self, order: &Order) -> Result<WebhookPayload, ValidationError> {
        let mut violations = Violations::new();
        violations.check(
            matches!(order.status, OrderStatus::Draft | OrderStatus::Abandoned),
            "status",
            format!(
                "must be 'draft' or 'abandoned' for cart.reminder, got '{}'",
                order.status
            ),
        );

        let data = EventData::CartReminder(CartReminderData {
            order_id: order.id.clone(),
            customer: customer_data(&order.customer),
            items: line_items(&order.items),
            total_cents: order.total_cents,
            currency: order.currency.clone(),
            checkout_url: order.checkout_url.clone(),
            created_at: order.created_at,
        });
        finish(violations, data)
    }

    /// Transition `order_id` from `draft` to `abandoned`.
    ///
    /// Returns whether this call performed the transition; an order that
    /// already left draft is left untouched.
    pub async fn abandon(&self, order_id: &str) -> Result<bool, OrderStoreError> {
        let transitioned = self.store.mark_abandoned(order_id).await?;
        if transitioned {
            info!(order_id, "Order marked as abandoned");
        } else {
            debug!(order_id, "Order already left draft, no status change");
        }
        Ok(transitioned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryOrderStatusStore;
    use sf_common::EventKind;

    fn order(status: OrderStatus) -> Order {
        let created_at = Utc::now() - chrono::Duration::hours(2);
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
            items: vec![
                OrderItem {
                    product_id: "course-rust".to_string(),
                    title: "Rust for Educators".to_string(),
                    quantity: 1,
                    unit_price_cents: 4900,
                },
                OrderItem {
                    product_id: "ebook-async".to_string(),
                    title: "Async in Practice".to_string(),
                    quantity: 2,
                    unit_price_cents: 1500,
                },
            ],
            total_cents: 7900,
            currency: "USD".to_string(),
            payment_reference: None,
            checkout_url: Some("https://shop.example.com/checkout/O123".to_string()),
            created_at,
            paid_at: None,
        }
    }

    #[test]
    fn test_order_created_payload() {
        let payload = OrderCreatedBuilder.build(&order(OrderStatus::Pending)).unwrap();
        assert_eq!(payload.event(), EventKind::OrderCreated);
        assert_eq!(payload.order_id(), "O123");

        match payload.data() {
            EventData::OrderCreated(data) => {
                assert_eq!(data.customer.name, "Ada Lovelace");
                assert_eq!(data.items[1].total_cents, 3000);
                assert_eq!(data.status, "pending");
            }
            other => panic!("unexpected data: {:?}", other),
        }
    }

    #[test]
    fn test_order_paid_requires_paid_status_and_paid_at() {
        let err = OrderPaidBuilder.build(&order(OrderStatus::Pending)).unwrap_err();
        assert!(err.has_field("status"));
        assert!(err.has_field("paidAt"));

        let mut paid = order(OrderStatus::Paid);
        paid.paid_at = Some(paid.created_at + chrono::Duration::minutes(3));
        paid.payment_reference = Some("pi_123".to_string());
        let payload = OrderPaidBuilder.build(&paid).unwrap();
        assert_eq!(payload.event(), EventKind::OrderPaid);
    }

    #[test]
    fn test_collects_every_violation() {
        let mut bad = order(OrderStatus::Pending);
        bad.customer.email = "not-an-email".to_string();
        bad.currency = "usd".to_string();
        bad.total_cents = 1;

        let err = OrderCreatedBuilder.build(&bad).unwrap_err();
        assert!(err.has_field("customer.email"));
        assert!(err.has_field("currency"));
        assert!(err.has_field("totalCents"));
    }

    #[tokio::test]
    async fn test_cart_reminder_abandons_order_once() {
        let store = Arc::new(InMemoryOrderStatusStore::new());
        store.set_status("O123", OrderStatus::Draft);
        let builder = CartReminderBuilder::new(store.clone());

        let payload = builder.build(&order(OrderStatus::Draft)).unwrap();
        assert_eq!(payload.event(), EventKind::CartReminder);
        assert_eq!(store.transitions(), 0);

        assert!(builder.abandon(payload.order_id()).await.unwrap());
        assert!(!builder.abandon(payload.order_id()).await.unwrap());
        assert_eq!(store.status("O123"), Some(OrderStatus::Abandoned));
        assert_eq!(store.transitions(), 1);
    }

    #[test]
    fn test_cart_reminder_rejects_paid_order() {
        let store = Arc::new(InMemoryOrderStatusStore::new());
        store.set_status("O123", OrderStatus::Draft);
        let builder = CartReminderBuilder::new(store.clone());

        let err = builder.build(&order(OrderStatus::Paid)).unwrap_err();
        assert!(err.has_field("status"));
        assert_eq!(store.status("O123"), Some(OrderStatus::Draft));
    }
}
