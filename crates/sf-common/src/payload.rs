//! Webhook payloads
//!
//! On the wire a payload is `{ "event", "data", "timestamp" }`. In memory the
//! `data` is a tagged variant per event kind so the kind and the data shape can
//! never disagree. Payloads are validated when constructed and immutable after.

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::validation::{ValidationError, Violations};
use crate::EventKind;

// ============================================================================
// Event Data Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerData {
    pub id: String,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemData {
    pub product_id: String,
    pub title: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub total_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedData {
    pub order_id: String,
    pub order_number: String,
    pub status: String,
    pub customer: CustomerData,
    pub items: Vec<LineItemData>,
    pub total_cents: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPaidData {
    pub order_id: String,
    pub order_number: String,
    pub customer: CustomerData,
    pub items: Vec<LineItemData>,
    pub total_cents: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartReminderData {
    pub order_id: String,
    pub customer: CustomerData,
    pub items: Vec<LineItemData>,
    pub total_cents: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Event-specific payload data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventData {
    OrderCreated(OrderCreatedData),
    OrderPaid(OrderPaidData),
    CartReminder(CartReminderData),
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            EventData::OrderCreated(_) => EventKind::OrderCreated,
            EventData::OrderPaid(_) => EventKind::OrderPaid,
            EventData::CartReminder(_) => EventKind::CartReminder,
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            EventData::OrderCreated(d) => &d.order_id,
            EventData::OrderPaid(d) => &d.order_id,
            EventData::CartReminder(d) => &d.order_id,
        }
    }

    /// Check the data against its event kind's schema
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut v = Violations::new();

        match self {
            EventData::OrderCreated(d) => {
                v.identifier("orderId", &d.order_id);
                v.required("orderNumber", &d.order_number);
                v.required("status", &d.status);
                validate_customer(&d.customer, &mut v);
                validate_items(&d.items, d.total_cents, &mut v);
                v.currency("currency", &d.currency);
            }
            EventData::OrderPaid(d) => {
                v.identifier("orderId", &d.order_id);
                v.required("orderNumber", &d.order_number);
                validate_customer(&d.customer, &mut v);
                validate_items(&d.items, d.total_cents, &mut v);
                v.currency("currency", &d.currency);
                v.check(
                    d.paid_at >= d.created_at,
                    "paidAt",
                    "must not be earlier than createdAt",
                );
                if let Some(reference) = &d.payment_reference {
                    v.required("paymentReference", reference);
                }
            }
            EventData::CartReminder(d) => {
                v.identifier("orderId", &d.order_id);
                validate_customer(&d.customer, &mut v);
                validate_items(&d.items, d.total_cents, &mut v);
                v.currency("currency", &d.currency);
                if let Some(url) = &d.checkout_url {
                    v.check(
                        url.starts_with("https://") || url.starts_with("http://"),
                        "checkoutUrl",
                        "must be an absolute http(s) URL",
                    );
                }
            }
        }

        v.into_result()
    }
}

fn validate_customer(customer: &CustomerData, v: &mut Violations) {
    v.identifier("customer.id", &customer.id);
    v.email("customer.email", &customer.email);
    v.required("customer.name", &customer.name);
}

fn validate_items(items: &[LineItemData], total_cents: i64, v: &mut Violations) {
    v.check(!items.is_empty(), "items", "must contain at least one line item");

    let mut sum: i64 = 0;
    for (i, item) in items.iter().enumerate() {
        v.identifier(&format!("items[{}].productId", i), &item.product_id);
        v.required(&format!("items[{}].title", i), &item.title);
        v.check(item.quantity >= 1, format!("items[{}].quantity", i), "must be at least 1");
        v.non_negative(&format!("items[{}].unitPriceCents", i), item.unit_price_cents);
        v.check(
            item.total_cents == item.unit_price_cents.saturating_mul(i64::from(item.quantity)),
            format!("items[{}].totalCents", i),
            "must equal unitPriceCents * quantity",
        );
        sum = sum.saturating_add(item.total_cents);
    }

    v.non_negative("totalCents", total_cents);
    if !items.is_empty() {
        v.check(sum == total_cents, "totalCents", "must equal the sum of line item totals");
    }
}

// ============================================================================
// Payload Envelope
// ============================================================================

/// Immutable, validated webhook payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawPayload")]
pub struct WebhookPayload {
    data: EventData,
    timestamp: DateTime<Utc>,
}

impl WebhookPayload {
    /// Validate `data` and stamp it with the current time
    pub fn new(data: EventData) -> Result<Self, ValidationError> {
        Self::with_timestamp(data, Utc::now())
    }

    pub fn with_timestamp(
        data: EventData,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        data.validate()?;
        Ok(Self { data, timestamp })
    }

    pub fn event(&self) -> EventKind {
        self.data.kind()
    }

    pub fn data(&self) -> &EventData {
        &self.data
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn order_id(&self) -> &str {
        self.data.order_id()
    }

    /// Re-run schema validation
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.data.validate()
    }

    /// Serialize to the exact bytes sent as the request body
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Serialize for WebhookPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("WebhookPayload", 3)?;
        state.serialize_field("event", &self.event())?;
        match &self.data {
            EventData::OrderCreated(d) => state.serialize_field("data", d)?,
            EventData::OrderPaid(d) => state.serialize_field("data", d)?,
            EventData::CartReminder(d) => state.serialize_field("data", d)?,
        }
        state.serialize_field("timestamp", &self.timestamp)?;
        state.end()
    }
}

#[derive(Deserialize)]
struct RawPayload {
    event: EventKind,
    data: serde_json::Value,
    timestamp: DateTime<Utc>,
}

impl TryFrom<RawPayload> for WebhookPayload {
    type Error = serde_json::Error;

    fn try_from(raw: RawPayload) -> Result<Self, Self::Error> {
        let data = match raw.event {
            EventKind::OrderCreated => EventData::OrderCreated(serde_json::from_value(raw.data)?),
            EventKind::OrderPaid => EventData::OrderPaid(serde_json::from_value(raw.data)?),
            EventKind::CartReminder => EventData::CartReminder(serde_json::from_value(raw.data)?),
        };
        Ok(Self {
            data,
            timestamp: raw.timestamp,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn customer() -> CustomerData {
        CustomerData {
            id: "C42".to_string(),
            email: "ada@example.com".to_string(),
            name: "Ada Lovelace".to_string(),
        }
    }

    fn item(price: i64, qty: u32) -> LineItemData {
        LineItemData {
            product_id: "course-rust-101".to_string(),
            title: "Rust for Educators".to_string(),
            quantity: qty,
            unit_price_cents: price,
            total_cents: price * i64::from(qty),
        }
    }

    fn paid_data() -> OrderPaidData {
        let created = Utc::now() - chrono::Duration::minutes(5);
        OrderPaidData {
            order_id: "O123".to_string(),
            order_number: "1001".to_string(),
            customer: customer(),
            items: vec![item(4900, 1), item(1500, 2)],
            total_cents: 7900,
            currency: "USD".to_string(),
            payment_reference: Some("pi_123".to_string()),
            created_at: created,
            paid_at: created + chrono::Duration::minutes(1),
        }
    }

    pub(crate) fn order_paid_payload() -> WebhookPayload {
        WebhookPayload::new(EventData::OrderPaid(paid_data())).unwrap()
    }

    #[test]
    fn test_payload_wire_shape() {
        let payload = WebhookPayload::new(EventData::OrderPaid(paid_data())).unwrap();
        let json: serde_json::Value = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["event"], "order.paid");
        assert_eq!(json["data"]["orderId"], "O123");
        assert_eq!(json["data"]["customer"]["email"], "ada@example.com");
        assert!(json["timestamp"].is_string());
        assert_eq!(json.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_payload_deserializes_by_event_kind() {
        let payload = WebhookPayload::new(EventData::OrderPaid(paid_data())).unwrap();
        let json = serde_json::to_string(&payload).unwrap();
        let decoded: WebhookPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.event(), EventKind::OrderPaid);
    }

    #[test]
    fn test_mismatched_event_and_data_is_rejected() {
        let json = serde_json::json!({
            "event": "order.paid",
            "data": { "orderId": "O123" },
            "timestamp": "2024-05-01T10:00:00Z"
        });
        assert!(serde_json::from_value::<WebhookPayload>(json).is_err());
    }

    #[test]
    fn test_total_must_match_line_items() {
        let mut data = paid_data();
        data.total_cents = 100;
        let err = WebhookPayload::new(EventData::OrderPaid(data)).unwrap_err();
        assert!(err.has_field("totalCents"));
    }

    #[test]
    fn test_paid_before_created_is_rejected() {
        let mut data = paid_data();
        data.paid_at = data.created_at - chrono::Duration::seconds(1);
        let err = WebhookPayload::new(EventData::OrderPaid(data)).unwrap_err();
        assert!(err.has_field("paidAt"));
    }

    #[test]
    fn test_empty_items_and_bad_quantity() {
        let mut data = paid_data();
        data.items = vec![];
        data.total_cents = 0;
        let err = WebhookPayload::new(EventData::OrderPaid(data)).unwrap_err();
        assert!(err.has_field("items"));

        let mut data = paid_data();
        data.items[0].quantity = 0;
        data.items[0].total_cents = 0;
        data.total_cents = 3000;
        let err = WebhookPayload::new(EventData::OrderPaid(data)).unwrap_err();
        assert!(err.has_field("items[0].quantity"));
    }

    #[test]
    fn test_cart_reminder_checkout_url_must_be_absolute() {
        let data = CartReminderData {
            order_id: "O9".to_string(),
            customer: customer(),
            items: vec![item(1000, 1)],
            total_cents: 1000,
            currency: "EUR".to_string(),
            checkout_url: Some("/checkout/O9".to_string()),
            created_at: Utc::now(),
        };
        let err = WebhookPayload::new(EventData::CartReminder(data)).unwrap_err();
        assert!(err.has_field("checkoutUrl"));
    }
}
