//! Storefront webhook core types
//!
//! Shared by the event builders, subscription store, queue backends,
//! delivery executor and dispatch service.

pub mod payload;
pub mod validation;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use payload::{
    CartReminderData, CustomerData, EventData, LineItemData, OrderCreatedData, OrderPaidData,
    WebhookPayload,
};
pub use validation::{FieldViolation, ValidationError, Violations};

// ============================================================================
// Event Kinds
// ============================================================================

/// Class of domain occurrence a subscription can register interest in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "order.created")]
    OrderCreated,
    #[serde(rename = "order.paid")]
    OrderPaid,
    #[serde(rename = "cart.reminder")]
    CartReminder,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::OrderCreated,
        EventKind::OrderPaid,
        EventKind::CartReminder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OrderCreated => "order.created",
            EventKind::OrderPaid => "order.paid",
            EventKind::CartReminder => "cart.reminder",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

/// A registered webhook endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub name: String,
    pub url: String,
    /// HMAC-SHA256 signing secret. Unsigned deliveries when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub active: bool,
    pub events: BTreeSet<EventKind>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker; deleted subscriptions are kept for audit history
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        events: impl IntoIterator<Item = EventKind>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            url: url.into(),
            secret: None,
            active: true,
            events: events.into_iter().collect(),
            headers: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether this subscription should receive events of `kind` right now
    pub fn matches(&self, kind: EventKind) -> bool {
        self.active && !self.is_deleted() && self.events.contains(&kind)
    }
}

// ============================================================================
// Delivery Jobs
// ============================================================================

pub type JobId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("Unknown job state: {}", other)),
        }
    }
}

/// Point-in-time view of a job as reported by a queue backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: JobId,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub failed_reason: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Longest delay a caller may request for a single job
pub const MAX_QUEUE_DELAY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Wall-clock time `delay` from now, saturating at the latest representable instant
pub fn due_after(delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Per-dispatch queue options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub delay: Option<Duration>,
    pub max_attempts: Option<u32>,
}

impl QueueOptions {
    /// Reject caller-supplied overrides outside the supported range
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Violations::new();
        if let Some(delay) = self.delay {
            violations.check(
                delay <= MAX_QUEUE_DELAY,
                "delayMs",
                format!("must not exceed {} ms", MAX_QUEUE_DELAY.as_millis()),
            );
        }
        if let Some(max_attempts) = self.max_attempts {
            violations.check(max_attempts >= 1, "maxAttempts", "must be at least 1");
        }
        violations.into_result()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// One subscription's pending, in-flight or retrying delivery of a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryJob {
    pub id: JobId,
    pub subscription: Subscription,
    pub payload: WebhookPayload,
    pub attempts: u32,
    pub max_attempts: u32,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl DeliveryJob {
    pub fn new(
        id: JobId,
        subscription: Subscription,
        payload: WebhookPayload,
        max_attempts: u32,
        delay: Option<Duration>,
    ) -> Self {
        let scheduled_for = delay.filter(|d| !d.is_zero()).map(due_after);

        Self {
            id,
            subscription,
            payload,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            scheduled_for,
        }
    }

    /// Whether the executor may see this job at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for.map_or(true, |at| at <= now)
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn status(&self, state: JobState, failed_reason: Option<String>) -> JobStatus {
        JobStatus {
            id: self.id.clone(),
            state,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            failed_reason,
            scheduled_for: self.scheduled_for,
        }
    }
}

// ============================================================================
// Outcome Records
// ============================================================================

/// Response side of a single delivery attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSnapshot {
    pub status_code: Option<u16>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Append-only trace of one delivery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub id: String,
    pub job_id: JobId,
    pub delivery_id: String,
    pub subscription_id: String,
    pub event: EventKind,
    pub attempt: u32,
    pub payload: WebhookPayload,
    pub response: ResponseSnapshot,
    pub created_at: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn new(
        job_id: &str,
        delivery_id: &str,
        subscription_id: &str,
        payload: &WebhookPayload,
        attempt: u32,
        response: ResponseSnapshot,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            delivery_id: delivery_id.to_string(),
            subscription_id: subscription_id.to_string(),
            event: payload.event(),
            attempt,
            payload: payload.clone(),
            response,
            created_at: Utc::now(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.response.success
    }
}

/// Filter for outcome record queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeFilter {
    pub subscription_id: Option<String>,
    pub event: Option<EventKind>,
    pub success: Option<bool>,
}

impl OutcomeFilter {
    pub fn matches(&self, record: &OutcomeRecord) -> bool {
        self.subscription_id
            .as_deref()
            .map_or(true, |id| record.subscription_id == id)
            && self.event.map_or(true, |event| record.event == event)
            && self.success.map_or(true, |success| record.response.success == success)
    }
}

/// Success/failure counts over outcome records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl DeliveryStats {
    pub fn record(&mut self, success: bool) {
        self.total += 1;
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

// ============================================================================
// Delivery Contract
// ============================================================================

/// Why a single delivery attempt failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("Subscriber responded with HTTP {status_code}")]
    Status { status_code: u16 },

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DeliveryError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DeliveryError::Status { status_code } => Some(*status_code),
            _ => None,
        }
    }
}

/// Performs one delivery attempt for a job.
///
/// Implementations record the attempt's outcome themselves and never retry;
/// retry scheduling belongs to the queue backend.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        job_id: &str,
        subscription: &Subscription,
        payload: &WebhookPayload,
        attempt: u32,
    ) -> Result<(), DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_round_trips_through_str() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("order.refunded".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_event_kind_serializes_as_wire_identifier() {
        let json = serde_json::to_string(&EventKind::CartReminder).unwrap();
        assert_eq!(json, "\"cart.reminder\"");
    }

    #[test]
    fn test_queue_options_bounds() {
        assert!(QueueOptions::default().validate().is_ok());
        assert!(QueueOptions::default()
            .with_delay(MAX_QUEUE_DELAY)
            .with_max_attempts(1)
            .validate()
            .is_ok());

        let err = QueueOptions::default()
            .with_delay(MAX_QUEUE_DELAY + Duration::from_millis(1))
            .with_max_attempts(0)
            .validate()
            .unwrap_err();
        assert!(err.has_field("delayMs"));
        assert!(err.has_field("maxAttempts"));
    }

    #[test]
    fn test_job_delay_beyond_calendar_saturates() {
        let sub = Subscription::new("crm", "https://crm.example.com/hook", [EventKind::OrderPaid]);
        let payload = payload::tests::order_paid_payload();
        let job = DeliveryJob::new(
            "1".to_string(),
            sub,
            payload,
            3,
            Some(Duration::from_millis(10_000_000_000_000_000)),
        );
        assert_eq!(job.scheduled_for, Some(DateTime::<Utc>::MAX_UTC));
        assert!(!job.is_due(Utc::now()));
        assert_eq!(due_after(Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_subscription_matches() {
        let sub = Subscription::new("crm", "https://crm.example.com/hook", [EventKind::OrderPaid]);
        assert!(sub.matches(EventKind::OrderPaid));
        assert!(!sub.matches(EventKind::OrderCreated));

        let inactive = sub.clone().inactive();
        assert!(!inactive.matches(EventKind::OrderPaid));

        let mut deleted = sub;
        deleted.deleted_at = Some(Utc::now());
        assert!(!deleted.matches(EventKind::OrderPaid));
    }

    #[test]
    fn test_job_state_terminal() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Waiting.is_terminal());
        assert!(!JobState::Active.is_terminal());
        assert_eq!("active".parse::<JobState>().unwrap(), JobState::Active);
    }

    #[test]
    fn test_delivery_stats_record() {
        let mut stats = DeliveryStats::default();
        stats.record(true);
        stats.record(false);
        stats.record(false);
        assert_eq!(stats, DeliveryStats { total: 3, succeeded: 1, failed: 2 });
    }
}
