//! Webhook Service
//!
//! Façade over the event builders, subscription registry and queue backend.
//! Dispatching only enqueues; HTTP delivery and outcome logging happen later
//! on the queue's workers.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sf_common::{
    DeliveryStats, EventKind, JobId, JobStatus, OutcomeFilter, OutcomeRecord, QueueOptions,
    Subscription, WebhookPayload,
};
use sf_config::AppConfig;
use sf_events::{
    CartReminderBuilder, Order, OrderCreatedBuilder, OrderPaidBuilder, OrderStatusStore,
};
use sf_queue::{CloseSummary, QueueBackend};
use sf_store::{OutcomeRepository, SubscriptionRepository};
use tracing::{debug, info};

use crate::admin::SubscriptionInput;
use crate::error::{Result, ServiceError};
use crate::registry::SubscriptionRegistry;

/// Service settings
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Minimum delay applied to every cart reminder
    pub cart_reminder_delay: Duration,
    /// Subscription cache lifetime; zero disables caching
    pub registry_cache_ttl: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cart_reminder_delay: Duration::from_secs(60),
            registry_cache_ttl: Duration::from_secs(10),
        }
    }
}

impl From<&AppConfig> for ServiceConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            cart_reminder_delay: config.cart_reminder_delay(),
            registry_cache_ttl: config.registry.cache_ttl(),
        }
    }
}

/// One page of outcome records
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomePage {
    pub records: Vec<OutcomeRecord>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

pub struct WebhookService {
    config: ServiceConfig,
    registry: SubscriptionRegistry,
    subscriptions: Arc<dyn SubscriptionRepository>,
    outcomes: Arc<dyn OutcomeRepository>,
    queue: Arc<dyn QueueBackend>,
    cart_reminders: CartReminderBuilder,
}

impl WebhookService {
    pub fn new(
        config: ServiceConfig,
        subscriptions: Arc<dyn SubscriptionRepository>,
        outcomes: Arc<dyn OutcomeRepository>,
        order_store: Arc<dyn OrderStatusStore>,
        queue: Arc<dyn QueueBackend>,
    ) -> Self {
        Self {
            registry: SubscriptionRegistry::new(subscriptions.clone(), config.registry_cache_ttl),
            config,
            subscriptions,
            outcomes,
            queue,
            cart_reminders: CartReminderBuilder::new(order_store),
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Fan a payload out to every matching subscription.
    ///
    /// Validation errors are returned before anything is enqueued or any
    /// order changes state. A cart reminder moves its order out of draft
    /// (at most once per order) and is never delivered sooner than the
    /// configured minimum delay.
    pub async fn dispatch_event(
        &self,
        payload: WebhookPayload,
        options: Option<QueueOptions>,
    ) -> Result<Vec<JobId>> {
        payload.validate()?;
        if let Some(options) = &options {
            options.validate()?;
        }

        let event = payload.event();
        if event == EventKind::CartReminder {
            self.cart_reminders.abandon(payload.order_id()).await?;
        }

        let subscriptions = self.registry.find_active(event).await?;
        if subscriptions.is_empty() {
            debug!(
                event = %event,
                order_id = %payload.order_id(),
                "No active subscriptions for event"
            );
            return Ok(Vec::new());
        }

        let options = self.options_for(event, options.unwrap_or_default());
        let mut job_ids = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            let job_id = self
                .queue
                .add_to_queue(subscription, payload.clone(), options.clone())
                .await?;
            job_ids.push(job_id);
        }

        info!(
            event = %event,
            order_id = %payload.order_id(),
            jobs = job_ids.len(),
            backend = self.queue.name(),
            "Event dispatched"
        );
        Ok(job_ids)
    }

    fn options_for(&self, event: EventKind, mut options: QueueOptions) -> QueueOptions {
        if event == EventKind::CartReminder {
            let requested = options.delay.unwrap_or(Duration::ZERO);
            options.delay = Some(requested.max(self.config.cart_reminder_delay));
        }
        options
    }

    pub async fn notify_order_created(&self, order: &Order) -> Result<Vec<JobId>> {
        let payload = OrderCreatedBuilder.build(order)?;
        self.dispatch_event(payload, None).await
    }

    pub async fn notify_order_paid(&self, order: &Order) -> Result<Vec<JobId>> {
        let payload = OrderPaidBuilder.build(order)?;
        self.dispatch_event(payload, None).await
    }

    /// Build a cart reminder and dispatch it, marking the order abandoned
    pub async fn notify_cart_reminder(&self, order: &Order) -> Result<Vec<JobId>> {
        let payload = self.cart_reminders.build(order)?;
        self.dispatch_event(payload, None).await
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    pub async fn cancel_job(&self, id: &str) -> Result<bool> {
        Ok(self.queue.cancel_job(id).await?)
    }

    pub async fn get_job_status(&self, id: &str) -> Result<Option<JobStatus>> {
        Ok(self.queue.get_job_status(id).await?)
    }

    /// Drain the queue backend
    pub async fn close(&self) -> Result<CloseSummary> {
        let summary = self.queue.close().await?;
        info!(
            backend = self.queue.name(),
            dropped_jobs = summary.dropped_jobs,
            timed_out = summary.timed_out,
            "Webhook service closed"
        );
        Ok(summary)
    }

    pub fn backend_name(&self) -> &'static str {
        self.queue.name()
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub async fn create_subscription(&self, input: SubscriptionInput) -> Result<Subscription> {
        input.validate()?;
        let subscription = input.into_subscription();
        self.subscriptions.insert(&subscription).await?;
        self.registry.invalidate();

        info!(
            subscription_id = %subscription.id,
            name = %subscription.name,
            "Subscription created"
        );
        Ok(subscription)
    }

    pub async fn update_subscription(
        &self,
        id: &str,
        input: SubscriptionInput,
    ) -> Result<Subscription> {
        input.validate()?;
        let existing = self
            .get_subscription(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("subscription", id))?;

        let updated = input.apply_to(&existing);
        self.subscriptions.update(&updated).await?;
        self.registry.invalidate();

        info!(subscription_id = %id, "Subscription updated");
        Ok(updated)
    }

    /// Soft delete; the row stays for delivery history
    pub async fn delete_subscription(&self, id: &str) -> Result<()> {
        if !self.subscriptions.soft_delete(id).await? {
            return Err(ServiceError::not_found("subscription", id));
        }
        self.registry.invalidate();

        info!(subscription_id = %id, "Subscription deleted");
        Ok(())
    }

    /// Non-deleted subscription by id
    pub async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>> {
        Ok(self
            .subscriptions
            .find_by_id(id)
            .await?
            .filter(|s| !s.is_deleted()))
    }

    pub async fn list_subscriptions(&self, include_deleted: bool) -> Result<Vec<Subscription>> {
        Ok(self.subscriptions.list(include_deleted).await?)
    }

    // ========================================================================
    // Outcomes
    // ========================================================================

    /// Outcome records, newest first. `page` is 1-based.
    pub async fn list_outcomes(
        &self,
        filter: OutcomeFilter,
        page: u32,
        limit: u32,
    ) -> Result<OutcomePage> {
        let page = page.max(1);
        let limit = limit.clamp(1, 500);
        let offset = u64::from(page - 1) * u64::from(limit);

        let records = self.outcomes.search(&filter, offset, u64::from(limit)).await?;
        let total = self.outcomes.count(&filter).await?;
        Ok(OutcomePage {
            records,
            total,
            page,
            limit,
        })
    }

    pub async fn delivery_stats(&self, subscription_id: Option<&str>) -> Result<DeliveryStats> {
        Ok(self.outcomes.stats(subscription_id).await?)
    }
}
