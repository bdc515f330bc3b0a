//! Delivery Executor
//!
//! Performs exactly one signed POST per call and records its outcome.
//! Retry scheduling belongs to the queue backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use sf_common::{
    DeliveryError, JobExecutor, OutcomeRecord, ResponseSnapshot, Subscription, WebhookPayload,
};
use sf_store::OutcomeRepository;
use tracing::{debug, error, info, warn};

use crate::signature::sign_payload;

pub const HEADER_EVENT: &str = "x-webhook-event";
pub const HEADER_DELIVERY: &str = "x-webhook-delivery";
pub const HEADER_ATTEMPT: &str = "x-webhook-attempt";
pub const HEADER_SIGNATURE: &str = "x-webhook-signature";

/// Delivery executor configuration
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Per-request timeout
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: "StorefrontWebhooks/1.0".to_string(),
        }
    }
}

pub struct DeliveryExecutor {
    config: DeliveryConfig,
    client: reqwest::Client,
    outcomes: Arc<dyn OutcomeRepository>,
}

impl DeliveryExecutor {
    pub fn new(
        config: DeliveryConfig,
        outcomes: Arc<dyn OutcomeRepository>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            client,
            outcomes,
        })
    }

    fn headers(
        &self,
        subscription: &Subscription,
        payload: &WebhookPayload,
        delivery_id: &str,
        attempt: u32,
        signature: &str,
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&self.config.user_agent) {
            headers.insert(USER_AGENT, value);
        }
        headers.insert(HEADER_EVENT, HeaderValue::from_static(payload.event().as_str()));
        if let Ok(value) = HeaderValue::from_str(delivery_id) {
            headers.insert(HEADER_DELIVERY, value);
        }
        headers.insert(HEADER_ATTEMPT, HeaderValue::from(attempt));

        for (name, value) in &subscription.headers {
            let parsed = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            );
            match parsed {
                (Ok(name), Ok(value)) => {
                    if name.as_str() == HEADER_SIGNATURE {
                        continue;
                    }
                    headers.insert(name, value);
                }
                _ => {
                    warn!(
                        subscription_id = %subscription.id,
                        header = %name,
                        "Skipping invalid custom header"
                    );
                }
            }
        }

        // Signature is applied last so custom headers can never replace it
        match HeaderValue::from_str(signature) {
            Ok(value) => headers.insert(HEADER_SIGNATURE, value),
            Err(_) => headers.insert(HEADER_SIGNATURE, HeaderValue::from_static("")),
        };
        headers
    }

    async fn post(
        &self,
        url: &str,
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> Result<u16, DeliveryError> {
        let response = self
            .client
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout {
                        timeout_ms: self.config.timeout.as_millis() as u64,
                    }
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(DeliveryError::Status {
                status_code: status.as_u16(),
            })
        }
    }

    async fn record(&self, record: OutcomeRecord) {
        if let Err(e) = self.outcomes.insert(&record).await {
            error!(
                job_id = %record.job_id,
                delivery_id = %record.delivery_id,
                error = %e,
                "Failed to persist delivery outcome"
            );
        }
    }
}

#[async_trait]
impl JobExecutor for DeliveryExecutor {
    async fn execute(
        &self,
        job_id: &str,
        subscription: &Subscription,
        payload: &WebhookPayload,
        attempt: u32,
    ) -> Result<(), DeliveryError> {
        let event = payload.event();
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();

        let result = match payload.to_json_bytes() {
            Ok(body) => {
                let signature = subscription
                    .secret
                    .as_deref()
                    .map(|secret| sign_payload(secret, &body))
                    .unwrap_or_default();
                let headers =
                    self.headers(subscription, payload, &delivery_id, attempt, &signature);

                debug!(
                    job_id,
                    subscription_id = %subscription.id,
                    url = %subscription.url,
                    attempt,
                    "Sending webhook"
                );
                self.post(&subscription.url, headers, body).await
            }
            Err(e) => Err(DeliveryError::Serialization(e.to_string())),
        };

        let elapsed = started.elapsed();
        let response = ResponseSnapshot {
            status_code: match &result {
                Ok(code) => Some(*code),
                Err(e) => e.status_code(),
            },
            success: result.is_ok(),
            error: result.as_ref().err().map(ToString::to_string),
            duration_ms: elapsed.as_millis() as u64,
        };

        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!(
            "webhook_delivery_attempts_total",
            "event" => event.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!("webhook_delivery_duration_seconds", "event" => event.as_str())
            .record(elapsed.as_secs_f64());

        match &result {
            Ok(status_code) => info!(
                job_id,
                delivery_id = %delivery_id,
                subscription_id = %subscription.id,
                event = %event,
                order_id = %payload.order_id(),
                attempt,
                status_code,
                duration_ms = response.duration_ms,
                "Webhook delivered"
            ),
            Err(e) => warn!(
                job_id,
                delivery_id = %delivery_id,
                subscription_id = %subscription.id,
                event = %event,
                order_id = %payload.order_id(),
                attempt,
                error = %e,
                duration_ms = response.duration_ms,
                "Webhook delivery attempt failed"
            ),
        }

        self.record(OutcomeRecord::new(
            job_id,
            &delivery_id,
            &subscription.id,
            payload,
            attempt,
            response,
        ))
        .await;

        result.map(|_| ())
    }
}
