//! Webhook Delivery Queue
//!
//! Two interchangeable backends behind [`QueueBackend`]:
//! - [`RedisQueue`]: durable, survives restarts, shares work across processes
//! - [`InProcessQueue`]: worker pool in process memory, used when Redis is
//!   not configured or not reachable
//!
//! Both claim jobs atomically, bound concurrency to `max_concurrent` workers
//! and schedule retries with the same [`RetryPolicy`].

pub mod factory;
pub mod memory;
pub mod redis_queue;
pub mod retry;

use async_trait::async_trait;
use sf_common::{JobId, JobStatus, QueueOptions, Subscription, WebhookPayload};
use thiserror::Error;

pub use factory::create_queue_backend;
pub use memory::InProcessQueue;
pub use redis_queue::RedisQueue;
pub use retry::RetryPolicy;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue backend unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt job record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Summary of a drained backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseSummary {
    /// Waiting jobs left unexecuted (in-process only; Redis keeps them)
    pub dropped_jobs: usize,
    /// In-flight attempts did not finish within the drain timeout
    pub timed_out: bool,
}

#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Enqueue one delivery job and return its id
    async fn add_to_queue(
        &self,
        subscription: Subscription,
        payload: WebhookPayload,
        options: QueueOptions,
    ) -> Result<JobId>;

    /// Remove a job that is still waiting. `false` when it is active,
    /// finished or unknown.
    async fn cancel_job(&self, id: &str) -> Result<bool>;

    async fn get_job_status(&self, id: &str) -> Result<Option<JobStatus>>;

    /// Stop accepting jobs and wait for in-flight attempts
    async fn close(&self) -> Result<CloseSummary>;

    fn name(&self) -> &'static str;
}
