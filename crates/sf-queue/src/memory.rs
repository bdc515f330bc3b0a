//! In-process queue backend
//!
//! - Job table keyed by id; claims (`waiting -> active`) and cancellations
//!   take the same entry lock, so a job is either cancelled or executed
//! - Bounded ready channel drained by a fixed pool of `max_concurrent` workers
//! - Delayed jobs and retries are parked in timer tasks until due
//! - Terminal statuses are kept in a bounded ring for status queries

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use sf_common::{
    due_after, DeliveryJob, JobExecutor, JobId, JobState, JobStatus, QueueOptions, Subscription,
    WebhookPayload,
};
use sf_config::QueueConfig;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::retry::RetryPolicy;
use crate::{CloseSummary, QueueBackend, QueueError, Result};

const BACKEND_NAME: &str = "in-process";
const READY_CAPACITY_PER_WORKER: usize = 64;
const MIN_READY_CAPACITY: usize = 256;

struct Entry {
    job: DeliveryJob,
    state: JobState,
    failed_reason: Option<String>,
}

enum Claim {
    Claimed(DeliveryJob),
    NotDue(Duration),
    Skip,
}

/// Most recent terminal statuses, oldest evicted first
struct Retained {
    limit: usize,
    order: VecDeque<JobId>,
    statuses: HashMap<JobId, JobStatus>,
}

impl Retained {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            order: VecDeque::new(),
            statuses: HashMap::new(),
        }
    }

    fn push(&mut self, status: JobStatus) {
        if self.limit == 0 {
            return;
        }
        while self.order.len() >= self.limit {
            if let Some(oldest) = self.order.pop_front() {
                self.statuses.remove(&oldest);
            }
        }
        self.order.push_back(status.id.clone());
        self.statuses.insert(status.id.clone(), status);
    }

    fn get(&self, id: &str) -> Option<JobStatus> {
        self.statuses.get(id).cloned()
    }
}

struct Shared {
    jobs: DashMap<JobId, Entry>,
    retained: Mutex<Retained>,
    ready_tx: mpsc::Sender<JobId>,
    executor: Arc<dyn JobExecutor>,
    policy: RetryPolicy,
    accepting: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl Shared {
    /// Park `id` until `delay` has elapsed, then hand it to the workers
    fn schedule(&self, id: JobId, delay: Duration) {
        let ready_tx = self.ready_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if !self.accepting.load(Ordering::SeqCst) {
            return;
        }

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => {}
                _ = async {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if ready_tx.send(id).await.is_err() {
                        debug!("Ready channel closed, dropping timer");
                    }
                } => {}
            }
        });
    }

    fn claim(&self, id: &str) -> Claim {
        let Some(mut entry) = self.jobs.get_mut(id) else {
            return Claim::Skip;
        };
        if entry.state != JobState::Waiting {
            return Claim::Skip;
        }

        let now = Utc::now();
        if !entry.job.is_due(now) {
            let remaining = entry
                .job
                .scheduled_for
                .and_then(|at| (at - now).to_std().ok())
                .unwrap_or(Duration::ZERO);
            return Claim::NotDue(remaining);
        }

        entry.state = JobState::Active;
        entry.job.attempts += 1;
        Claim::Claimed(entry.job.clone())
    }

    fn finish(&self, id: &str, state: JobState, failed_reason: Option<String>) {
        if let Some((_, entry)) = self.jobs.remove(id) {
            self.retained.lock().push(entry.job.status(state, failed_reason));
        }
    }

    async fn process(&self, id: JobId) {
        let job = match self.claim(&id) {
            Claim::Claimed(job) => job,
            Claim::NotDue(remaining) => {
                self.schedule(id, remaining);
                return;
            }
            Claim::Skip => {
                debug!(job_id = %id, "Job cancelled or already claimed, skipping");
                return;
            }
        };

        let attempt = job.attempts;
        let result = self
            .executor
            .execute(&job.id, &job.subscription, &job.payload, attempt)
            .await;

        match result {
            Ok(()) => {
                debug!(job_id = %job.id, attempt, "Job completed");
                self.finish(&job.id, JobState::Completed, None);
            }
            Err(e) if job.has_attempts_left() => {
                let delay = self.policy.delay_after(attempt);

                if let Some(mut entry) = self.jobs.get_mut(&job.id) {
                    entry.state = JobState::Waiting;
                    entry.job.attempts = attempt;
                    entry.job.scheduled_for = Some(due_after(delay));
                    entry.failed_reason = Some(e.to_string());
                }

                debug!(
                    job_id = %job.id,
                    attempt,
                    max_attempts = job.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling retry"
                );
                self.schedule(job.id, delay);
            }
            Err(e) => {
                error!(
                    job_id = %job.id,
                    subscription_id = %job.subscription.id,
                    event = %job.payload.event(),
                    order_id = %job.payload.order_id(),
                    attempts = attempt,
                    error = %e,
                    "Webhook delivery failed permanently, retries exhausted"
                );
                metrics::counter!("webhook_jobs_exhausted_total", "backend" => BACKEND_NAME)
                    .increment(1);
                self.finish(&job.id, JobState::Failed, Some(e.to_string()));
            }
        }
    }
}

/// Worker-pool queue held in process memory
pub struct InProcessQueue {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    drain_timeout: Duration,
}

impl InProcessQueue {
    /// Create the queue and spawn its `max_concurrent` workers
    pub fn start(config: &QueueConfig, executor: Arc<dyn JobExecutor>) -> Self {
        let worker_count = config.max_concurrent.max(1);
        let capacity = (worker_count * READY_CAPACITY_PER_WORKER).max(MIN_READY_CAPACITY);
        let (ready_tx, ready_rx) = mpsc::channel(capacity);
        let (shutdown_tx, _) = broadcast::channel(1);

        let shared = Arc::new(Shared {
            jobs: DashMap::new(),
            retained: Mutex::new(Retained::new(config.retained_jobs)),
            ready_tx,
            executor,
            policy: RetryPolicy::from_config(config),
            accepting: AtomicBool::new(true),
            shutdown_tx,
        });

        let ready_rx = Arc::new(tokio::sync::Mutex::new(ready_rx));
        let workers = (0..worker_count)
            .map(|worker_id| {
                let shared = shared.clone();
                let ready_rx = ready_rx.clone();
                let shutdown_rx = shared.shutdown_tx.subscribe();
                tokio::spawn(Self::run_worker(worker_id, shared, ready_rx, shutdown_rx))
            })
            .collect();

        info!(
            workers = worker_count,
            max_attempts = shared.policy.max_attempts(),
            "In-process webhook queue started"
        );

        Self {
            shared,
            workers: Mutex::new(workers),
            drain_timeout: config.drain_timeout(),
        }
    }

    async fn run_worker(
        worker_id: usize,
        shared: Arc<Shared>,
        ready_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<JobId>>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                id = async { ready_rx.lock().await.recv().await } => id,
            };

            match next {
                Some(id) => shared.process(id).await,
                None => break,
            }
        }
        debug!(worker_id, "Queue worker stopped");
    }

    /// Jobs currently waiting or active
    pub fn pending_jobs(&self) -> usize {
        self.shared.jobs.len()
    }
}

#[async_trait]
impl QueueBackend for InProcessQueue {
    async fn add_to_queue(
        &self,
        subscription: Subscription,
        payload: WebhookPayload,
        options: QueueOptions,
    ) -> Result<JobId> {
        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let max_attempts = options
            .max_attempts
            .unwrap_or_else(|| self.shared.policy.max_attempts());
        let delay = options.delay.unwrap_or(Duration::ZERO);
        let event = payload.event();
        let job = DeliveryJob::new(id.clone(), subscription, payload, max_attempts, Some(delay));

        debug!(
            job_id = %id,
            subscription_id = %job.subscription.id,
            event = %event,
            delay_ms = delay.as_millis() as u64,
            "Job enqueued"
        );

        self.shared.jobs.insert(
            id.clone(),
            Entry {
                job,
                state: JobState::Waiting,
                failed_reason: None,
            },
        );
        self.shared.schedule(id.clone(), delay);

        metrics::counter!(
            "webhook_jobs_enqueued_total",
            "event" => event.as_str(),
            "backend" => BACKEND_NAME
        )
        .increment(1);

        Ok(id)
    }

    async fn cancel_job(&self, id: &str) -> Result<bool> {
        let removed = self
            .shared
            .jobs
            .remove_if(id, |_, entry| entry.state == JobState::Waiting);

        if removed.is_some() {
            info!(job_id = %id, "Job cancelled");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn get_job_status(&self, id: &str) -> Result<Option<JobStatus>> {
        if let Some(entry) = self.shared.jobs.get(id) {
            return Ok(Some(entry.job.status(entry.state, entry.failed_reason.clone())));
        }
        Ok(self.shared.retained.lock().get(id))
    }

    async fn close(&self) -> Result<CloseSummary> {
        if !self.shared.accepting.swap(false, Ordering::SeqCst) {
            return Ok(CloseSummary::default());
        }

        info!("Draining in-process webhook queue");
        let _ = self.shared.shutdown_tx.send(());

        let handles = std::mem::take(&mut *self.workers.lock());
        let timed_out = tokio::time::timeout(self.drain_timeout, futures::future::join_all(handles))
            .await
            .is_err();

        let dropped_jobs = self
            .shared
            .jobs
            .iter()
            .filter(|entry| entry.state == JobState::Waiting)
            .count();

        if timed_out {
            warn!(
                drain_timeout_ms = self.drain_timeout.as_millis() as u64,
                "In-flight deliveries did not finish before the drain timeout"
            );
        }
        if dropped_jobs > 0 {
            warn!(dropped_jobs, "Waiting webhook jobs dropped at shutdown");
        }
        info!("In-process webhook queue closed");

        Ok(CloseSummary {
            dropped_jobs,
            timed_out,
        })
    }

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }
}
