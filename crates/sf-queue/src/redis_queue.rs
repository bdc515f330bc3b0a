//! Redis queue backend
//!
//! Key layout under the configured prefix:
//!
//! | Key | Type | Content |
//! |-----|------|---------|
//! | `{prefix}:seq` | string | job id counter (`INCR`) |
//! | `{prefix}:job:{id}` | hash | job JSON, state, attempts, last error |
//! | `{prefix}:delayed` | sorted set | waiting job ids scored by due time (ms) |
//! | `{prefix}:active` | sorted set | claimed job ids scored by lease deadline (ms) |
//!
//! Claims, cancellations and stalled-lease recovery run as Lua scripts so
//! each is a single atomic step on the server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use sf_common::{
    due_after, DeliveryJob, JobExecutor, JobId, JobState, JobStatus, QueueOptions, Subscription,
    WebhookPayload,
};
use sf_config::QueueConfig;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::retry::RetryPolicy;
use crate::{CloseSummary, QueueBackend, QueueError, Result};

const BACKEND_NAME: &str = "redis";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Finished job hashes expire after a day
const TERMINAL_TTL_SECS: i64 = 24 * 60 * 60;
/// Failure recorded when a job's last attempt lost its worker
const LEASE_EXPIRED_REASON: &str = "worker lease expired";

const CLAIM_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then
  return false
end
local id = ids[1]
redis.call('ZREM', KEYS[1], id)
local key = ARGV[3] .. id
local data = redis.call('HGET', key, 'data')
if not data then
  return false
end
redis.call('ZADD', KEYS[2], ARGV[2], id)
local attempts = redis.call('HINCRBY', key, 'attempts', 1)
redis.call('HSET', key, 'state', 'active')
return {id, attempts, data}
"#;

const CANCEL_SCRIPT: &str = r#"
if redis.call('ZSCORE', KEYS[2], ARGV[1]) then
  return 0
end
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
  redis.call('DEL', KEYS[3])
  return 1
end
return 0
"#;

const RECOVER_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(ids) do
  local key = ARGV[2] .. id
  redis.call('ZREM', KEYS[1], id)
  local attempts = tonumber(redis.call('HGET', key, 'attempts') or '0')
  local max = tonumber(redis.call('HGET', key, 'max_attempts') or '1')
  if attempts >= max then
    redis.call('HSET', key, 'state', 'failed', 'failed_reason', ARGV[4])
    redis.call('EXPIRE', key, ARGV[3])
  else
    redis.call('HSET', key, 'state', 'waiting')
    redis.call('ZADD', KEYS[2], ARGV[1], id)
  end
end
return #ids
"#;

#[derive(Debug, Clone)]
struct Keys {
    seq: String,
    delayed: String,
    active: String,
    job_prefix: String,
}

impl Keys {
    fn new(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches(':');
        Self {
            seq: format!("{}:seq", prefix),
            delayed: format!("{}:delayed", prefix),
            active: format!("{}:active", prefix),
            job_prefix: format!("{}:job:", prefix),
        }
    }

    fn job(&self, id: &str) -> String {
        format!("{}{}", self.job_prefix, id)
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Rebuild a status from a job hash; `None` for an empty (missing) hash
fn status_from_hash(id: &str, fields: &HashMap<String, String>) -> Result<Option<JobStatus>> {
    if fields.is_empty() {
        return Ok(None);
    }
    let corrupt = |reason: String| QueueError::Corrupt {
        id: id.to_string(),
        reason,
    };

    let state = fields
        .get("state")
        .ok_or_else(|| corrupt("missing state".to_string()))?
        .parse::<JobState>()
        .map_err(corrupt)?;
    let number = |name: &str| -> Result<u32> {
        fields
            .get(name)
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| corrupt(format!("{}: {}", name, e)))
            .map(|v| v.unwrap_or(0))
    };
    let scheduled_for = fields
        .get("scheduled_for")
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis);

    Ok(Some(JobStatus {
        id: id.to_string(),
        state,
        attempts: number("attempts")?,
        max_attempts: number("max_attempts")?,
        failed_reason: fields.get("failed_reason").filter(|v| !v.is_empty()).cloned(),
        scheduled_for,
    }))
}

struct Shared {
    conn: ConnectionManager,
    keys: Keys,
    executor: Arc<dyn JobExecutor>,
    policy: RetryPolicy,
    lease: Duration,
    poll_interval: Duration,
}

impl Shared {
    async fn claim(&self) -> Result<Option<DeliveryJob>> {
        let now = Utc::now();
        let lease_deadline = due_after(self.lease);
        let mut conn = self.conn.clone();

        let claimed: Option<(String, u32, String)> = redis::Script::new(CLAIM_SCRIPT)
            .key(&self.keys.delayed)
            .key(&self.keys.active)
            .arg(millis(now))
            .arg(millis(lease_deadline))
            .arg(&self.keys.job_prefix)
            .invoke_async(&mut conn)
            .await?;

        let Some((id, attempts, data)) = claimed else {
            return Ok(None);
        };
        let mut job: DeliveryJob = serde_json::from_str(&data).map_err(|e| QueueError::Corrupt {
            id: id.clone(),
            reason: e.to_string(),
        })?;
        job.attempts = attempts;
        Ok(Some(job))
    }

    async fn complete(&self, job: &DeliveryJob) -> Result<()> {
        let key = self.keys.job(&job.id);
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .zrem(&self.keys.active, &job.id)
            .ignore()
            .hset_multiple(
                &key,
                &[
                    ("state", JobState::Completed.as_str().to_string()),
                    ("attempts", job.attempts.to_string()),
                ],
            )
            .ignore()
            .expire(&key, TERMINAL_TTL_SECS)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn reschedule(&self, job: &DeliveryJob, delay: Duration, reason: &str) -> Result<()> {
        let due = millis(due_after(delay));
        let key = self.keys.job(&job.id);
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .zrem(&self.keys.active, &job.id)
            .ignore()
            .hset_multiple(
                &key,
                &[
                    ("state", JobState::Waiting.as_str().to_string()),
                    ("failed_reason", reason.to_string()),
                    ("scheduled_for", due.to_string()),
                ],
            )
            .ignore()
            .zadd(&self.keys.delayed, &job.id, due)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn fail(&self, job: &DeliveryJob, reason: &str) -> Result<()> {
        let key = self.keys.job(&job.id);
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .zrem(&self.keys.active, &job.id)
            .ignore()
            .hset_multiple(
                &key,
                &[
                    ("state", JobState::Failed.as_str()),
                    ("failed_reason", reason),
                ],
            )
            .ignore()
            .expire(&key, TERMINAL_TTL_SECS)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Return jobs whose worker lease expired to the delayed set
    async fn recover_stalled(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let recovered: u64 = redis::Script::new(RECOVER_SCRIPT)
            .key(&self.keys.active)
            .key(&self.keys.delayed)
            .arg(millis(Utc::now()))
            .arg(&self.keys.job_prefix)
            .arg(TERMINAL_TTL_SECS)
            .arg(LEASE_EXPIRED_REASON)
            .invoke_async(&mut conn)
            .await?;
        if recovered > 0 {
            warn!(recovered, "Recovered stalled webhook jobs (Redis)");
        }
        Ok(recovered)
    }

    async fn process(&self, job: DeliveryJob) -> Result<()> {
        let attempt = job.attempts;
        let result = self
            .executor
            .execute(&job.id, &job.subscription, &job.payload, attempt)
            .await;

        match result {
            Ok(()) => self.complete(&job).await,
            Err(e) if job.has_attempts_left() => {
                let delay = self.policy.delay_after(attempt);
                debug!(
                    job_id = %job.id,
                    attempt,
                    max_attempts = job.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling retry"
                );
                self.reschedule(&job, delay, &e.to_string()).await
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
                self.fail(&job, &e.to_string()).await
            }
        }
    }
}

/// Durable queue backed by Redis
pub struct RedisQueue {
    shared: Arc<Shared>,
    accepting: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    drain_timeout: Duration,
}

impl RedisQueue {
    /// Connect, verify the server answers, and start the workers
    pub async fn connect(config: &QueueConfig, executor: Arc<dyn JobExecutor>) -> Result<Self> {
        let url = config
            .redis_url
            .as_deref()
            .ok_or_else(|| QueueError::Unavailable("no Redis URL configured".to_string()))?;

        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, async {
            // Fail fast before the connection manager starts its own reconnect loop
            let mut probe = client.get_multiplexed_async_connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut probe).await?;
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|_| {
            QueueError::Unavailable(format!(
                "timed out connecting to Redis after {:?}",
                CONNECT_TIMEOUT
            ))
        })??;

        let shared = Arc::new(Shared {
            conn,
            keys: Keys::new(&config.key_prefix),
            executor,
            policy: RetryPolicy::from_config(config),
            lease: config.lease(),
            poll_interval: config.poll_interval(),
        });
        let (shutdown_tx, _) = broadcast::channel(1);

        let worker_count = config.max_concurrent.max(1);
        let mut tasks: Vec<JoinHandle<()>> = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(Self::run_worker(
                    worker_id,
                    shared.clone(),
                    shutdown_tx.subscribe(),
                ))
            })
            .collect();
        tasks.push(tokio::spawn(Self::run_recovery(
            shared.clone(),
            shutdown_tx.subscribe(),
        )));

        info!(
            workers = worker_count,
            key_prefix = %config.key_prefix,
            max_attempts = shared.policy.max_attempts(),
            "Redis webhook queue started"
        );

        Ok(Self {
            shared,
            accepting: AtomicBool::new(true),
            shutdown_tx,
            tasks: Mutex::new(tasks),
            drain_timeout: config.drain_timeout(),
        })
    }

    async fn run_worker(
        worker_id: usize,
        shared: Arc<Shared>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            // Claims are never raced against shutdown: a claimed job is always processed
            if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
                break;
            }

            match shared.claim().await {
                Ok(Some(job)) => {
                    let job_id = job.id.clone();
                    if let Err(e) = shared.process(job).await {
                        error!(
                            worker_id,
                            job_id = %job_id,
                            error = %e,
                            "Failed to record job result"
                        );
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(shared.poll_interval) => {}
                    }
                }
                Err(e) => {
                    warn!(worker_id, error = %e, "Failed to claim job");
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(shared.poll_interval) => {}
                    }
                }
            }
        }
        debug!(worker_id, "Redis queue worker stopped");
    }

    async fn run_recovery(shared: Arc<Shared>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(shared.lease);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = shared.recover_stalled().await {
                        warn!(error = %e, "Stalled job recovery failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("Stalled job recovery shutting down");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl QueueBackend for RedisQueue {
    async fn add_to_queue(
        &self,
        subscription: Subscription,
        payload: WebhookPayload,
        options: QueueOptions,
    ) -> Result<JobId> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }

        let mut conn = self.shared.conn.clone();
        let seq: u64 = redis::cmd("INCR")
            .arg(&self.shared.keys.seq)
            .query_async(&mut conn)
            .await?;
        let id = seq.to_string();

        let max_attempts = options
            .max_attempts
            .unwrap_or_else(|| self.shared.policy.max_attempts());
        let event = payload.event();
        let job = DeliveryJob::new(id.clone(), subscription, payload, max_attempts, options.delay);
        let due = millis(job.scheduled_for.unwrap_or_else(Utc::now));
        let scheduled_for = job
            .scheduled_for
            .map(|at| millis(at).to_string())
            .unwrap_or_default();
        let data = serde_json::to_string(&job)?;
        let key = self.shared.keys.job(&id);

        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(
                &key,
                &[
                    ("data", data),
                    ("state", JobState::Waiting.as_str().to_string()),
                    ("attempts", "0".to_string()),
                    ("max_attempts", job.max_attempts.to_string()),
                    ("scheduled_for", scheduled_for),
                ],
            )
            .ignore()
            .zadd(&self.shared.keys.delayed, &id, due)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(
            job_id = %id,
            subscription_id = %job.subscription.id,
            event = %event,
            "Job enqueued (Redis)"
        );
        metrics::counter!(
            "webhook_jobs_enqueued_total",
            "event" => event.as_str(),
            "backend" => BACKEND_NAME
        )
        .increment(1);

        Ok(id)
    }

    async fn cancel_job(&self, id: &str) -> Result<bool> {
        let mut conn = self.shared.conn.clone();
        let cancelled: i64 = redis::Script::new(CANCEL_SCRIPT)
            .key(&self.shared.keys.delayed)
            .key(&self.shared.keys.active)
            .key(self.shared.keys.job(id))
            .arg(id)
            .invoke_async(&mut conn)
            .await?;

        if cancelled == 1 {
            info!(job_id = %id, "Job cancelled (Redis)");
        }
        Ok(cancelled == 1)
    }

    async fn get_job_status(&self, id: &str) -> Result<Option<JobStatus>> {
        let mut conn = self.shared.conn.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.shared.keys.job(id))
            .query_async(&mut conn)
            .await?;
        status_from_hash(id, &fields)
    }

    async fn close(&self) -> Result<CloseSummary> {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return Ok(CloseSummary::default());
        }

        info!("Draining Redis webhook queue workers");
        let _ = self.shutdown_tx.send(());

        let handles = std::mem::take(&mut *self.tasks.lock());
        let timed_out = tokio::time::timeout(self.drain_timeout, futures::future::join_all(handles))
            .await
            .is_err();
        if timed_out {
            warn!(
                drain_timeout_ms = self.drain_timeout.as_millis() as u64,
                "Drain timed out; unfinished leases will be recovered"
            );
        }
        info!("Redis webhook queue closed");

        Ok(CloseSummary {
            dropped_jobs: 0,
            timed_out,
        })
    }

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = Keys::new("storefront:webhooks:");
        assert_eq!(keys.seq, "storefront:webhooks:seq");
        assert_eq!(keys.delayed, "storefront:webhooks:delayed");
        assert_eq!(keys.active, "storefront:webhooks:active");
        assert_eq!(keys.job("42"), "storefront:webhooks:job:42");
    }

    #[test]
    fn test_status_from_hash() {
        let fields: HashMap<String, String> = [
            ("state", "waiting"),
            ("attempts", "1"),
            ("max_attempts", "3"),
            ("failed_reason", "Subscriber responded with HTTP 500"),
            ("scheduled_for", "1714557600000"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let status = status_from_hash("7", &fields).unwrap().unwrap();
        assert_eq!(status.id, "7");
        assert_eq!(status.state, JobState::Waiting);
        assert_eq!(status.attempts, 1);
        assert_eq!(status.max_attempts, 3);
        assert!(status.failed_reason.unwrap().contains("500"));
        assert_eq!(status.scheduled_for.unwrap().timestamp_millis(), 1_714_557_600_000);
    }

    #[test]
    fn test_expired_lease_on_last_attempt_reads_as_failed() {
        // Hash left by the recovery sweep once attempts reached max_attempts
        let fields: HashMap<String, String> = [
            ("state", "failed"),
            ("attempts", "3"),
            ("max_attempts", "3"),
            ("failed_reason", LEASE_EXPIRED_REASON),
            ("scheduled_for", ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let status = status_from_hash("9", &fields).unwrap().unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.state.is_terminal());
        assert_eq!(status.attempts, status.max_attempts);
        assert_eq!(status.failed_reason.as_deref(), Some(LEASE_EXPIRED_REASON));
        assert!(status.scheduled_for.is_none());
        assert!(RECOVER_SCRIPT.contains("attempts >= max"));
    }

    #[test]
    fn test_missing_hash_is_unknown_job() {
        assert!(status_from_hash("1", &HashMap::new()).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_hash() {
        let fields: HashMap<String, String> =
            [("state".to_string(), "exploded".to_string())].into_iter().collect();
        assert!(matches!(
            status_from_hash("1", &fields),
            Err(QueueError::Corrupt { .. })
        ));
    }
}
