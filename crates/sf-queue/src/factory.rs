use std::sync::Arc;

use sf_common::JobExecutor;
use sf_config::{BackendPreference, QueueConfig};
use tracing::{info, warn};

use crate::memory::InProcessQueue;
use crate::redis_queue::RedisQueue;
use crate::{QueueBackend, QueueError, Result};

/// Pick and start the queue backend.
///
/// `auto` uses Redis when a URL is configured and the server answers, and
/// falls back to the in-process queue otherwise. `redis` fails instead of
/// falling back. `memory` never touches Redis.
pub async fn create_queue_backend(
    config: &QueueConfig,
    executor: Arc<dyn JobExecutor>,
) -> Result<Arc<dyn QueueBackend>> {
    match config.backend {
        BackendPreference::Memory => {
            info!("Using in-process webhook queue (configured)");
            Ok(Arc::new(InProcessQueue::start(config, executor)))
        }
        BackendPreference::Redis => {
            if config.redis_url.is_none() {
                return Err(QueueError::Unavailable(
                    "queue.backend = redis but no Redis URL configured".to_string(),
                ));
            }
            let queue = RedisQueue::connect(config, executor).await?;
            info!("Using Redis webhook queue");
            Ok(Arc::new(queue))
        }
        BackendPreference::Auto => {
            if config.redis_url.is_none() {
                info!("No Redis URL configured, using in-process webhook queue");
                return Ok(Arc::new(InProcessQueue::start(config, executor)));
            }
            match RedisQueue::connect(config, executor.clone()).await {
                Ok(queue) => {
                    info!("Using Redis webhook queue");
                    Ok(Arc::new(queue))
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        "Redis unavailable, falling back to in-process webhook queue"
                    );
                    Ok(Arc::new(InProcessQueue::start(config, executor)))
                }
            }
        }
    }
}
