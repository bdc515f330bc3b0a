//! Subscription Registry
//!
//! Resolves the active subscriptions for an event kind, with an optional
//! short-lived cache per kind. Every invalidation bumps a generation so a
//! load that started before it never repopulates the cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sf_common::{EventKind, Subscription};
use sf_store::{StoreError, SubscriptionRepository};
use tracing::debug;

#[derive(Default)]
struct Cache {
    generation: u64,
    entries: HashMap<EventKind, (Instant, Vec<Subscription>)>,
}

pub struct SubscriptionRegistry {
    repository: Arc<dyn SubscriptionRepository>,
    ttl: Duration,
    cache: Mutex<Cache>,
}

impl SubscriptionRegistry {
    /// A zero `ttl` disables caching
    pub fn new(repository: Arc<dyn SubscriptionRepository>, ttl: Duration) -> Self {
        Self {
            repository,
            ttl,
            cache: Mutex::new(Cache::default()),
        }
    }

    /// Active, non-deleted subscriptions interested in `kind`
    pub async fn find_active(&self, kind: EventKind) -> Result<Vec<Subscription>, StoreError> {
        if self.ttl.is_zero() {
            return self.repository.find_active(kind).await;
        }

        let generation = {
            let cache = self.cache.lock();
            let cached = cache
                .entries
                .get(&kind)
                .filter(|(loaded_at, _)| loaded_at.elapsed() < self.ttl);
            if let Some((_, subscriptions)) = cached {
                return Ok(subscriptions.clone());
            }
            cache.generation
        };

        let subscriptions = self.repository.find_active(kind).await?;
        debug!(event = %kind, count = subscriptions.len(), "Loaded active subscriptions");

        self.store(kind, generation, &subscriptions);
        Ok(subscriptions)
    }

    /// Cache a load that began at `generation`; dropped if invalidated since
    fn store(&self, kind: EventKind, generation: u64, subscriptions: &[Subscription]) {
        let mut cache = self.cache.lock();
        if cache.generation != generation {
            debug!(event = %kind, "Subscriptions changed during load, not caching");
            return;
        }
        cache
            .entries
            .insert(kind, (Instant::now(), subscriptions.to_vec()));
    }

    pub fn invalidate(&self) {
        let mut cache = self.cache.lock();
        cache.generation += 1;
        cache.entries.clear();
    }
}
