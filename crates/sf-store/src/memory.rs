//! In-memory repositories

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use sf_common::{DeliveryStats, EventKind, OutcomeFilter, OutcomeRecord, Subscription};

use crate::repository::{OutcomeRepository, SubscriptionRepository};
use crate::{Result, StoreError};

#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    subscriptions: RwLock<HashMap<String, Subscription>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn insert(&self, subscription: &Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.write();
        if subscriptions.contains_key(&subscription.id) {
            return Err(StoreError::Conflict(format!("subscription {}", subscription.id)));
        }
        subscriptions.insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn update(&self, subscription: &Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.write();
        match subscriptions.get_mut(&subscription.id) {
            Some(existing) if !existing.is_deleted() => {
                *existing = subscription.clone();
                Ok(())
            }
            _ => Err(StoreError::NotFound(format!("subscription {}", subscription.id))),
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Subscription>> {
        Ok(self.subscriptions.read().get(id).cloned())
    }

    async fn find_active(&self, kind: EventKind) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .read()
            .values()
            .filter(|s| s.matches(kind))
            .cloned()
            .collect())
    }

    async fn list(&self, include_deleted: bool) -> Result<Vec<Subscription>> {
        let mut all: Vec<Subscription> = self
            .subscriptions
            .read()
            .values()
            .filter(|s| include_deleted || !s.is_deleted())
            .cloned()
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn soft_delete(&self, id: &str) -> Result<bool> {
        let mut subscriptions = self.subscriptions.write();
        match subscriptions.get_mut(id) {
            Some(subscription) if !subscription.is_deleted() => {
                let now = Utc::now();
                subscription.deleted_at = Some(now);
                subscription.active = false;
                subscription.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryOutcomeRepository {
    records: RwLock<Vec<OutcomeRecord>>,
}

impl InMemoryOutcomeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, in insertion order
    pub fn all(&self) -> Vec<OutcomeRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl OutcomeRepository for InMemoryOutcomeRepository {
    async fn insert(&self, record: &OutcomeRecord) -> Result<()> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn search(
        &self,
        filter: &OutcomeFilter,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<OutcomeRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count(&self, filter: &OutcomeFilter) -> Result<u64> {
        Ok(self.records.read().iter().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn stats(&self, subscription_id: Option<&str>) -> Result<DeliveryStats> {
        let mut stats = DeliveryStats::default();
        for record in self.records.read().iter() {
            if subscription_id.map_or(true, |id| record.subscription_id == id) {
                stats.record(record.succeeded());
            }
        }
        Ok(stats)
    }
}
