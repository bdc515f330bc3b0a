use async_trait::async_trait;
use sf_common::{DeliveryStats, EventKind, OutcomeFilter, OutcomeRecord, Subscription};

use crate::Result;

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn insert(&self, subscription: &Subscription) -> Result<()>;

    /// Replace a stored subscription; `NotFound` when absent or deleted
    async fn update(&self, subscription: &Subscription) -> Result<()>;

    /// Look up by id, soft-deleted rows included
    async fn find_by_id(&self, id: &str) -> Result<Option<Subscription>>;

    /// Active, non-deleted subscriptions interested in `kind`
    async fn find_active(&self, kind: EventKind) -> Result<Vec<Subscription>>;

    async fn list(&self, include_deleted: bool) -> Result<Vec<Subscription>>;

    /// Mark as deleted; `false` when absent or already deleted
    async fn soft_delete(&self, id: &str) -> Result<bool>;
}

/// Append-only store of delivery attempt outcomes
#[async_trait]
pub trait OutcomeRepository: Send + Sync {
    async fn insert(&self, record: &OutcomeRecord) -> Result<()>;

    /// Matching records, newest first
    async fn search(
        &self,
        filter: &OutcomeFilter,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<OutcomeRecord>>;

    async fn count(&self, filter: &OutcomeFilter) -> Result<u64>;

    async fn stats(&self, subscription_id: Option<&str>) -> Result<DeliveryStats>;
}
