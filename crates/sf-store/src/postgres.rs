//! PostgreSQL repositories

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sf_common::{
    DeliveryStats, EventKind, OutcomeFilter, OutcomeRecord, ResponseSnapshot, Subscription,
};
use sf_events::{OrderStatusStore, OrderStoreError};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::repository::{OutcomeRepository, SubscriptionRepository};
use crate::{Result, StoreError};

const SUBSCRIPTION_COLUMNS: &str =
    "id, name, url, secret, active, events, headers, created_at, updated_at, deleted_at";

const OUTCOME_COLUMNS: &str = "id, job_id, delivery_id, subscription_id, event, attempt, payload, \
     status_code, success, error, duration_ms, created_at";

// ============================================================================
// Subscriptions
// ============================================================================

pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS webhook_subscriptions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                secret TEXT,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                events TEXT[] NOT NULL,
                headers TEXT NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                deleted_at TIMESTAMPTZ
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_webhook_subscriptions_active ON webhook_subscriptions(active) WHERE deleted_at IS NULL",
        ];
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Subscription schema ready (PostgreSQL)");
        Ok(())
    }
}

fn event_names(events: &BTreeSet<EventKind>) -> Vec<String> {
    events.iter().map(|e| e.as_str().to_string()).collect()
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription> {
    let events: Vec<String> = row.try_get("events")?;
    let events = events
        .iter()
        .map(|e| e.parse::<EventKind>())
        .collect::<std::result::Result<BTreeSet<_>, _>>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let headers: String = row.try_get("headers")?;
    let headers: BTreeMap<String, String> = serde_json::from_str(&headers)?;

    Ok(Subscription {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        secret: row.try_get("secret")?,
        active: row.try_get("active")?,
        events,
        headers,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn insert(&self, subscription: &Subscription) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_subscriptions
                (id, name, url, secret, active, events, headers, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&subscription.id)
        .bind(&subscription.name)
        .bind(&subscription.url)
        .bind(&subscription.secret)
        .bind(subscription.active)
        .bind(event_names(&subscription.events))
        .bind(serde_json::to_string(&subscription.headers)?)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .bind(subscription.deleted_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("subscription {}", subscription.id)));
        }
        Ok(())
    }

    async fn update(&self, subscription: &Subscription) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_subscriptions
            SET name = $2, url = $3, secret = $4, active = $5, events = $6, headers = $7,
                updated_at = $8
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(&subscription.id)
        .bind(&subscription.name)
        .bind(&subscription.url)
        .bind(&subscription.secret)
        .bind(subscription.active)
        .bind(event_names(&subscription.events))
        .bind(serde_json::to_string(&subscription.headers)?)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("subscription {}", subscription.id)));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Subscription>> {
        let query = format!(
            "SELECT {} FROM webhook_subscriptions WHERE id = $1",
            SUBSCRIPTION_COLUMNS
        );
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn find_active(&self, kind: EventKind) -> Result<Vec<Subscription>> {
        let query = format!(
            "SELECT {} FROM webhook_subscriptions WHERE active AND deleted_at IS NULL AND $1 = ANY(events)",
            SUBSCRIPTION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;
        debug!(event = %kind, count = rows.len(), "Resolved active subscriptions");
        rows.iter().map(subscription_from_row).collect()
    }

    async fn list(&self, include_deleted: bool) -> Result<Vec<Subscription>> {
        let query = format!(
            "SELECT {} FROM webhook_subscriptions WHERE $1 OR deleted_at IS NULL ORDER BY created_at, id",
            SUBSCRIPTION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(include_deleted)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn soft_delete(&self, id: &str) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE webhook_subscriptions SET deleted_at = $2, updated_at = $2, active = FALSE WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Delivery Outcomes
// ============================================================================

pub struct PostgresOutcomeRepository {
    pool: PgPool,
}

impl PostgresOutcomeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS webhook_deliveries (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                delivery_id TEXT NOT NULL,
                subscription_id TEXT NOT NULL,
                event TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                payload TEXT NOT NULL,
                status_code INTEGER,
                success BOOLEAN NOT NULL,
                error TEXT,
                duration_ms BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_subscription ON webhook_deliveries(subscription_id, created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_created ON webhook_deliveries(created_at DESC)",
        ];
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Delivery outcome schema ready (PostgreSQL)");
        Ok(())
    }
}

fn outcome_from_row(row: &PgRow) -> Result<OutcomeRecord> {
    let event: String = row.try_get("event")?;
    let event = event
        .parse::<EventKind>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let payload: String = row.try_get("payload")?;
    let status_code: Option<i32> = row.try_get("status_code")?;
    let attempt: i32 = row.try_get("attempt")?;
    let duration_ms: i64 = row.try_get("duration_ms")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(OutcomeRecord {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        delivery_id: row.try_get("delivery_id")?,
        subscription_id: row.try_get("subscription_id")?,
        event,
        attempt: attempt.max(0) as u32,
        payload: serde_json::from_str(&payload)?,
        response: ResponseSnapshot {
            status_code: status_code.and_then(|c| u16::try_from(c).ok()),
            success: row.try_get("success")?,
            error: row.try_get("error")?,
            duration_ms: duration_ms.max(0) as u64,
        },
        created_at,
    })
}

const OUTCOME_FILTER: &str = "($1::text IS NULL OR subscription_id = $1) \
     AND ($2::text IS NULL OR event = $2) \
     AND ($3::boolean IS NULL OR success = $3)";

#[async_trait]
impl OutcomeRepository for PostgresOutcomeRepository {
    async fn insert(&self, record: &OutcomeRecord) -> Result<()> {
        let query = format!(
            "INSERT INTO webhook_deliveries ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            OUTCOME_COLUMNS
        );
        sqlx::query(&query)
            .bind(&record.id)
            .bind(&record.job_id)
            .bind(&record.delivery_id)
            .bind(&record.subscription_id)
            .bind(record.event.as_str())
            .bind(record.attempt as i32)
            .bind(serde_json::to_string(&record.payload)?)
            .bind(record.response.status_code.map(i32::from))
            .bind(record.response.success)
            .bind(&record.response.error)
            .bind(record.response.duration_ms as i64)
            .bind(record.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        filter: &OutcomeFilter,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<OutcomeRecord>> {
        let query = format!(
            "SELECT {} FROM webhook_deliveries WHERE {} ORDER BY created_at DESC, id LIMIT $4 OFFSET $5",
            OUTCOME_COLUMNS, OUTCOME_FILTER
        );
        let rows = sqlx::query(&query)
            .bind(filter.subscription_id.as_deref())
            .bind(filter.event.map(|e| e.as_str()))
            .bind(filter.success)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(outcome_from_row).collect()
    }

    async fn count(&self, filter: &OutcomeFilter) -> Result<u64> {
        let query = format!(
            "SELECT COUNT(*) AS total FROM webhook_deliveries WHERE {}",
            OUTCOME_FILTER
        );
        let row = sqlx::query(&query)
            .bind(filter.subscription_id.as_deref())
            .bind(filter.event.map(|e| e.as_str()))
            .bind(filter.success)
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = row.try_get("total")?;
        Ok(total.max(0) as u64)
    }

    async fn stats(&self, subscription_id: Option<&str>) -> Result<DeliveryStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE success) AS succeeded
            FROM webhook_deliveries
            WHERE ($1::text IS NULL OR subscription_id = $1)
            "#,
        )
        .bind(subscription_id)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let succeeded: i64 = row.try_get("succeeded")?;
        Ok(DeliveryStats {
            total: total.max(0) as u64,
            succeeded: succeeded.max(0) as u64,
            failed: (total - succeeded).max(0) as u64,
        })
    }
}

// ============================================================================
// Order Status
// ============================================================================

/// Order status transitions against the storefront's `orders` table
/// (`id TEXT`, `status TEXT`, `updated_at TIMESTAMPTZ`)
pub struct PostgresOrderStatusStore {
    pool: PgPool,
}

impl PostgresOrderStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStatusStore for PostgresOrderStatusStore {
    async fn mark_abandoned(&self, order_id: &str) -> std::result::Result<bool, OrderStoreError> {
        let result = sqlx::query(
            "UPDATE orders SET status = 'abandoned', updated_at = NOW() WHERE id = $1 AND status = 'draft'",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                OrderStoreError::Unavailable(e.to_string())
            }
            other => OrderStoreError::Query(other.to_string()),
        })?;
        Ok(result.rows_affected() > 0)
    }
}
