//! Order status transitions triggered by event building

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::domain::OrderStatus;

#[derive(Error, Debug)]
pub enum OrderStoreError {
    #[error("Order store unavailable: {0}")]
    Unavailable(String),

    #[error("Order store query failed: {0}")]
    Query(String),
}

/// Conditional order status updates.
///
/// `mark_abandoned` moves an order from `draft` to `abandoned` and reports
/// whether this call performed the transition. Orders already moved, or
/// unknown to the store, report `false`.
#[async_trait]
pub trait OrderStatusStore: Send + Sync {
    async fn mark_abandoned(&self, order_id: &str) -> Result<bool, OrderStoreError>;
}

/// In-memory order status table for development and tests
#[derive(Default)]
pub struct InMemoryOrderStatusStore {
    statuses: Mutex<HashMap<String, OrderStatus>>,
    transitions: Mutex<u64>,
}

impl InMemoryOrderStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, order_id: impl Into<String>, status: OrderStatus) {
        self.statuses.lock().insert(order_id.into(), status);
    }

    pub fn status(&self, order_id: &str) -> Option<OrderStatus> {
        self.statuses.lock().get(order_id).copied()
    }

    /// Number of `draft -> abandoned` transitions performed
    pub fn transitions(&self) -> u64 {
        *self.transitions.lock()
    }
}

#[async_trait]
impl OrderStatusStore for InMemoryOrderStatusStore {
    async fn mark_abandoned(&self, order_id: &str) -> Result<bool, OrderStoreError> {
        let mut statuses = self.statuses.lock();
        match statuses.get_mut(order_id) {
            Some(status) if *status == OrderStatus::Draft => {
                *status = OrderStatus::Abandoned;
                *self.transitions.lock() += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mark_abandoned_is_conditional() {
        let store = InMemoryOrderStatusStore::new();
        store.set_status("O1", OrderStatus::Draft);
        store.set_status("O2", OrderStatus::Paid);

        assert!(store.mark_abandoned("O1").await.unwrap());
        assert!(!store.mark_abandoned("O1").await.unwrap());
        assert!(!store.mark_abandoned("O2").await.unwrap());
        assert!(!store.mark_abandoned("missing").await.unwrap());

        assert_eq!(store.status("O1"), Some(OrderStatus::Abandoned));
        assert_eq!(store.status("O2"), Some(OrderStatus::Paid));
        assert_eq!(store.transitions(), 1);
    }
}
