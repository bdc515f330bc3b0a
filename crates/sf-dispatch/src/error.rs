//! Dispatch Service Error Types

use sf_common::ValidationError;
use sf_events::OrderStoreError;
use sf_queue::QueueError;
use sf_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Order store error: {0}")]
    OrderStore(#[from] OrderStoreError),
}

impl ServiceError {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
