//! Storefront webhook persistence
//!
//! Repository traits for subscriptions and delivery outcome records, with
//! in-memory implementations for development and tests and PostgreSQL
//! implementations for production.

pub mod memory;
pub mod postgres;
pub mod repository;

use thiserror::Error;

pub use memory::{InMemoryOutcomeRepository, InMemorySubscriptionRepository};
pub use postgres::{
    PostgresOrderStatusStore, PostgresOutcomeRepository, PostgresSubscriptionRepository,
};
pub use repository::{OutcomeRepository, SubscriptionRepository};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
