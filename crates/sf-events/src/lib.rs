//! Storefront event builders
//!
//! Turns domain records (orders, customers, line items) into validated
//! webhook payloads, one builder per event kind.

pub mod builder;
pub mod domain;
pub mod store;

pub use builder::{CartReminderBuilder, OrderCreatedBuilder, OrderPaidBuilder};
pub use domain::{Customer, Order, OrderItem, OrderStatus};
pub use store::{InMemoryOrderStatusStore, OrderStatusStore, OrderStoreError};
