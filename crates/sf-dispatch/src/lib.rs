//! Storefront Webhook Dispatch
//!
//! [`WebhookService`] ties the event builders, the subscription registry and
//! the queue backend together and exposes job management and subscription
//! administration.

pub mod admin;
pub mod error;
pub mod registry;
pub mod service;

pub use admin::SubscriptionInput;
pub use error::{Result, ServiceError};
pub use registry::SubscriptionRegistry;
pub use service::{OutcomePage, ServiceConfig, WebhookService};
