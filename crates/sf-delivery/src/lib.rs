//! Storefront webhook delivery
//!
//! - [`DeliveryExecutor`]: one signed POST per attempt, outcome persisted
//! - [`sign_payload`] / [`verify_signature`]: `sha256=<hex>` HMAC helpers

pub mod executor;
pub mod signature;

pub use executor::{
    DeliveryConfig, DeliveryExecutor, HEADER_ATTEMPT, HEADER_DELIVERY, HEADER_EVENT,
    HEADER_SIGNATURE,
};
pub use signature::{sign_payload, verify_signature, SIGNATURE_PREFIX};
