//! Core types for Merchant Pulse.
//!
//! This module provides type-safe wrappers for the webhook queue and store
//! domain concepts.

pub mod id;
pub mod job;
pub mod shop;
pub mod topic;

pub use id::StoreId;
pub use job::{DurableJobMeta, Job, JobStatus, WebhookJob};
pub use shop::{ShopDomain, ShopDomainError};
pub use topic::{TopicKey, TopicKeyError};
