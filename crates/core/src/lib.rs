//! Merchant Pulse Core - Shared types library.
//!
//! This crate provides common types used across all Merchant Pulse components:
//! - `admin` - Webhook ingestion server, job queue and Shopify Admin gateway
//! - `cli` - Queue worker and operator tooling
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Webhook jobs, topic keys, shop domains and type-safe IDs

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
