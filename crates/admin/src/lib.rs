//! Merchant Pulse admin library.
//!
//! Webhook job queue, Shopify Admin API gateway and the webhook ingestion
//! server, exposed as a library so the CLI worker and the integration tests
//! can use them.
//!
//! # Security
//!
//! This crate handles HIGH PRIVILEGE credentials:
//! - Per-store Shopify Admin API access tokens (decrypted on demand)
//! - The Shopify app secret (webhook signature verification)

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod retry;
pub mod routes;
pub mod shopify;
pub mod state;
pub mod telemetry;
pub mod webhooks;
