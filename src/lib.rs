//! # SMM Dispatch
//!
//! Forwards confirmed storefront orders to an SMM provider panel: orders
//! become durable jobs exactly once, and a retry worker delivers them with
//! bounded retries, link-based quantity splitting and transport fallback.

pub mod client;
pub mod config;
pub mod db;
pub mod distributor;
pub mod error;
pub mod handlers;
pub mod ingestion;
pub mod models;
pub mod orders;
pub mod repositories;
pub mod routing;
pub mod scheduler;
pub mod server;
pub mod telemetry;
pub mod worker;
pub use migration;
