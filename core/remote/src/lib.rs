//! Remote service gateways for SpotSync.
//!
//! This crate provides the [`RemoteGateway`] abstraction over the spot
//! service and its implementations:
//! - HTTP REST client with retry on transient failures
//! - In-memory fake service for tests
//!
//! Gateways exchange JSON; [`EntityGateway`] adds typed access per entity
//! family.

pub mod config;
pub mod gateway;
pub mod http;
pub mod memory;
pub mod retry;
pub mod typed;

pub use config::GatewayConfig;
pub use gateway::{server_id, ListQuery, PhotoUpload, RemoteGateway, RemotePage};
pub use http::HttpGateway;
pub use memory::{MemoryGateway, Operation, ReceivedPhoto};
pub use retry::{Idempotency, RetryConfig, RetryExecutor};
pub use typed::{EntityGateway, RemoteEntities};
