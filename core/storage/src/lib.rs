//! Local cache store for SpotSync.
//!
//! This module provides a trait-based interface for the durable table of
//! entity records that backs offline operation, plus the pending-photo
//! queue and a small meta key-value table.
//!
//! # Design Principles
//! - Passive storage: no business rules, the sync layer owns all transitions
//! - Single-row atomicity: every write is one upsert or delete
//! - Observable: every write bumps a revision counter

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{
    LocalStore, LocalStoreExt, PendingPhoto, RecordPredicate, StoredRecord, LAST_SYNC_KEY,
    NEXT_LOCAL_SEQ_KEY,
};
