//! Common utilities and types shared across SpotSync modules.
//!
//! This module provides the foundational types the storage, remote and sync
//! crates agree on: the error taxonomy, record identity, synchronization
//! status, and the generic entity surface with its concrete families.

pub mod entity;
pub mod error;
pub mod models;
pub mod types;

pub use entity::{Entity, EntityFilter, Page, PageSource, Record};
pub use error::{Error, Result};
pub use models::{Spot, SpotDraft, SpotFilter, SpotPatch, Visit, VisitDraft, VisitFilter, VisitPatch};
pub use types::{EntityFamily, EntityId, SyncStatus};
