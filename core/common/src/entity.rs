//! Generic entity surface shared by every entity family.
//!
//! The sync engine is written once against [`Entity`]; each family only
//! describes its fields, how a partial update applies, and how a filter
//! selects records locally.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::types::{EntityFamily, EntityId, SyncStatus};

/// A domain object kind with remote and local CRUD.
pub trait Entity: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Field set submitted on create, and on last-write-wins updates.
    type Draft: Clone + Debug + Send + Sync + Serialize + DeserializeOwned;
    /// Partial field set; only the supplied fields are applied.
    type Patch: Clone + Debug + Default + Send + Sync + Serialize + DeserializeOwned;
    /// Predicates and pagination for list calls.
    type Filter: EntityFilter<Self>;

    /// The family this entity belongs to.
    const FAMILY: EntityFamily;

    /// Identity of this entity.
    fn id(&self) -> EntityId;

    /// Build an entity from submitted fields, as stored before the server
    /// has seen it.
    fn from_draft(id: EntityId, draft: Self::Draft) -> Self;

    /// Current full field set.
    fn to_draft(&self) -> Self::Draft;

    /// Apply the supplied fields of a patch, leaving the rest untouched.
    fn apply_patch(&mut self, patch: &Self::Patch);

    /// Reject drafts the server would never accept.
    fn validate_draft(_draft: &Self::Draft) -> crate::Result<()> {
        Ok(())
    }

    /// Ids of records in other families this entity points at.
    fn references(&self) -> Vec<(EntityFamily, EntityId)> {
        Vec::new()
    }

    /// Rewrite a reference after a pending record was committed.
    ///
    /// Returns whether anything changed.
    fn remap_reference(&mut self, _family: EntityFamily, _from: EntityId, _to: EntityId) -> bool {
        false
    }

    /// Whether this entity still points at a record the server has not seen.
    fn has_pending_reference(&self) -> bool {
        self.references().iter().any(|(_, id)| id.is_pending())
    }
}

/// Filter predicates plus pagination for one entity family.
pub trait EntityFilter<E>: Clone + Debug + Default + Send + Sync {
    /// One-based page number.
    fn page(&self) -> u32;

    /// Maximum number of items per page.
    fn limit(&self) -> u32;

    /// Whether a locally cached entity passes the predicates.
    fn matches(&self, entity: &E) -> bool;

    /// Predicates as remote query parameters, excluding pagination.
    fn query_params(&self) -> Vec<(String, String)>;

    /// Whether the predicates mention a record the server has not seen,
    /// so only the local cache can answer.
    fn is_local_only(&self) -> bool {
        false
    }

    /// Number of items preceding the requested page.
    fn offset(&self) -> usize {
        (self.page().max(1) as usize - 1) * self.limit() as usize
    }
}

/// An entity together with its synchronization fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record<E> {
    /// Domain object.
    pub entity: E,
    /// Reconciliation state relative to the server.
    pub sync_status: SyncStatus,
    /// Time of the last local-only mutation; `None` when the record mirrors
    /// the last known server state.
    pub locally_modified_at: Option<DateTime<Utc>>,
}

impl<E: Entity> Record<E> {
    /// A record that mirrors server state.
    pub fn synced(entity: E) -> Self {
        Self {
            entity,
            sync_status: SyncStatus::Synced,
            locally_modified_at: None,
        }
    }

    /// A record carrying a local-only change.
    pub fn pending(entity: E, status: SyncStatus, modified_at: DateTime<Utc>) -> Self {
        Self {
            entity,
            sync_status: status,
            locally_modified_at: Some(modified_at),
        }
    }

    /// Identity of the wrapped entity.
    pub fn id(&self) -> EntityId {
        self.entity.id()
    }

    /// Whether the record mirrors server state.
    pub fn is_synced(&self) -> bool {
        self.sync_status == SyncStatus::Synced
    }
}

/// Where a page of results came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSource {
    /// Served by the remote service.
    Remote,
    /// Computed from the local cache.
    Local,
}

/// One page of list results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// One-based page number.
    pub page: u32,
    pub limit: u32,
    /// Total matching items, when known.
    pub total: Option<usize>,
    pub source: PageSource,
}

impl<T> Page<T> {
    /// Whether further pages may exist.
    pub fn has_more(&self) -> bool {
        match self.total {
            Some(total) => (self.page.max(1) as usize) * (self.limit as usize) < total,
            None => self.items.len() as u32 == self.limit,
        }
    }
}
