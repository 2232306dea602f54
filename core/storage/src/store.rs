//! Local cache store trait definition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::watch;

use spotsync_common::{Entity, EntityFamily, EntityId, Error, Record, Result, SyncStatus};

/// Meta key holding the timestamp of the last successful sync run.
pub const LAST_SYNC_KEY: &str = "last_sync_at";

/// Meta key holding the next temporary id sequence number.
pub const NEXT_LOCAL_SEQ_KEY: &str = "next_local_seq";

/// Untyped entity row as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub family: EntityFamily,
    pub id: EntityId,
    pub sync_status: SyncStatus,
    pub locally_modified_at: Option<DateTime<Utc>>,
    /// Serialized entity fields.
    pub data: serde_json::Value,
}

impl StoredRecord {
    /// Convert a typed record into a row.
    pub fn from_record<E: Entity>(record: &Record<E>) -> Result<Self> {
        Ok(Self {
            family: E::FAMILY,
            id: record.id(),
            sync_status: record.sync_status,
            locally_modified_at: record.locally_modified_at,
            data: serde_json::to_value(&record.entity)?,
        })
    }

    /// Convert a row back into a typed record.
    ///
    /// # Errors
    /// - Row belongs to another family
    /// - Stored fields no longer match the entity shape
    pub fn into_record<E: Entity>(self) -> Result<Record<E>> {
        if self.family != E::FAMILY {
            return Err(Error::InvalidInput(format!(
                "Record {} belongs to {}, not {}",
                self.id,
                self.family,
                E::FAMILY
            )));
        }
        let entity: E = serde_json::from_value(self.data)?;
        Ok(Record {
            entity,
            sync_status: self.sync_status,
            locally_modified_at: self.locally_modified_at,
        })
    }
}

/// A photo attached locally and not uploaded yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPhoto {
    /// Queue entry id.
    pub id: i64,
    /// Spot the photo belongs to.
    pub owner_id: EntityId,
    pub file_path: PathBuf,
    pub is_main: bool,
    pub queued_at: DateTime<Utc>,
}

/// Predicate over stored rows used by filtered reads.
pub type RecordPredicate<'a> = &'a (dyn Fn(&StoredRecord) -> bool + Send + Sync);

/// Durable table of entity records, pending photos and meta values.
///
/// Implementations are passive: they enforce no business rules and apply
/// each single-row write atomically. Every write bumps the revision
/// published through [`LocalStore::changes`].
pub trait LocalStore: Send + Sync {
    /// Get the store name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Insert or replace a record keyed by family and id.
    fn upsert(&self, record: &StoredRecord) -> Result<()>;

    /// Get a record by id.
    fn get(&self, family: EntityFamily, id: EntityId) -> Result<Option<StoredRecord>>;

    /// Delete a record. Returns whether a row was removed.
    fn delete(&self, family: EntityFamily, id: EntityId) -> Result<bool>;

    /// Records passing `predicate`, ordered by id descending, after skipping
    /// `offset` matches and returning at most `limit`.
    fn list_filtered(
        &self,
        family: EntityFamily,
        predicate: RecordPredicate<'_>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredRecord>>;

    /// Number of records passing `predicate`.
    fn count(&self, family: EntityFamily, predicate: RecordPredicate<'_>) -> Result<usize>;

    /// Records with the given status.
    fn list_by_status(&self, family: EntityFamily, status: SyncStatus) -> Result<Vec<StoredRecord>>;

    /// Ids of every record that is not Synced.
    fn list_pending_ids(&self, family: EntityFamily) -> Result<Vec<EntityId>>;

    /// Number of records that are not Synced.
    fn count_pending(&self, family: EntityFamily) -> Result<usize> {
        Ok(self.list_pending_ids(family)?.len())
    }

    /// Reserve the next temporary id sequence number.
    ///
    /// Numbers are durable and strictly increasing, starting at 1.
    fn next_local_seq(&self) -> Result<u64>;

    /// Read a meta value.
    fn get_meta(&self, key: &str) -> Result<Option<String>>;

    /// Write a meta value.
    fn set_meta(&self, key: &str, value: &str) -> Result<()>;

    /// Queue a photo for upload.
    fn enqueue_photo(&self, owner_id: EntityId, file_path: PathBuf, is_main: bool) -> Result<PendingPhoto>;

    /// Queued photos, oldest first.
    fn list_photos(&self) -> Result<Vec<PendingPhoto>>;

    /// Drop a queue entry. Returns whether it existed.
    fn remove_photo(&self, id: i64) -> Result<bool>;

    /// Point queued photos of `from` at `to`. Returns the number moved.
    fn reassign_photo_owner(&self, from: EntityId, to: EntityId) -> Result<usize>;

    /// Number of queued photos.
    fn count_photos(&self) -> Result<usize>;

    /// Subscribe to the write revision counter.
    fn changes(&self) -> watch::Receiver<u64>;
}

/// Typed access on top of [`LocalStore`].
pub trait LocalStoreExt: LocalStore {
    /// Get a typed record by id.
    fn get_record<E: Entity>(&self, id: EntityId) -> Result<Option<Record<E>>> {
        self.get(E::FAMILY, id)?
            .map(StoredRecord::into_record)
            .transpose()
    }

    /// Insert or replace a typed record.
    fn put_record<E: Entity>(&self, record: &Record<E>) -> Result<()> {
        self.upsert(&StoredRecord::from_record(record)?)
    }

    /// Typed records with the given status.
    fn records_with_status<E: Entity>(&self, status: SyncStatus) -> Result<Vec<Record<E>>> {
        self.list_by_status(E::FAMILY, status)?
            .into_iter()
            .map(StoredRecord::into_record)
            .collect()
    }

    /// Timestamp of the last successful sync, if any.
    fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        match self.get_meta(LAST_SYNC_KEY)? {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| Error::Serialization(format!("Invalid {}: {}", LAST_SYNC_KEY, e))),
            None => Ok(None),
        }
    }

    /// Persist the timestamp of a successful sync.
    fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.set_meta(LAST_SYNC_KEY, &at.to_rfc3339())
    }
}

impl<T: LocalStore + ?Sized> LocalStoreExt for T {}
