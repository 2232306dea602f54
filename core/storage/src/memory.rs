//! In-memory local cache store for testing.

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

use spotsync_common::{EntityFamily, EntityId, Error, Result, SyncStatus};

use crate::store::{LocalStore, PendingPhoto, RecordPredicate, StoredRecord};

#[derive(Default)]
struct State {
    records: HashMap<(EntityFamily, i64), StoredRecord>,
    photos: Vec<PendingPhoto>,
    meta: HashMap<String, String>,
    next_seq: u64,
    next_photo_id: i64,
    unavailable: bool,
}

/// In-memory local cache store.
///
/// Useful for testing and ephemeral sessions. All data is lost on drop.
/// [`MemoryStore::set_unavailable`] makes every call fail, which simulates
/// a corrupted or locked database.
pub struct MemoryStore {
    state: RwLock<State>,
    revision: watch::Sender<u64>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: RwLock::new(State {
                next_seq: 1,
                next_photo_id: 1,
                ..Default::default()
            }),
            revision,
        }
    }

    /// Make every subsequent call fail with a storage error.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state.write() {
            state.unavailable = unavailable;
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        let state = self
            .state
            .read()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))?;
        if state.unavailable {
            return Err(Error::Storage("Memory store unavailable".to_string()));
        }
        Ok(state)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        let state = self
            .state
            .write()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))?;
        if state.unavailable {
            return Err(Error::Storage("Memory store unavailable".to_string()));
        }
        Ok(state)
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn sorted(&self, family: EntityFamily) -> Result<Vec<StoredRecord>> {
        let state = self.read()?;
        let mut records: Vec<StoredRecord> = state
            .records
            .values()
            .filter(|r| r.family == family)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id.recency_key());
        Ok(records)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn upsert(&self, record: &StoredRecord) -> Result<()> {
        self.write()?
            .records
            .insert((record.family, record.id.as_i64()), record.clone());
        self.bump();
        Ok(())
    }

    fn get(&self, family: EntityFamily, id: EntityId) -> Result<Option<StoredRecord>> {
        Ok(self.read()?.records.get(&(family, id.as_i64())).cloned())
    }

    fn delete(&self, family: EntityFamily, id: EntityId) -> Result<bool> {
        let removed = self.write()?.records.remove(&(family, id.as_i64())).is_some();
        if removed {
            self.bump();
        }
        Ok(removed)
    }

    fn list_filtered(
        &self,
        family: EntityFamily,
        predicate: RecordPredicate<'_>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredRecord>> {
        Ok(self
            .sorted(family)?
            .into_iter()
            .filter(|r| predicate(r))
            .skip(offset)
            .take(limit)
            .collect())
    }

    fn count(&self, family: EntityFamily, predicate: RecordPredicate<'_>) -> Result<usize> {
        Ok(self.sorted(family)?.iter().filter(|r| predicate(r)).count())
    }

    fn list_by_status(&self, family: EntityFamily, status: SyncStatus) -> Result<Vec<StoredRecord>> {
        Ok(self
            .sorted(family)?
            .into_iter()
            .filter(|r| r.sync_status == status)
            .collect())
    }

    fn list_pending_ids(&self, family: EntityFamily) -> Result<Vec<EntityId>> {
        Ok(self
            .sorted(family)?
            .iter()
            .filter(|r| r.sync_status.is_pending())
            .map(|r| r.id)
            .collect())
    }

    fn next_local_seq(&self) -> Result<u64> {
        let mut state = self.write()?;
        let seq = state.next_seq;
        state.next_seq += 1;
        Ok(seq)
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.meta.get(key).cloned())
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.write()?.meta.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn enqueue_photo(&self, owner_id: EntityId, file_path: PathBuf, is_main: bool) -> Result<PendingPhoto> {
        let photo = {
            let mut state = self.write()?;
            let photo = PendingPhoto {
                id: state.next_photo_id,
                owner_id,
                file_path,
                is_main,
                queued_at: Utc::now(),
            };
            state.next_photo_id += 1;
            state.photos.push(photo.clone());
            photo
        };
        self.bump();
        Ok(photo)
    }

    fn list_photos(&self) -> Result<Vec<PendingPhoto>> {
        Ok(self.read()?.photos.clone())
    }

    fn remove_photo(&self, id: i64) -> Result<bool> {
        let removed = {
            let mut state = self.write()?;
            let before = state.photos.len();
            state.photos.retain(|p| p.id != id);
            state.photos.len() != before
        };
        if removed {
            self.bump();
        }
        Ok(removed)
    }

    fn reassign_photo_owner(&self, from: EntityId, to: EntityId) -> Result<usize> {
        let moved = {
            let mut state = self.write()?;
            let mut moved = 0;
            for photo in state.photos.iter_mut().filter(|p| p.owner_id == from) {
                photo.owner_id = to;
                moved += 1;
            }
            moved
        };
        if moved > 0 {
            self.bump();
        }
        Ok(moved)
    }

    fn count_photos(&self) -> Result<usize> {
        Ok(self.read()?.photos.len())
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
