//! Offline-first repository over one entity family.
//!
//! Every operation tries the remote service when the device is online and
//! degrades to the local cache when it is offline or the remote call fails.
//! Local-only mutations are stamped and marked pending so the orchestrator
//! can replay them later. Local faults are never masked.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use spotsync_common::{
    Entity, EntityFilter, EntityId, Error, Page, PageSource, Record, Result, SyncStatus,
};
use spotsync_remote::{EntityGateway, RemoteGateway};
use spotsync_storage::{LocalStore, LocalStoreExt, StoredRecord};

use crate::connectivity::ConnectivityMonitor;

/// Generic offline-first CRUD for entity type `E`.
pub struct OfflineRepository<E: Entity> {
    store: Arc<dyn LocalStore>,
    remote: EntityGateway<E>,
    connectivity: ConnectivityMonitor,
}

impl<E: Entity> Clone for OfflineRepository<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            remote: self.remote.clone(),
            connectivity: self.connectivity.clone(),
        }
    }
}

impl<E: Entity> OfflineRepository<E> {
    pub fn new(
        store: Arc<dyn LocalStore>,
        gateway: Arc<dyn RemoteGateway>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        Self {
            store,
            remote: EntityGateway::new(gateway),
            connectivity,
        }
    }

    /// List one page.
    ///
    /// Online, the server answers and page 1 is cached, except for records
    /// with unsynced local changes. Offline or on remote failure, the local
    /// cache is filtered and paginated instead. Deeper pages are not cached.
    pub async fn list(&self, filter: &E::Filter) -> Result<Page<Record<E>>> {
        if self.connectivity.is_online() && !filter.is_local_only() {
            match self.remote.list(filter).await {
                Ok(remote) => {
                    let records: Vec<Record<E>> =
                        remote.items.into_iter().map(Record::synced).collect();
                    if filter.page() == 1 {
                        for record in &records {
                            self.cache_synced(record)?;
                        }
                    }
                    return Ok(Page {
                        items: records,
                        page: filter.page(),
                        limit: filter.limit(),
                        total: remote.total,
                        source: PageSource::Remote,
                    });
                }
                Err(e) if e.is_remote() => {
                    warn!("Listing {} remotely failed, using local cache: {}", E::FAMILY, e);
                }
                Err(e) => return Err(e),
            }
        }

        self.list_local(filter)
    }

    /// Filter and paginate the local cache.
    pub fn list_local(&self, filter: &E::Filter) -> Result<Page<Record<E>>> {
        let predicate = |row: &StoredRecord| {
            row.sync_status != SyncStatus::PendingDelete
                && <E as serde::Deserialize>::deserialize(&row.data).is_ok_and(|entity| filter.matches(&entity))
        };

        let total = self.store.count(E::FAMILY, &predicate)?;
        let items = self
            .store
            .list_filtered(E::FAMILY, &predicate, filter.limit() as usize, filter.offset())?
            .into_iter()
            .map(StoredRecord::into_record)
            .collect::<Result<Vec<Record<E>>>>()?;

        Ok(Page {
            items,
            page: filter.page(),
            limit: filter.limit(),
            total: Some(total),
            source: PageSource::Local,
        })
    }

    /// Fetch one record.
    ///
    /// A local copy with unsynced changes wins over the server copy.
    ///
    /// # Errors
    /// - `NotFound` if neither side has the record
    pub async fn get(&self, id: EntityId) -> Result<Record<E>> {
        let local = self.store.get_record::<E>(id)?;

        if self.connectivity.is_online() && !id.is_pending() {
            match self.remote.get(id).await {
                Ok(entity) => match local {
                    Some(local) if !local.is_synced() => return visible(local, id),
                    _ => {
                        let record = Record::synced(entity);
                        self.store.put_record(&record)?;
                        return Ok(record);
                    }
                },
                Err(e) if e.is_remote() => {
                    warn!("Fetching {} {} remotely failed, using local cache: {}", E::FAMILY, id, e);
                }
                Err(e) => return Err(e),
            }
        }

        match local {
            Some(local) => visible(local, id),
            None => Err(not_found::<E>(id)),
        }
    }

    /// Create a record.
    ///
    /// Never fails for connectivity reasons: without a server response the
    /// record is stored under a temporary id as PendingCreate.
    ///
    /// # Errors
    /// - `InvalidInput` if the draft is rejected locally
    /// - `NotFound` if the draft points at a temporary id the cache does
    ///   not hold
    pub async fn create(&self, draft: E::Draft) -> Result<Record<E>> {
        E::validate_draft(&draft)?;

        let preview = E::from_draft(EntityId::Committed(0), draft.clone());
        for (family, target) in preview.references() {
            if target.is_pending() && self.store.get(family, target)?.is_none() {
                return Err(Error::NotFound(format!("{} {}", family, target)));
            }
        }
        let has_pending_reference = preview.has_pending_reference();

        if self.connectivity.is_online() && !has_pending_reference {
            match self.remote.create(&draft).await {
                Ok(entity) => {
                    let record = Record::synced(entity);
                    self.store.put_record(&record)?;
                    debug!("Created {} {} remotely", E::FAMILY, record.id());
                    return Ok(record);
                }
                Err(e) if e.is_remote() => {
                    warn!("Creating {} remotely failed, storing locally: {}", E::FAMILY, e);
                }
                Err(e) => return Err(e),
            }
        }

        let id = EntityId::pending(self.store.next_local_seq()?)?;
        let record = Record::pending(E::from_draft(id, draft), SyncStatus::PendingCreate, Utc::now());
        self.store.put_record(&record)?;
        debug!("Created {} {} locally", E::FAMILY, id);
        Ok(record)
    }

    /// Apply the supplied fields of `patch`.
    ///
    /// A record the server has never seen stays PendingCreate and is only
    /// changed locally. A record with earlier unsynced edits is sent in
    /// full so none of them are lost.
    ///
    /// # Errors
    /// - `NotFound` if the record is absent or deleted locally and the
    ///   server cannot be asked
    pub async fn update(&self, id: EntityId, patch: E::Patch) -> Result<Record<E>> {
        let local = self.store.get_record::<E>(id)?;
        if let Some(record) = &local {
            if record.sync_status == SyncStatus::PendingDelete {
                return Err(not_found::<E>(id));
            }
        }
        let pending_create = id.is_pending()
            || local
                .as_ref()
                .is_some_and(|r| r.sync_status == SyncStatus::PendingCreate);

        if self.connectivity.is_online() && !pending_create {
            let attempt = match &local {
                Some(record) if record.sync_status == SyncStatus::PendingUpdate => {
                    let mut entity = record.entity.clone();
                    entity.apply_patch(&patch);
                    self.remote.replace(id, &entity.to_draft()).await
                }
                _ => self.remote.update(id, &patch).await,
            };
            match attempt {
                Ok(entity) => {
                    let record = Record::synced(entity);
                    self.store.put_record(&record)?;
                    return Ok(record);
                }
                Err(e) if e.is_remote() => {
                    warn!("Updating {} {} remotely failed, storing locally: {}", E::FAMILY, id, e);
                }
                Err(e) => return Err(e),
            }
        }

        let mut record = local.ok_or_else(|| not_found::<E>(id))?;
        record.entity.apply_patch(&patch);
        E::validate_draft(&record.entity.to_draft())?;
        if record.sync_status != SyncStatus::PendingCreate {
            record.sync_status = SyncStatus::PendingUpdate;
        }
        record.locally_modified_at = Some(Utc::now());
        self.store.put_record(&record)?;
        debug!("Updated {} {} locally", E::FAMILY, id);
        Ok(record)
    }

    /// Delete a record.
    ///
    /// A record the server has never seen is dropped at once without any
    /// network call, together with its queued photos and the unsynced
    /// records that point at it.
    ///
    /// # Errors
    /// - `NotFound` if neither side has the record
    pub async fn delete(&self, id: EntityId) -> Result<()> {
        let local = self.store.get_record::<E>(id)?;

        let pending_create = id.is_pending()
            || local
                .as_ref()
                .is_some_and(|r| r.sync_status == SyncStatus::PendingCreate);
        if pending_create {
            if !self.store.delete(E::FAMILY, id)? {
                return Err(not_found::<E>(id));
            }
            self.drop_queued_photos(id)?;
            self.drop_dependents(id)?;
            debug!("Discarded unsynced {} {}", E::FAMILY, id);
            return Ok(());
        }

        if self.connectivity.is_online() {
            match self.remote.delete(id).await {
                Ok(()) => {
                    self.store.delete(E::FAMILY, id)?;
                    return Ok(());
                }
                Err(Error::NotFound(_)) if local.is_some() => {
                    debug!("{} {} already gone remotely", E::FAMILY, id);
                    self.store.delete(E::FAMILY, id)?;
                    return Ok(());
                }
                Err(Error::NotFound(message)) => return Err(Error::NotFound(message)),
                Err(e) if e.is_remote() => {
                    warn!("Deleting {} {} remotely failed, marking locally: {}", E::FAMILY, id, e);
                }
                Err(e) => return Err(e),
            }
        }

        let mut record = local.ok_or_else(|| not_found::<E>(id))?;
        if record.sync_status != SyncStatus::PendingDelete {
            record.sync_status = SyncStatus::PendingDelete;
            record.locally_modified_at = Some(Utc::now());
            self.store.put_record(&record)?;
        }
        Ok(())
    }

    /// Store a server copy unless the local copy carries unsynced changes.
    fn cache_synced(&self, record: &Record<E>) -> Result<()> {
        match self.store.get(E::FAMILY, record.id())? {
            Some(existing) if existing.sync_status.is_pending() => Ok(()),
            _ => self.store.put_record(record),
        }
    }

    fn drop_queued_photos(&self, owner_id: EntityId) -> Result<()> {
        for photo in self.store.list_photos()? {
            if photo.owner_id == owner_id {
                self.store.remove_photo(photo.id)?;
            }
        }
        Ok(())
    }

    /// Temporary ids are never reused, so records pointing at a discarded
    /// one could never be uploaded.
    fn drop_dependents(&self, id: EntityId) -> Result<()> {
        for &(family, field) in E::FAMILY.referenced_by() {
            let points_here = |row: &StoredRecord| {
                row.sync_status == SyncStatus::PendingCreate
                    && row.data.get(field).and_then(Value::as_i64) == Some(id.as_i64())
            };
            for row in self.store.list_filtered(family, &points_here, usize::MAX, 0)? {
                self.store.delete(family, row.id)?;
                debug!("Discarded unsynced {} {} of {} {}", family, row.id, E::FAMILY, id);
            }
        }
        Ok(())
    }
}

fn not_found<E: Entity>(id: EntityId) -> Error {
    Error::NotFound(format!("{} {}", E::FAMILY, id))
}

/// Local reads hide records marked for deletion.
fn visible<E: Entity>(record: Record<E>, id: EntityId) -> Result<Record<E>> {
    if record.sync_status == SyncStatus::PendingDelete {
        Err(not_found::<E>(id))
    } else {
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spotsync_common::{EntityFamily, Spot, SpotDraft, SpotFilter, SpotPatch, Visit, VisitDraft, VisitFilter};
    use spotsync_remote::{MemoryGateway, Operation};
    use spotsync_storage::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        server: Arc<MemoryGateway>,
        connectivity: ConnectivityMonitor,
        spots: OfflineRepository<Spot>,
        visits: OfflineRepository<Visit>,
    }

    fn fixture(online: bool) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let server = Arc::new(MemoryGateway::new().with_next_id(42));
        let connectivity = ConnectivityMonitor::new(online);
        Fixture {
            spots: OfflineRepository::new(store.clone(), server.clone(), connectivity.clone()),
            visits: OfflineRepository::new(store.clone(), server.clone(), connectivity.clone()),
            store,
            server,
            connectivity,
        }
    }

    fn rename(name: &str) -> SpotPatch {
        SpotPatch {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_online_create_is_synced_with_server_id() {
        let f = fixture(true);
        let record = f.spots.create(SpotDraft::new("Cafe", 48.1, 11.5)).await.unwrap();

        assert_eq!(record.id(), EntityId::Committed(42));
        assert!(record.is_synced());
        assert!(record.locally_modified_at.is_none());
        assert_eq!(f.store.count_pending(EntityFamily::Spot).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_create_gets_temporary_id() {
        let f = fixture(false);
        let first = f.spots.create(SpotDraft::new("A", 0.0, 0.0)).await.unwrap();
        let second = f.spots.create(SpotDraft::new("B", 0.0, 0.0)).await.unwrap();

        assert!(first.id().as_i64() < 0);
        assert_ne!(first.id(), second.id());
        assert_eq!(first.sync_status, SyncStatus::PendingCreate);
        assert!(first.locally_modified_at.is_some());
        assert_eq!(f.server.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_online_create_falls_back_to_local() {
        let f = fixture(true);
        f.server.fail_next(Operation::Create, None, None);

        let record = f.spots.create(SpotDraft::new("A", 0.0, 0.0)).await.unwrap();
        assert!(record.id().is_pending());
        assert_eq!(record.sync_status, SyncStatus::PendingCreate);
        assert_eq!(f.server.len(EntityFamily::Spot), 0);
    }

    #[tokio::test]
    async fn test_invalid_draft_is_rejected() {
        let f = fixture(false);
        let result = f.spots.create(SpotDraft::new("  ", 0.0, 0.0)).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_store_fault_is_not_masked() {
        let f = fixture(false);
        f.store.set_unavailable(true);
        let result = f.spots.create(SpotDraft::new("A", 0.0, 0.0)).await;
        assert!(matches!(result, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_visit_for_pending_spot_stays_local_while_online() {
        let f = fixture(false);
        let spot = f.spots.create(SpotDraft::new("A", 0.0, 0.0)).await.unwrap();
        f.connectivity.set_online(true);

        let visit = f
            .visits
            .create(VisitDraft::new(spot.id(), Utc::now()))
            .await
            .unwrap();
        assert!(visit.id().is_pending());
        assert_eq!(f.server.calls(Operation::Create), 0);
    }

    #[tokio::test]
    async fn test_update_pending_create_keeps_status() {
        let f = fixture(false);
        let record = f.spots.create(SpotDraft::new("A", 0.0, 0.0)).await.unwrap();
        f.connectivity.set_online(true);

        let updated = f.spots.update(record.id(), rename("B")).await.unwrap();
        assert_eq!(updated.sync_status, SyncStatus::PendingCreate);
        assert_eq!(updated.entity.name, "B");
        assert_eq!(f.server.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_offline_updates_accumulate() {
        let f = fixture(true);
        let id = f.spots.create(SpotDraft::new("A", 0.0, 0.0)).await.unwrap().id();
        f.connectivity.set_online(false);

        f.spots.update(id, rename("B")).await.unwrap();
        let patch = SpotPatch {
            rating: Some(4),
            ..Default::default()
        };
        let record = f.spots.update(id, patch).await.unwrap();

        assert_eq!(record.sync_status, SyncStatus::PendingUpdate);
        assert_eq!(record.entity.name, "B");
        assert_eq!(record.entity.rating, Some(4));
    }

    #[tokio::test]
    async fn test_online_update_after_offline_edit_sends_full_fields() {
        let f = fixture(true);
        let id = f.spots.create(SpotDraft::new("A", 0.0, 0.0)).await.unwrap().id();
        f.connectivity.set_online(false);
        f.spots.update(id, rename("B")).await.unwrap();
        f.connectivity.set_online(true);

        let patch = SpotPatch {
            rating: Some(2),
            ..Default::default()
        };
        let record = f.spots.update(id, patch).await.unwrap();
        assert!(record.is_synced());

        let server_copy = f.server.record(EntityFamily::Spot, id).unwrap();
        assert_eq!(server_copy["name"], json!("B"));
        assert_eq!(server_copy["rating"], json!(2));
    }

    #[tokio::test]
    async fn test_update_missing_record_offline() {
        let f = fixture(false);
        let result = f.spots.update(EntityId::Committed(5), rename("B")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_pending_create_makes_no_calls() {
        let f = fixture(false);
        let record = f.spots.create(SpotDraft::new("A", 0.0, 0.0)).await.unwrap();
        f.store
            .enqueue_photo(record.id(), "a.jpg".into(), true)
            .unwrap();
        f.connectivity.set_online(true);

        f.spots.delete(record.id()).await.unwrap();
        assert!(f.store.get(EntityFamily::Spot, record.id()).unwrap().is_none());
        assert_eq!(f.store.count_photos().unwrap(), 0);
        assert_eq!(f.server.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_delete_pending_spot_drops_its_unsynced_visits() {
        let f = fixture(false);
        let spot = f.spots.create(SpotDraft::new("A", 0.0, 0.0)).await.unwrap();
        let other = f.spots.create(SpotDraft::new("B", 0.0, 0.0)).await.unwrap();
        let orphan = f.visits.create(VisitDraft::new(spot.id(), Utc::now())).await.unwrap();
        let kept = f.visits.create(VisitDraft::new(other.id(), Utc::now())).await.unwrap();

        f.spots.delete(spot.id()).await.unwrap();
        assert!(f.store.get(EntityFamily::Visit, orphan.id()).unwrap().is_none());
        assert!(f.store.get(EntityFamily::Visit, kept.id()).unwrap().is_some());
        assert_eq!(f.store.count_pending(EntityFamily::Visit).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_visit_for_unknown_temporary_spot_is_rejected() {
        let f = fixture(false);
        let result = f.visits.create(VisitDraft::new(EntityId::Pending(999), Utc::now())).await;
        assert!(matches!(result, Err(Error::NotFound(_))));

        let spot = f.spots.create(SpotDraft::new("A", 0.0, 0.0)).await.unwrap();
        f.spots.delete(spot.id()).await.unwrap();
        f.connectivity.set_online(true);
        let result = f.visits.create(VisitDraft::new(spot.id(), Utc::now())).await;
        assert!(matches!(result, Err(Error::NotFound(_))));

        assert_eq!(f.store.count_pending(EntityFamily::Visit).unwrap(), 0);
        assert_eq!(f.server.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_online_update_of_synced_record_goes_pending() {
        let f = fixture(true);
        let id = f.spots.create(SpotDraft::new("A", 0.0, 0.0)).await.unwrap().id();
        f.server.fail_next(Operation::Update, Some(EntityFamily::Spot), Some(id));

        let record = f.spots.update(id, rename("B")).await.unwrap();
        assert_eq!(record.id(), id);
        assert_eq!(record.entity.name, "B");
        assert_eq!(record.sync_status, SyncStatus::PendingUpdate);
        assert!(record.locally_modified_at.is_some());
        assert_eq!(f.server.record(EntityFamily::Spot, id).unwrap()["name"], json!("A"));
    }

    #[tokio::test]
    async fn test_failed_online_delete_of_synced_record_goes_pending() {
        let f = fixture(true);
        let id = f.spots.create(SpotDraft::new("A", 0.0, 0.0)).await.unwrap().id();
        f.server.fail_next(Operation::Delete, Some(EntityFamily::Spot), Some(id));

        f.spots.delete(id).await.unwrap();
        let stored = f.store.get(EntityFamily::Spot, id).unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::PendingDelete);
        assert!(f.server.record(EntityFamily::Spot, id).is_some());

        f.connectivity.set_online(false);
        assert!(matches!(f.spots.get(id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_online_get_returns_local_copy() {
        let f = fixture(true);
        let id = f.spots.create(SpotDraft::new("A", 0.0, 0.0)).await.unwrap().id();
        f.server.edit(EntityFamily::Spot, id, json!({"name": "Renamed remotely"}));
        f.server.fail_next(Operation::Get, Some(EntityFamily::Spot), Some(id));

        let record = f.spots.get(id).await.unwrap();
        assert_eq!(record.entity.name, "A");
        assert!(record.is_synced());
        assert_eq!(f.server.calls(Operation::Get), 1);
    }

    #[tokio::test]
    async fn test_offline_delete_marks_and_hides() {
        let f = fixture(true);
        let id = f.spots.create(SpotDraft::new("A", 0.0, 0.0)).await.unwrap().id();
        f.connectivity.set_online(false);

        f.spots.delete(id).await.unwrap();
        let stored = f.store.get(EntityFamily::Spot, id).unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::PendingDelete);

        assert!(matches!(f.spots.get(id).await, Err(Error::NotFound(_))));
        let page = f.spots.list(&SpotFilter::default()).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.source, PageSource::Local);
    }

    #[tokio::test]
    async fn test_delete_unknown_everywhere() {
        let f = fixture(true);
        assert!(matches!(
            f.spots.delete(EntityId::Committed(9)).await,
            Err(Error::NotFound(_))
        ));
        f.connectivity.set_online(false);
        assert!(matches!(
            f.spots.delete(EntityId::Committed(9)).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_online_list_caches_first_page_only() {
        let f = fixture(true);
        for name in ["a", "b", "c"] {
            f.server.seed(EntityFamily::Spot, json!({"name": name, "latitude": 0.0, "longitude": 0.0}));
        }

        let second = f.spots.list(&SpotFilter::default().limit(2).page(2)).await.unwrap();
        assert_eq!(second.source, PageSource::Remote);
        assert_eq!(second.items.len(), 1);
        assert_eq!(f.store.count(EntityFamily::Spot, &|_: &StoredRecord| true).unwrap(), 0);

        let first = f.spots.list(&SpotFilter::default().limit(2)).await.unwrap();
        assert_eq!(first.total, Some(3));
        assert!(first.has_more());
        assert_eq!(f.store.count(EntityFamily::Spot, &|_: &StoredRecord| true).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_online_list_keeps_unsynced_local_copy() {
        let f = fixture(true);
        let id = f.spots.create(SpotDraft::new("A", 0.0, 0.0)).await.unwrap().id();
        f.connectivity.set_online(false);
        f.spots.update(id, rename("Local edit")).await.unwrap();
        f.connectivity.set_online(true);

        f.spots.list(&SpotFilter::default()).await.unwrap();
        let stored: Record<Spot> = f.store.get_record(id).unwrap().unwrap();
        assert_eq!(stored.entity.name, "Local edit");
        assert_eq!(stored.sync_status, SyncStatus::PendingUpdate);
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_local_list() {
        let f = fixture(false);
        f.spots.create(SpotDraft::new("Harbour", 0.0, 0.0)).await.unwrap();
        f.spots.create(SpotDraft::new("Forest", 0.0, 0.0)).await.unwrap();
        f.connectivity.set_online(true);
        f.server.fail_next(Operation::List, None, None);

        let page = f.spots.list(&SpotFilter::default().search("harb")).await.unwrap();
        assert_eq!(page.source, PageSource::Local);
        assert_eq!(page.total, Some(1));
        assert_eq!(page.items[0].entity.name, "Harbour");
    }

    #[tokio::test]
    async fn test_local_pagination_newest_first() {
        let f = fixture(false);
        for name in ["a", "b", "c"] {
            f.spots.create(SpotDraft::new(name, 0.0, 0.0)).await.unwrap();
        }

        let page = f.spots.list(&SpotFilter::default().limit(2)).await.unwrap();
        let names: Vec<&str> = page.items.iter().map(|r| r.entity.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b"]);
        assert!(page.has_more());

        let page = f.spots.list(&SpotFilter::default().limit(2).page(2)).await.unwrap();
        assert_eq!(page.items[0].entity.name, "a");
    }

    #[tokio::test]
    async fn test_visits_of_pending_spot_listed_locally() {
        let f = fixture(false);
        let spot = f.spots.create(SpotDraft::new("A", 0.0, 0.0)).await.unwrap();
        f.visits.create(VisitDraft::new(spot.id(), Utc::now())).await.unwrap();
        f.connectivity.set_online(true);

        let page = f.visits.list(&VisitFilter::for_spot(spot.id())).await.unwrap();
        assert_eq!(page.source, PageSource::Local);
        assert_eq!(page.items.len(), 1);
        assert_eq!(f.server.calls(Operation::List), 0);
    }

    #[tokio::test]
    async fn test_get_caches_server_copy() {
        let f = fixture(true);
        let id = f.server.seed(EntityFamily::Spot, json!({"name": "Dune", "latitude": 0.0, "longitude": 0.0}));

        let record = f.spots.get(id).await.unwrap();
        assert_eq!(record.entity.name, "Dune");

        f.connectivity.set_online(false);
        assert_eq!(f.spots.get(id).await.unwrap().entity.name, "Dune");
        assert!(matches!(
            f.spots.get(EntityId::Committed(1000)).await,
            Err(Error::NotFound(_))
        ));
    }
}
