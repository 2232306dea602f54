//! Core sync orchestrator that reconciles the local cache with the server.
//!
//! A run executes five ordered phases:
//! 1. Download the first page of every family and cache it, leaving records
//!    with unsynced local changes alone.
//! 2. Upload pending creates, spots before visits, replacing temporary ids
//!    with server ids everywhere they are referenced.
//! 3. Upload pending updates with the full local field set.
//! 4. Upload pending deletes.
//! 5. Upload queued photos.
//!
//! Remote failures are recorded per item and never abort the run. A local
//! store failure aborts it and moves the orchestrator into the error state.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use spotsync_common::{Entity, EntityFamily, Error, Record, Result, Spot, SyncStatus, Visit};
use spotsync_remote::{EntityGateway, ListQuery, RemoteGateway};
use spotsync_storage::{LocalStore, LocalStoreExt, StoredRecord};

use crate::connectivity::ConnectivityMonitor;
use crate::photos::upload_file;
use crate::scheduler::SyncMode;
use crate::state::{IdRemap, PendingCounts, SyncPhase, SyncProgress, SyncReport, SyncState};

/// Default number of records downloaded per family.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Largest accepted download page.
pub const MAX_PAGE_SIZE: u32 = 200;

const UNRESOLVED_REFERENCE: &str = "unresolved reference";

/// Configuration for the sync orchestrator and service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Records downloaded per family and run.
    pub page_size: u32,
    /// Run a sync when connectivity returns and changes are pending.
    pub sync_on_reconnect: bool,
    pub mode: SyncMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            sync_on_reconnect: true,
            mode: SyncMode::Manual,
        }
    }
}

impl SyncConfig {
    /// Page size clamped to the accepted range.
    pub fn page_size(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

/// Why a requested run did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    Offline,
}

/// Result of [`SyncOrchestrator::run_sync`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// All phases ran; individual items may still have failed.
    Completed(SyncReport),
    Skipped(SkipReason),
    /// A local fault aborted the run.
    Failed(String),
}

/// Per-family steps, so phases can iterate families in protocol order.
#[async_trait]
trait FamilySync: Send + Sync {
    fn family(&self) -> EntityFamily;

    async fn download(&self, page_size: u32, report: &mut SyncReport) -> Result<()>;

    async fn upload_creates(&self, report: &mut SyncReport) -> Result<()>;

    async fn upload_updates(&self, report: &mut SyncReport) -> Result<()>;

    async fn upload_deletes(&self, report: &mut SyncReport) -> Result<()>;

    /// Point pending records at a committed id. Returns the number changed.
    fn remap_references(&self, remap: &IdRemap) -> Result<usize>;
}

struct EntitySync<E: Entity> {
    store: Arc<dyn LocalStore>,
    remote: EntityGateway<E>,
}

impl<E: Entity> EntitySync<E> {
    fn new(store: Arc<dyn LocalStore>, gateway: Arc<dyn RemoteGateway>) -> Self {
        Self {
            store,
            remote: EntityGateway::new(gateway),
        }
    }
}

#[async_trait]
impl<E: Entity> FamilySync for EntitySync<E> {
    fn family(&self) -> EntityFamily {
        E::FAMILY
    }

    async fn download(&self, page_size: u32, report: &mut SyncReport) -> Result<()> {
        let page = match self.remote.list_query(&ListQuery::first_page(page_size)).await {
            Ok(page) => page,
            Err(e) => {
                report.fail(SyncPhase::Download, E::FAMILY, None, e.to_string());
                return Ok(());
            }
        };

        for entity in page.items {
            let row = StoredRecord::from_record(&Record::synced(entity))?;
            match self.store.get(E::FAMILY, row.id)? {
                Some(existing) if existing.sync_status.is_pending() => {
                    debug!("Keeping unsynced {} {}", E::FAMILY, row.id);
                }
                Some(existing) if existing == row => {}
                _ => {
                    self.store.upsert(&row)?;
                    report.downloaded += 1;
                }
            }
        }
        Ok(())
    }

    async fn upload_creates(&self, report: &mut SyncReport) -> Result<()> {
        // Oldest first, so server ids follow local creation order.
        let creates = self.store.records_with_status::<E>(SyncStatus::PendingCreate)?;
        for record in creates.into_iter().rev() {
            let temp_id = record.id();
            if record.entity.has_pending_reference() {
                report.fail(SyncPhase::Creates, E::FAMILY, Some(temp_id), UNRESOLVED_REFERENCE);
                continue;
            }

            let created = match self.remote.create(&record.entity.to_draft()).await {
                Ok(created) => created,
                Err(e) => {
                    report.fail(SyncPhase::Creates, E::FAMILY, Some(temp_id), e.to_string());
                    continue;
                }
            };
            let server_id = created.id();

            // The local copy may have been edited or deleted meanwhile.
            let replacement = match self.store.get_record::<E>(temp_id)? {
                Some(current) if current.locally_modified_at != record.locally_modified_at => Record::pending(
                    E::from_draft(server_id, current.entity.to_draft()),
                    SyncStatus::PendingUpdate,
                    current.locally_modified_at.unwrap_or_else(Utc::now),
                ),
                Some(_) => Record::synced(created),
                None => Record::pending(created, SyncStatus::PendingDelete, Utc::now()),
            };
            self.store.put_record(&replacement)?;
            self.store.delete(E::FAMILY, temp_id)?;

            info!("Uploaded {} {} as {}", E::FAMILY, temp_id, server_id);
            report.created += 1;
            report.remaps.push(IdRemap {
                family: E::FAMILY,
                from: temp_id,
                to: server_id,
            });
        }
        Ok(())
    }

    async fn upload_updates(&self, report: &mut SyncReport) -> Result<()> {
        for record in self.store.records_with_status::<E>(SyncStatus::PendingUpdate)? {
            let id = record.id();
            if record.entity.has_pending_reference() {
                report.fail(SyncPhase::Updates, E::FAMILY, Some(id), UNRESOLVED_REFERENCE);
                continue;
            }

            match self.remote.replace(id, &record.entity.to_draft()).await {
                Ok(updated) => {
                    let unchanged = self.store.get_record::<E>(id)?.is_some_and(|current| {
                        current.sync_status == SyncStatus::PendingUpdate
                            && current.locally_modified_at == record.locally_modified_at
                    });
                    if unchanged {
                        self.store.put_record(&Record::synced(updated))?;
                    } else {
                        debug!("{} {} changed during upload, keeping local copy", E::FAMILY, id);
                    }
                    report.updated += 1;
                }
                Err(e) => report.fail(SyncPhase::Updates, E::FAMILY, Some(id), e.to_string()),
            }
        }
        Ok(())
    }

    async fn upload_deletes(&self, report: &mut SyncReport) -> Result<()> {
        for id in self.store.list_pending_ids(E::FAMILY)? {
            let Some(record) = self.store.get(E::FAMILY, id)? else {
                continue;
            };
            if record.sync_status != SyncStatus::PendingDelete {
                continue;
            }

            match self.remote.delete(id).await {
                Ok(()) | Err(Error::NotFound(_)) => {
                    self.store.delete(E::FAMILY, id)?;
                    report.deleted += 1;
                }
                Err(e) => report.fail(SyncPhase::Deletes, E::FAMILY, Some(id), e.to_string()),
            }
        }
        Ok(())
    }

    fn remap_references(&self, remap: &IdRemap) -> Result<usize> {
        let mut changed = 0;
        for id in self.store.list_pending_ids(E::FAMILY)? {
            let Some(mut record) = self.store.get_record::<E>(id)? else {
                continue;
            };
            if record.entity.remap_reference(remap.family, remap.from, remap.to) {
                self.store.put_record(&record)?;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

/// Reconciles local changes with the remote service.
///
/// One run at a time: a request made while a run is in progress returns
/// [`SkipReason::AlreadyRunning`] without touching the progress signal.
pub struct SyncOrchestrator {
    store: Arc<dyn LocalStore>,
    gateway: Arc<dyn RemoteGateway>,
    connectivity: ConnectivityMonitor,
    config: SyncConfig,
    families: Vec<Box<dyn FamilySync>>,
    progress: watch::Sender<SyncProgress>,
}

impl SyncOrchestrator {
    /// Create an orchestrator, loading pending counts and the last sync time
    /// from the store.
    pub fn new(
        store: Arc<dyn LocalStore>,
        gateway: Arc<dyn RemoteGateway>,
        connectivity: ConnectivityMonitor,
        config: SyncConfig,
    ) -> Result<Self> {
        let families: Vec<Box<dyn FamilySync>> = vec![
            Box::new(EntitySync::<Spot>::new(store.clone(), gateway.clone())),
            Box::new(EntitySync::<Visit>::new(store.clone(), gateway.clone())),
        ];
        let initial = SyncProgress {
            state: SyncState::Idle,
            pending: pending_counts(store.as_ref())?,
            last_sync_at: store.last_sync_at()?,
            last_report: None,
        };
        let (progress, _) = watch::channel(initial);

        Ok(Self {
            store,
            gateway,
            connectivity,
            config,
            families,
            progress,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// Subscribe to progress updates.
    pub fn progress(&self) -> watch::Receiver<SyncProgress> {
        self.progress.subscribe()
    }

    /// Current progress.
    pub fn snapshot(&self) -> SyncProgress {
        self.progress.borrow().clone()
    }

    /// Run all phases once.
    pub async fn run_sync(&self) -> SyncOutcome {
        if self.progress.borrow().state.is_syncing() {
            debug!("Sync already running");
            return SyncOutcome::Skipped(SkipReason::AlreadyRunning);
        }
        if !self.connectivity.is_online() {
            debug!("Offline, skipping sync");
            return SyncOutcome::Skipped(SkipReason::Offline);
        }

        let claimed = self.progress.send_if_modified(|progress| {
            if progress.state.is_syncing() {
                false
            } else {
                progress.state = SyncState::Syncing;
                true
            }
        });
        if !claimed {
            return SyncOutcome::Skipped(SkipReason::AlreadyRunning);
        }

        info!("Starting sync");
        let mut report = SyncReport::new(Utc::now());
        let result = self.run_phases(&mut report).await;
        let finished = Utc::now();
        report.finished_at = Some(finished);

        let result = result
            .and_then(|()| self.store.set_last_sync_at(finished))
            .and_then(|()| pending_counts(self.store.as_ref()));

        match result {
            Ok(pending) => {
                info!(
                    "Sync completed: {} downloaded, {} created, {} updated, {} deleted, {} photos, {} failures",
                    report.downloaded,
                    report.created,
                    report.updated,
                    report.deleted,
                    report.photos_uploaded,
                    report.failures.len()
                );
                let published = report.clone();
                self.progress.send_modify(|progress| {
                    progress.state = SyncState::Success(finished);
                    progress.pending = pending;
                    progress.last_sync_at = Some(finished);
                    progress.last_report = Some(published);
                });
                SyncOutcome::Completed(report)
            }
            Err(e) => {
                error!("Sync failed: {}", e);
                let message = e.to_string();
                let state = SyncState::Error(message.clone());
                self.progress.send_modify(|progress| {
                    progress.state = state;
                    progress.last_report = Some(report);
                });
                SyncOutcome::Failed(message)
            }
        }
    }

    /// Run again from the first phase, typically after a failure.
    ///
    /// Every phase is idempotent, so work finished by an earlier run is not
    /// repeated.
    pub async fn retry(&self) -> SyncOutcome {
        if let SyncState::Error(message) = &self.progress.borrow().state {
            info!("Retrying sync after error: {}", message);
        }
        self.run_sync().await
    }

    /// Recompute pending counts and publish them when they changed.
    pub fn refresh_pending(&self) -> Result<PendingCounts> {
        let pending = pending_counts(self.store.as_ref())?;
        self.progress.send_if_modified(|progress| {
            if progress.pending == pending {
                false
            } else {
                progress.pending = pending.clone();
                true
            }
        });
        Ok(pending)
    }

    async fn run_phases(&self, report: &mut SyncReport) -> Result<()> {
        let page_size = self.config.page_size();
        for family in &self.families {
            family.download(page_size, report).await?;
        }
        debug!("Download phase done: {} records refreshed", report.downloaded);

        for family in &self.families {
            let first_new = report.remaps.len();
            family.upload_creates(report).await?;
            let new_remaps = report.remaps[first_new..].to_vec();
            for remap in &new_remaps {
                self.apply_remap(remap)?;
            }
        }
        debug!("Creates phase done: {} uploaded", report.created);

        for family in &self.families {
            family.upload_updates(report).await?;
        }
        debug!("Updates phase done: {} uploaded", report.updated);

        for family in &self.families {
            family.upload_deletes(report).await?;
        }
        debug!("Deletes phase done: {} uploaded", report.deleted);

        self.upload_photos(report).await?;
        debug!("Photos phase done: {} uploaded", report.photos_uploaded);
        Ok(())
    }

    fn apply_remap(&self, remap: &IdRemap) -> Result<()> {
        for family in &self.families {
            let changed = family.remap_references(remap)?;
            if changed > 0 {
                debug!(
                    "Remapped {} {} reference(s) from {} to {}",
                    changed,
                    family.family(),
                    remap.from,
                    remap.to
                );
            }
        }
        if remap.family == EntityFamily::Spot {
            self.store.reassign_photo_owner(remap.from, remap.to)?;
        }
        Ok(())
    }

    async fn upload_photos(&self, report: &mut SyncReport) -> Result<()> {
        for photo in self.store.list_photos()? {
            if photo.owner_id.is_pending() {
                debug!("Photo {} waits for spot {}", photo.id, photo.owner_id);
                continue;
            }
            match tokio::fs::try_exists(&photo.file_path).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Dropping queued photo {}: file is gone", photo.file_path.display());
                    self.store.remove_photo(photo.id)?;
                    report.photos_dropped += 1;
                    continue;
                }
                // Unreadable is not missing; keep the entry for the next run.
                Err(e) => {
                    report.fail(
                        SyncPhase::Photos,
                        EntityFamily::Spot,
                        Some(photo.owner_id),
                        format!("{}: {}", photo.file_path.display(), e),
                    );
                    continue;
                }
            }

            match upload_file(self.gateway.as_ref(), photo.owner_id, &photo.file_path, photo.is_main).await {
                Ok(()) => {
                    self.store.remove_photo(photo.id)?;
                    report.photos_uploaded += 1;
                }
                Err(e) => report.fail(
                    SyncPhase::Photos,
                    EntityFamily::Spot,
                    Some(photo.owner_id),
                    format!("{}: {}", photo.file_path.display(), e),
                ),
            }
        }
        Ok(())
    }
}

fn pending_counts(store: &dyn LocalStore) -> Result<PendingCounts> {
    let mut per_family = BTreeMap::new();
    for family in EntityFamily::ALL {
        per_family.insert(family, store.count_pending(family)?);
    }
    Ok(PendingCounts {
        per_family,
        photos: store.count_photos()?,
    })
}
