//! Sync progress, pending counts and run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use spotsync_common::{EntityFamily, EntityId};

/// Lifecycle of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncState {
    /// No run has happened yet.
    #[default]
    Idle,
    /// A run is in progress.
    Syncing,
    /// The last run completed at the given time.
    Success(DateTime<Utc>),
    /// The last run aborted on a local fault.
    Error(String),
}

impl SyncState {
    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncState::Syncing)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Syncing => write!(f, "syncing"),
            SyncState::Success(at) => write!(f, "synced at {}", at.to_rfc3339()),
            SyncState::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// The ordered steps of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Download,
    Creates,
    Updates,
    Deletes,
    Photos,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Download => "download",
            SyncPhase::Creates => "creates",
            SyncPhase::Updates => "updates",
            SyncPhase::Deletes => "deletes",
            SyncPhase::Photos => "photos",
        };
        f.write_str(name)
    }
}

/// Number of unsynced local changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCounts {
    /// Non-Synced records per family.
    pub per_family: BTreeMap<EntityFamily, usize>,
    /// Queued photos.
    pub photos: usize,
}

impl PendingCounts {
    pub fn for_family(&self, family: EntityFamily) -> usize {
        self.per_family.get(&family).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.per_family.values().sum::<usize>() + self.photos
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// One item the run could not reconcile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub phase: SyncPhase,
    pub family: EntityFamily,
    /// `None` when a whole family call failed, e.g. the download.
    pub id: Option<EntityId>,
    pub reason: String,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "[{}] {} {}: {}", self.phase, self.family, id, self.reason),
            None => write!(f, "[{}] {}: {}", self.phase, self.family, self.reason),
        }
    }
}

/// A temporary id replaced by its server id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRemap {
    pub family: EntityFamily,
    pub from: EntityId,
    pub to: EntityId,
}

/// What a sync run did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub downloaded: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub photos_uploaded: usize,
    /// Queue entries dropped because their file disappeared.
    pub photos_dropped: usize,
    pub remaps: Vec<IdRemap>,
    pub failures: Vec<ItemFailure>,
}

impl SyncReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: None,
            downloaded: 0,
            created: 0,
            updated: 0,
            deleted: 0,
            photos_uploaded: 0,
            photos_dropped: 0,
            remaps: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Whether every item was reconciled.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of uploads that reached the server.
    pub fn uploaded(&self) -> usize {
        self.created + self.updated + self.deleted + self.photos_uploaded
    }

    pub(crate) fn fail(
        &mut self,
        phase: SyncPhase,
        family: EntityFamily,
        id: Option<EntityId>,
        reason: impl Into<String>,
    ) {
        let failure = ItemFailure {
            phase,
            family,
            id,
            reason: reason.into(),
        };
        warn!("Sync item failed {}", failure);
        self.failures.push(failure);
    }
}

/// Snapshot published to observers after every state change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub state: SyncState,
    pub pending: PendingCounts,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_report: Option<SyncReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_counts_total() {
        let mut counts = PendingCounts::default();
        assert!(counts.is_empty());

        counts.per_family.insert(EntityFamily::Spot, 2);
        counts.per_family.insert(EntityFamily::Visit, 1);
        counts.photos = 3;
        assert_eq!(counts.total(), 6);
        assert_eq!(counts.for_family(EntityFamily::Visit), 1);
    }

    #[test]
    fn test_failure_display() {
        let mut report = SyncReport::new(Utc::now());
        report.fail(SyncPhase::Deletes, EntityFamily::Spot, Some(EntityId::Committed(7)), "timeout");
        report.fail(SyncPhase::Download, EntityFamily::Visit, None, "offline");

        assert!(!report.is_clean());
        assert_eq!(report.failures[0].to_string(), "[deletes] spot 7: timeout");
        assert_eq!(report.failures[1].to_string(), "[download] visit: offline");
    }
}
