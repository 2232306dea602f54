//! SpotSync Sync Engine
//!
//! This module keeps the local cache and the remote service in step:
//! - Connectivity tracking with an optional reachability probe
//! - Offline-first repositories that degrade to the local cache
//! - Photo attachment with an upload queue
//! - Five-phase sync orchestration with a progress signal
//! - Background service for reconnect, periodic and on-request runs

pub mod connectivity;
pub mod orchestrator;
pub mod photos;
pub mod repository;
pub mod scheduler;
pub mod state;

// Re-export main types
pub use connectivity::{ConnectivityMonitor, ConnectivityProbe};
pub use orchestrator::{SkipReason, SyncConfig, SyncOrchestrator, SyncOutcome, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use photos::{PhotoAttachment, PhotoRepository};
pub use repository::OfflineRepository;
pub use scheduler::{SyncMode, SyncService, SyncServiceHandle};
pub use state::{IdRemap, ItemFailure, PendingCounts, SyncPhase, SyncProgress, SyncReport, SyncState};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_json() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"page_size": 20, "mode": {"periodic": {"interval_secs": 600}}}"#).unwrap();
        assert_eq!(config.page_size(), 20);
        assert!(config.sync_on_reconnect);
        assert_eq!(config.mode, SyncMode::Periodic { interval_secs: 600 });
    }
}
