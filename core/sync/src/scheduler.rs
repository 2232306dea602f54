//! Background sync service - reconnect, periodic and on-request runs.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use spotsync_common::{Error, Result};

use crate::orchestrator::{SyncOrchestrator, SyncOutcome};

/// When the service runs syncs on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Only on reconnect and on request.
    Manual,
    /// Additionally at a fixed interval.
    Periodic { interval_secs: u64 },
}

impl SyncMode {
    fn period(&self) -> Option<Duration> {
        match self {
            SyncMode::Manual => None,
            SyncMode::Periodic { interval_secs } => Some(Duration::from_secs((*interval_secs).max(1))),
        }
    }
}

enum ServiceRequest {
    Sync(oneshot::Sender<SyncOutcome>),
    Shutdown,
}

/// Runs the orchestrator in a background task for the life of the process.
///
/// The task reacts to:
/// - connectivity coming back while changes are pending,
/// - store writes, by republishing pending counts,
/// - the periodic timer in [`SyncMode::Periodic`],
/// - requests sent through [`SyncServiceHandle`].
pub struct SyncService {
    orchestrator: Arc<SyncOrchestrator>,
    requests: mpsc::Receiver<ServiceRequest>,
    online: watch::Receiver<bool>,
    changes: watch::Receiver<u64>,
}

impl SyncService {
    /// Start the service on the current tokio runtime.
    pub fn spawn(orchestrator: Arc<SyncOrchestrator>) -> SyncServiceHandle {
        let (request_tx, requests) = mpsc::channel(16);
        // Subscribe before spawning so no transition is missed.
        let service = Self {
            online: orchestrator.connectivity().subscribe(),
            changes: orchestrator.store().changes(),
            orchestrator,
            requests,
        };
        let task = tokio::spawn(service.run());
        SyncServiceHandle { request_tx, task }
    }

    async fn run(self) {
        let Self {
            orchestrator,
            mut requests,
            mut online,
            mut changes,
        } = self;
        let config = orchestrator.config().clone();
        let mut periodic = config.mode.period().map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        info!("Sync service started ({:?})", config.mode);

        loop {
            tokio::select! {
                request = requests.recv() => {
                    match request {
                        Some(ServiceRequest::Sync(reply)) => {
                            debug!("Processing sync request");
                            let outcome = orchestrator.run_sync().await;
                            let _ = reply.send(outcome);
                        }
                        Some(ServiceRequest::Shutdown) | None => {
                            info!("Sync service shutting down");
                            break;
                        }
                    }
                }

                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let is_online = *online.borrow_and_update();
                    if is_online && config.sync_on_reconnect {
                        sync_if_pending(&orchestrator).await;
                    }
                }

                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    changes.borrow_and_update();
                    if let Err(e) = orchestrator.refresh_pending() {
                        error!("Failed to refresh pending counts: {}", e);
                    }
                }

                _ = Self::wait_for_periodic(&mut periodic) => {
                    debug!("Triggering periodic sync");
                    log_outcome("Periodic", &orchestrator.run_sync().await);
                }
            }
        }
    }

    async fn wait_for_periodic(periodic: &mut Option<Interval>) {
        match periodic {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

async fn sync_if_pending(orchestrator: &SyncOrchestrator) {
    match orchestrator.refresh_pending() {
        Ok(pending) if pending.is_empty() => debug!("Back online, nothing pending"),
        Ok(pending) => {
            info!("Back online with {} pending change(s)", pending.total());
            log_outcome("Reconnect", &orchestrator.run_sync().await);
        }
        Err(e) => error!("Failed to count pending changes: {}", e),
    }
}

fn log_outcome(trigger: &str, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Completed(report) => info!(
            "{} sync completed: {} uploaded, {} failed",
            trigger,
            report.uploaded(),
            report.failures.len()
        ),
        SyncOutcome::Skipped(reason) => debug!("{} sync skipped: {:?}", trigger, reason),
        SyncOutcome::Failed(message) => error!("{} sync failed: {}", trigger, message),
    }
}

/// Handle for talking to a running [`SyncService`].
pub struct SyncServiceHandle {
    request_tx: mpsc::Sender<ServiceRequest>,
    task: JoinHandle<()>,
}

impl SyncServiceHandle {
    /// Ask for a sync run and wait for its outcome.
    ///
    /// # Errors
    /// - `Service` if the service has stopped
    pub async fn request_sync(&self) -> Result<SyncOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(ServiceRequest::Sync(reply_tx))
            .await
            .map_err(|_| Error::Service("Sync service not running".to_string()))?;
        reply_rx
            .await
            .map_err(|_| Error::Service("Failed to receive sync outcome".to_string()))
    }

    /// Stop the service and wait for the task to finish.
    ///
    /// A run in progress completes first.
    pub async fn shutdown(self) {
        let _ = self.request_tx.send(ServiceRequest::Shutdown).await;
        if let Err(e) = self.task.await {
            error!("Sync service task ended abnormally: {}", e);
        }
    }
}
