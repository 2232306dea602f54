//! Connectivity tracking.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use spotsync_remote::RemoteGateway;

/// Observable online/offline flag.
///
/// Cloning yields another handle to the same flag. Subscribers are only
/// woken on actual transitions.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Receiver woken whenever the flag flips.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Record the current reachability. Returns whether it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        }
        changed
    }
}

/// Polls the remote service and feeds the result into a monitor.
///
/// For hosts without a platform reachability signal.
pub struct ConnectivityProbe {
    gateway: Arc<dyn RemoteGateway>,
    monitor: ConnectivityMonitor,
    period: Duration,
}

impl ConnectivityProbe {
    pub fn new(gateway: Arc<dyn RemoteGateway>, monitor: ConnectivityMonitor, period: Duration) -> Self {
        Self {
            gateway,
            monitor,
            period,
        }
    }

    /// Ping once and update the monitor. Returns the observed state.
    pub async fn check(&self) -> bool {
        let online = match self.gateway.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!("Ping via {} failed: {}", self.gateway.name(), e);
                false
            }
        };
        self.monitor.set_online(online);
        online
    }

    /// Probe on a fixed period until the returned task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.check().await;
            }
        })
    }
}
