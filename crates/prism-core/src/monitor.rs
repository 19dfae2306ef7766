//! Admission-timeout sweeper.
//!
//! A periodic loop over the registry that expires tasks still waiting
//! (PENDING/RECEIVED) past the admission deadline. The actual expiry is the
//! manager's `expire_overdue`; this module only owns the cadence and the
//! shutdown plumbing.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::PrismConfig;
use crate::manager::TaskManager;

pub struct TimeoutMonitor {
    manager: Arc<TaskManager>,
    admission_deadline: Duration,
    sweep_interval: Duration,
}

impl TimeoutMonitor {
    pub fn new(manager: Arc<TaskManager>, config: &PrismConfig) -> Self {
        Self {
            manager,
            admission_deadline: config.admission_deadline(),
            sweep_interval: config.sweep_interval(),
        }
    }

    /// One pass. Exposed so embedders (and tests) can sweep on demand.
    pub async fn sweep_once(&self) -> usize {
        self.manager.expire_overdue(self.admission_deadline).await
    }

    /// Run the sweep on its interval until shutdown.
    pub fn spawn(self) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.sweep_interval);
            // 初回 tick は即時なので読み捨てる
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let expired = self.sweep_once().await;
                        if expired > 0 {
                            let counts = self.manager.registry().counts();
                            info!("sweep expired {expired} overdue task(s); {counts:?}");
                        }
                    }
                }
            }
            debug!("timeout monitor stopped");
        });

        MonitorHandle { shutdown_tx, join }
    }
}

pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}
