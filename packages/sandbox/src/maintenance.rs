// ABOUTME: Periodic keep-alive sweep over sandboxes backing recent fragments
// ABOUTME: Pings each active sandbox and marks unreachable ones expired

use crate::manager::{ManagerError, Result, SandboxManager};
use chrono::Utc;
use kiln_storage::{Fragment, FragmentStorage};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub interval: Duration,
    /// Newest active fragments visited per sweep
    pub batch_size: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub maintained: usize,
    pub expired: usize,
    pub total: usize,
}

pub struct MaintenanceSweeper {
    manager: Arc<SandboxManager>,
    fragments: Arc<FragmentStorage>,
    config: MaintenanceConfig,
    running: Arc<RwLock<bool>>,
    shutdown: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceSweeper {
    pub fn new(
        manager: Arc<SandboxManager>,
        fragments: Arc<FragmentStorage>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            manager,
            fragments,
            config,
            running: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }

    /// Visit the newest active sandboxes once.
    ///
    /// Only the initial listing can fail; per-sandbox failures turn into expiry.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let active = self
            .fragments
            .list_active(self.config.batch_size, Utc::now())
            .await?;

        let mut report = SweepReport {
            total: active.len(),
            ..SweepReport::default()
        };

        for fragment in &active {
            match self.keep_alive(fragment).await {
                Ok(()) => report.maintained += 1,
                Err(e) => {
                    warn!("Sandbox for fragment {} unreachable: {}", fragment.id, e);
                    if let Err(e) = self.fragments.expire_sandbox(&fragment.id, Utc::now()).await {
                        error!("Failed to expire fragment {}: {}", fragment.id, e);
                    }
                    report.expired += 1;
                }
            }
        }

        info!(
            "Sandbox maintenance: {} maintained, {} expired, {} total",
            report.maintained, report.expired, report.total
        );

        Ok(report)
    }

    async fn keep_alive(&self, fragment: &Fragment) -> Result<()> {
        let Some(sandbox_id) = fragment.sandbox_id.as_deref() else {
            return Ok(());
        };

        let handle = self.manager.connect(sandbox_id).await?;
        handle
            .exec("echo \"Maintenance keep-alive at $(date)\"")
            .await
            .map_err(|source| ManagerError::NotReachable {
                sandbox_id: sandbox_id.to_string(),
                source,
            })?;

        debug!("Kept sandbox {} alive", sandbox_id);
        Ok(())
    }

    /// Run `sweep` on the configured interval in a background task
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        let mut running = self.running.write().await;
        if *running {
            return;
        }
        *running = true;
        drop(running);

        let sweeper = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            info!(
                "Sandbox maintenance started (every {}s)",
                sweeper.config.interval.as_secs()
            );

            let mut ticker = time::interval(sweeper.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = sweeper.shutdown.notified() => {}
                }

                if !*sweeper.running.read().await {
                    info!("Sandbox maintenance stopped");
                    break;
                }

                if let Err(e) = sweeper.sweep().await {
                    error!("Sandbox maintenance sweep failed: {}", e);
                }
            }
        }));
    }

    /// Stop the background task and wait for it to exit
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        *self.running.write().await = false;
        self.shutdown.notify_one();

        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                error!("Sandbox maintenance task failed: {}", e);
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
