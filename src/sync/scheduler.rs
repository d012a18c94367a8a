//! Periodic and on-demand sync of the current session.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::engine::{SyncEngine, SyncReport};
use super::SyncResult;
use crate::session::SessionStore;

/// Drives [`SyncEngine`] cycles for the session on a fixed interval
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    session: Arc<SessionStore>,
    interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl SyncScheduler {
    pub fn new(engine: Arc<SyncEngine>, session: Arc<SessionStore>, interval: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            engine,
            session,
            interval,
            shutdown_tx,
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Sync the session now. `Ok(None)` means another cycle was running.
    pub async fn sync_now(&self) -> SyncResult<Option<SyncReport>> {
        let request = self.session.sync_request();
        let Some(report) = self.engine.try_sync(request).await? else {
            return Ok(None);
        };

        self.session.apply_report(&report)?;

        if report.needs_remote_repair() {
            error!(
                error = report.error_message.as_deref().unwrap_or_default(),
                "Remote storage is not provisioned correctly; sync cannot reach the shared document"
            );
        } else if !report.success {
            debug!(
                error = report.error_message.as_deref().unwrap_or_default(),
                "Sync cycle ran offline"
            );
        }
        Ok(Some(report))
    }

    /// Initiate graceful shutdown of the background task
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Start the background sync loop
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let scheduler = self;
        let mut shutdown = scheduler.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match scheduler.sync_now().await {
                            Ok(Some(report)) if report.has_changes => {
                                debug!(success = report.success, "Background sync pushed changes");
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Background sync failed: {}", e),
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Sync task shutting down");
                        // Final attempt so pending edits reach the remote
                        if let Err(e) = scheduler.sync_now().await {
                            warn!("Final sync failed: {}", e);
                        }
                        break;
                    }
                }
            }
        })
    }
}
