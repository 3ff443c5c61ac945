//! Background driver for [`LocalCache::recycle`].

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::LocalCache;

/// Owns a cache handle and sweeps it on a fixed interval.
///
/// Each pass runs on the blocking pool and is awaited before the next tick
/// is taken, so passes never overlap.
pub struct CacheRecycler {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CacheRecycler {
    pub fn start(cache: Arc<LocalCache>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs_f64(), "Cache recycler started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let cache = Arc::clone(&cache);
                        if let Err(e) = tokio::task::spawn_blocking(move || cache.recycle()).await {
                            error!(error = %e, "Recycle pass panicked");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Cache recycler stopped");
        });
        Self { shutdown_tx, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the loop and wait for an in-flight pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Cache recycler task failed");
        }
    }
}
