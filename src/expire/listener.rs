//! Expired-key notification consumer.
//!
//! One per process. Events are handled one at a time in arrival order; a
//! dropped or failed subscription is retried after a fixed delay, forever.

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::ExpireOps;
use crate::metrics;
use crate::resilience::retry::RetryConfig;
use crate::storage::traits::{ExpirationFeed, StorageError};

enum SessionEnd {
    Shutdown,
    StreamClosed,
}

pub struct ExpirationListener {
    ops: Arc<ExpireOps>,
    feed: Arc<dyn ExpirationFeed>,
    retry: RetryConfig,
}

impl ExpirationListener {
    pub fn new(ops: Arc<ExpireOps>, feed: Arc<dyn ExpirationFeed>, retry: RetryConfig) -> Self {
        Self { ops, feed, retry }
    }

    pub fn spawn(self) -> ListenerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(shutdown_rx));
        ListenerHandle {
            shutdown_tx,
            handle,
        }
    }

    /// Consume notifications until `shutdown` flips to true (or its sender
    /// is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Expiration listener started");
        let mut delay = self.retry.initial_delay;
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.session(&mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::StreamClosed) => {
                    warn!("Expiration feed closed, resubscribing");
                    delay = self.retry.initial_delay;
                }
                Err(e) => {
                    error!(error = %e, retry_in_ms = delay.as_millis() as u64, "Expiration feed unavailable");
                    metrics::record_listener_reconnect(false);
                    metrics::set_backend_healthy("expiration_feed", false);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            delay = self.retry.next_delay(delay);
        }
        info!("Expiration listener stopped");
    }

    async fn session(&self, shutdown: &mut watch::Receiver<bool>) -> Result<SessionEnd, StorageError> {
        if let Err(e) = self.feed.ensure_notifications().await {
            warn!(error = %e, "Could not verify expired-key notifications");
        }
        let mut events = self.feed.subscribe().await?;
        metrics::record_listener_reconnect(true);
        metrics::set_backend_healthy("expiration_feed", true);

        loop {
            tokio::select! {
                next = events.next() => match next {
                    Some(raw) => {
                        let outcome = self.ops.on_expire_event(&raw).await;
                        debug!(key = %raw, outcome = outcome.as_str(), "Handled notification");
                    }
                    None => return Ok(SessionEnd::StreamClosed),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(SessionEnd::Shutdown);
                    }
                }
            }
        }
    }
}

pub struct ListenerHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop listening; an event already being handled finishes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Expiration listener task failed");
        }
    }
}
