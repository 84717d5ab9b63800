//! Background lease renewal.

use std::time::Duration;

use sync_coordinator_core::error::LockError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::store::{LeaseId, LeaseRenewer};

/// Keeps one lease alive until shut down.
///
/// Owned by exactly one lock attempt. The renewal task is stopped either by
/// [`KeepAlive::shutdown`] or, failing that, on drop.
pub(crate) struct KeepAlive {
    lease: LeaseId,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    lost_receiver: watch::Receiver<bool>,
}

impl KeepAlive {
    /// Starts renewing `lease` every `interval`.
    ///
    /// A renewal error is tolerated until `ttl` has passed since the last
    /// confirmed renewal; after that, or once the store reports the lease
    /// gone, the lost token flips to `true` and renewal stops.
    pub(crate) fn spawn<R: LeaseRenewer>(
        lease: LeaseId,
        mut renewer: R,
        interval: Duration,
        ttl: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (lost_sender, lost_receiver) = watch::channel(false);

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The lease was granted just now; skip the immediate first tick.
            ticker.tick().await;
            let mut last_renewed = Instant::now();

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                // A renewal that stalls past the ttl counts as failed; the
                // store may already have expired the lease.
                let sent = Instant::now();
                let budget = ttl.saturating_sub(last_renewed.elapsed());
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    result = tokio::time::timeout(budget, renewer.renew()) => {
                        result.unwrap_or_else(|elapsed| Err(LockError::backend(elapsed)))
                    }
                };

                match result {
                    Ok(Some(remaining)) => {
                        last_renewed = sent;
                        trace!(lease = %lease, ttl_ms = remaining.as_millis() as u64, "lease renewed");
                    }
                    Ok(None) => {
                        warn!(lease = %lease, "lease expired before it could be renewed");
                        let _ = lost_sender.send(true);
                        break;
                    }
                    Err(e) if last_renewed.elapsed() >= ttl => {
                        warn!(lease = %lease, error = %e, "lease keep-alive failed past its ttl, lock lost");
                        let _ = lost_sender.send(true);
                        break;
                    }
                    Err(e) => {
                        warn!(lease = %lease, error = %e, "lease keep-alive failed, retrying");
                    }
                }
            }
        });

        Self {
            lease,
            cancel,
            task: Some(task),
            lost_receiver,
        }
    }

    pub(crate) fn lease(&self) -> LeaseId {
        self.lease
    }

    pub(crate) fn lost_token(&self) -> watch::Receiver<bool> {
        self.lost_receiver.clone()
    }

    pub(crate) fn is_lost(&self) -> bool {
        *self.lost_receiver.borrow()
    }

    /// Stops renewal and waits for the task to finish.
    pub(crate) async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.cancel.cancel();
            task.abort();
        }
    }
}
