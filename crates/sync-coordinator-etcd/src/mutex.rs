//! Lease-guarded mutex protocol.
//!
//! Acquisition grants a lease, keeps it alive, and tries to create the lock
//! record attached to it. When the record already exists the attempt watches
//! for its deletion and retries. Waiters are served roughly in arrival order;
//! the protocol does not guarantee strict FIFO across network delay.
//!
//! Every lease belongs to exactly one attempt. Abandoning an attempt revokes
//! its lease, which also removes a record whose creation was sent but never
//! confirmed.

use std::future::pending;

use sync_coordinator_core::backoff::Backoff;
use sync_coordinator_core::context::Context;
use sync_coordinator_core::error::{LockError, LockResult};
use sync_coordinator_core::key::Key;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::coordinator::Shared;
use crate::keepalive::KeepAlive;
use crate::record::LockRecord;
use crate::store::{CreateOutcome, LeaseId, LeaseStore};

/// A held lock: the record exists and its lease is being kept alive.
pub(crate) struct HeldLock {
    pub(crate) keep_alive: KeepAlive,
    /// Store revision at which the record was created.
    pub(crate) revision: i64,
}

/// Grants a lease and starts its keep-alive.
///
/// Bounded by the release timeout and never raced against the caller's
/// context: a granted lease is either handed back or revoked here.
async fn open_lease<S: LeaseStore>(shared: &Shared<S>) -> LockResult<KeepAlive> {
    let settings = &shared.settings;
    let lease = tokio::time::timeout(settings.release_timeout, shared.store.grant(settings.lease_ttl))
        .await
        .map_err(LockError::backend)??;
    let opened =
        tokio::time::timeout(settings.release_timeout, shared.store.open_keep_alive(lease)).await;
    match opened {
        Ok(Ok(renewer)) => Ok(KeepAlive::spawn(
            lease,
            renewer,
            settings.keep_alive_interval,
            settings.lease_ttl,
        )),
        Ok(Err(e)) => {
            revoke_quietly(shared, lease).await;
            Err(e)
        }
        Err(elapsed) => {
            revoke_quietly(shared, lease).await;
            Err(LockError::backend(elapsed))
        }
    }
}

/// Revokes a lease that no longer guards anything, bounded by the release
/// timeout rather than the caller's context.
async fn revoke_quietly<S: LeaseStore>(shared: &Shared<S>, lease: LeaseId) {
    match tokio::time::timeout(shared.settings.release_timeout, shared.store.revoke(lease)).await {
        Ok(Ok(())) => debug!(lease = %lease, "revoked abandoned lease"),
        Ok(Err(e)) => {
            warn!(lease = %lease, error = %e, "failed to revoke abandoned lease, it will expire on its ttl")
        }
        Err(_) => warn!(lease = %lease, "timed out revoking abandoned lease, it will expire on its ttl"),
    }
}

/// Stops the keep-alive and revokes the lease of an attempt that will not
/// hold the lock.
async fn abandon<S: LeaseStore>(shared: &Shared<S>, keep_alive: KeepAlive) {
    let lease = keep_alive.lease();
    keep_alive.shutdown().await;
    revoke_quietly(shared, lease).await;
}

/// Resolves once `lost` reports the lease gone.
async fn lease_lost(mut lost: watch::Receiver<bool>) {
    loop {
        if *lost.borrow_and_update() {
            return;
        }
        if lost.changed().await.is_err() {
            // The keep-alive stopped without losing the lease.
            pending::<()>().await;
        }
    }
}

fn holder_agent(value: &[u8]) -> String {
    LockRecord::decode(value)
        .map(|record| record.agent_id)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Waits until the lock for `key` is held by this attempt or `ctx` ends.
///
/// Backend errors are retried with backoff. When `ctx` ends the result is
/// `Canceled` if the attempt was waiting on a live holder, or the last
/// backend error if the store was failing.
pub(crate) async fn acquire<S: LeaseStore>(
    shared: &Shared<S>,
    key: &Key,
    record_key: &str,
    ctx: &Context,
) -> LockResult<HeldLock> {
    let settings = &shared.settings;
    let mut backoff = Backoff::new(settings.retry_min, settings.retry_max);
    let mut session: Option<KeepAlive> = None;
    let mut last_error: Option<LockError> = None;

    while !ctx.is_done() {
        let keep_alive = match session.take() {
            Some(keep_alive) if !keep_alive.is_lost() => keep_alive,
            previous => {
                if let Some(lost) = previous {
                    debug!(lock.key = %key, lease = %lost.lease(), "lease lost while waiting, granting a new one");
                    abandon(shared, lost).await;
                }
                match open_lease(shared).await {
                    Ok(keep_alive) if ctx.is_done() => {
                        abandon(shared, keep_alive).await;
                        break;
                    }
                    Ok(keep_alive) => keep_alive,
                    Err(e) => {
                        warn!(lock.key = %key, error = %e, "failed to grant lock lease, retrying");
                        last_error = Some(e);
                        if ctx.sleep(backoff.next_delay()).await.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }
        };

        let lease = keep_alive.lease();
        let value = match LockRecord::new(&shared.agent, lease).encode() {
            Ok(value) => value,
            Err(e) => {
                abandon(shared, keep_alive).await;
                return Err(e);
            }
        };

        match ctx.run(shared.store.create_if_absent(record_key, value, lease)).await {
            Ok(Ok(CreateOutcome::Created { revision })) => {
                debug!(lock.key = %key, lease = %lease, revision, "lock record created");
                return Ok(HeldLock {
                    keep_alive,
                    revision,
                });
            }
            Ok(Ok(CreateOutcome::Exists { holder, revision })) => {
                backoff.reset();
                last_error = None;
                debug!(
                    lock.key = %key,
                    holder = %holder.as_ref().map(|h| holder_agent(&h.value)).unwrap_or_default(),
                    revision,
                    "lock held elsewhere, waiting for release"
                );

                let lost = keep_alive.lost_token();
                session = Some(keep_alive);
                let waited = ctx
                    .run(async {
                        tokio::select! {
                            result = shared.store.wait_deleted(record_key, revision) => result,
                            _ = lease_lost(lost) => Ok(()),
                        }
                    })
                    .await;
                match waited {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(lock.key = %key, error = %e, "watch on lock record failed, retrying");
                        last_error = Some(e);
                        if ctx.sleep(backoff.next_delay()).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            Ok(Err(e)) => {
                warn!(lock.key = %key, error = %e, "failed to create lock record, retrying");
                last_error = Some(e);
                session = Some(keep_alive);
                if ctx.sleep(backoff.next_delay()).await.is_err() {
                    break;
                }
            }
            Err(_) => {
                // The create may have landed; revoking the lease removes it.
                session = Some(keep_alive);
                break;
            }
        }
    }

    if let Some(keep_alive) = session.take() {
        abandon(shared, keep_alive).await;
    }
    Err(last_error.unwrap_or(LockError::Canceled))
}

/// Makes one attempt to create the lock record without waiting.
pub(crate) async fn try_acquire<S: LeaseStore>(
    shared: &Shared<S>,
    key: &Key,
    record_key: &str,
    ctx: &Context,
) -> LockResult<Option<HeldLock>> {
    let keep_alive = open_lease(shared).await?;
    if ctx.is_done() {
        abandon(shared, keep_alive).await;
        return Err(LockError::Canceled);
    }
    let lease = keep_alive.lease();

    let value = match LockRecord::new(&shared.agent, lease).encode() {
        Ok(value) => value,
        Err(e) => {
            abandon(shared, keep_alive).await;
            return Err(e);
        }
    };

    match ctx.run(shared.store.create_if_absent(record_key, value, lease)).await {
        Ok(Ok(CreateOutcome::Created { revision })) => {
            debug!(lock.key = %key, lease = %lease, revision, "lock record created");
            Ok(Some(HeldLock {
                keep_alive,
                revision,
            }))
        }
        Ok(Ok(CreateOutcome::Exists { .. })) => {
            abandon(shared, keep_alive).await;
            Ok(None)
        }
        Ok(Err(e)) | Err(e) => {
            abandon(shared, keep_alive).await;
            Err(e)
        }
    }
}

/// Stops the keep-alive, deletes the lock record and revokes the lease.
///
/// Not retried: on failure the record remains until the lease TTL lapses,
/// reported as [`LockError::LockStranded`].
pub(crate) async fn release<S: LeaseStore>(
    shared: &Shared<S>,
    key: &Key,
    record_key: &str,
    held: HeldLock,
) -> LockResult<()> {
    let lease = held.keep_alive.lease();
    let was_lost = held.keep_alive.is_lost();
    held.keep_alive.shutdown().await;

    let store = &shared.store;
    let outcome = tokio::time::timeout(shared.settings.release_timeout, async {
        let deleted = store.delete_if_owned(record_key, lease).await?;
        store.revoke(lease).await?;
        Ok::<bool, LockError>(deleted)
    })
    .await;

    let source = match outcome {
        Ok(Ok(deleted)) => {
            if !deleted {
                warn!(
                    lock.key = %key,
                    lease = %lease,
                    revision = held.revision,
                    lease_lost = was_lost,
                    "lock record was already gone at release"
                );
            }
            return Ok(());
        }
        Ok(Err(e)) => e,
        Err(elapsed) => LockError::backend(elapsed),
    };

    Err(LockError::LockStranded {
        key: key.to_string(),
        max_staleness: shared.settings.lease_ttl,
        source: Box::new(source),
    })
}
