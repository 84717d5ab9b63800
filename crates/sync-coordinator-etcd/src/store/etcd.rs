//! etcd v3 adapter.

use std::sync::Arc;
use std::time::Duration;

use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, EventType, LeaseKeepAliveStream, LeaseKeeper,
    PutOptions, Txn, TxnOp, TxnOpResponse, WatchOptions,
};
use parking_lot::RwLock;
use sync_coordinator_core::error::{LockError, LockResult};
use tracing::{debug, instrument, warn};

use super::{CreateOutcome, HolderRecord, LeaseId, LeaseRenewer, LeaseStore, round_up_to_secs};
use crate::config::EtcdConfig;

/// Lease store backed by an etcd v3 cluster.
///
/// Clones share one gRPC channel.
#[derive(Clone)]
pub struct EtcdStore {
    client: Arc<RwLock<Option<Client>>>,
}

impl EtcdStore {
    /// Connects and checks the cluster answers within the dial timeout.
    #[instrument(skip(config), fields(endpoints = ?config.endpoints))]
    pub async fn connect(config: &EtcdConfig) -> LockResult<Self> {
        let mut options = ConnectOptions::new()
            .with_connect_timeout(config.dial_timeout())
            .with_keep_alive(Duration::from_secs(10), config.dial_timeout());
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            options = options.with_user(user.clone(), password.clone());
        }

        let connect = async {
            let mut client = Client::connect(&config.endpoints, Some(options)).await?;
            client.status().await?;
            Ok::<Client, etcd_client::Error>(client)
        };
        let client = match tokio::time::timeout(config.dial_timeout(), connect).await {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => return Err(LockError::backend(e)),
            Err(elapsed) => return Err(LockError::backend(elapsed)),
        };
        debug!("connected to etcd");

        Ok(Self {
            client: Arc::new(RwLock::new(Some(client))),
        })
    }

    fn client(&self) -> LockResult<Client> {
        self.client
            .read()
            .clone()
            .ok_or_else(|| LockError::backend_msg("etcd store is closed"))
    }
}

impl std::fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdStore")
            .field("closed", &self.client.read().is_none())
            .finish()
    }
}

fn is_lease_not_found(error: &etcd_client::Error) -> bool {
    match error {
        etcd_client::Error::GRpcStatus(status) => status.message().contains("lease not found"),
        _ => false,
    }
}

/// Keep-alive stream for one etcd lease.
pub struct EtcdLeaseRenewer {
    store: EtcdStore,
    lease: LeaseId,
    stream: Option<(LeaseKeeper, LeaseKeepAliveStream)>,
}

impl EtcdLeaseRenewer {
    async fn renew_once(&mut self) -> LockResult<Option<Duration>> {
        if self.stream.is_none() {
            let mut client = self.store.client()?;
            let opened = client
                .lease_keep_alive(self.lease.0)
                .await
                .map_err(LockError::backend)?;
            self.stream = Some(opened);
        }
        let Some((keeper, stream)) = self.stream.as_mut() else {
            return Err(LockError::backend_msg("keep-alive stream unavailable"));
        };

        keeper.keep_alive().await.map_err(LockError::backend)?;
        match stream.message().await.map_err(LockError::backend)? {
            Some(response) if response.ttl() > 0 => {
                Ok(Some(Duration::from_secs(response.ttl() as u64)))
            }
            Some(_) => Ok(None),
            None => Err(LockError::backend_msg("keep-alive stream closed")),
        }
    }
}

impl LeaseRenewer for EtcdLeaseRenewer {
    async fn renew(&mut self) -> LockResult<Option<Duration>> {
        let result = self.renew_once().await;
        if result.is_err() {
            // Reopen the stream on the next renewal.
            self.stream = None;
        }
        result
    }
}

impl LeaseStore for EtcdStore {
    type Renewer = EtcdLeaseRenewer;

    fn granted_ttl(&self, ttl: Duration) -> Duration {
        round_up_to_secs(ttl)
    }

    async fn grant(&self, ttl: Duration) -> LockResult<LeaseId> {
        let secs = round_up_to_secs(ttl).as_secs() as i64;
        let response = self
            .client()?
            .lease_grant(secs, None)
            .await
            .map_err(LockError::backend)?;
        if response.ttl() > secs {
            // The server enforces a minimum TTL; stale locks can outlive
            // `max_stale_lock_window` by the difference.
            warn!(
                lease = %LeaseId(response.id()),
                requested_secs = secs,
                granted_secs = response.ttl(),
                "etcd granted a longer lease ttl than requested"
            );
        }
        Ok(LeaseId(response.id()))
    }

    async fn open_keep_alive(&self, lease: LeaseId) -> LockResult<Self::Renewer> {
        let stream = self
            .client()?
            .lease_keep_alive(lease.0)
            .await
            .map_err(LockError::backend)?;
        Ok(EtcdLeaseRenewer {
            store: self.clone(),
            lease,
            stream: Some(stream),
        })
    }

    async fn revoke(&self, lease: LeaseId) -> LockResult<()> {
        match self.client()?.lease_revoke(lease.0).await {
            Ok(_) => Ok(()),
            Err(e) if is_lease_not_found(&e) => Ok(()),
            Err(e) => Err(LockError::backend(e)),
        }
    }

    async fn create_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: LeaseId,
    ) -> LockResult<CreateOutcome> {
        let txn = Txn::new()
            .when(vec![Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(
                key,
                value,
                Some(PutOptions::new().with_lease(lease.0)),
            )])
            .or_else(vec![TxnOp::get(key, None)]);

        let response = self.client()?.txn(txn).await.map_err(LockError::backend)?;
        let revision = response.header().map(|h| h.revision()).unwrap_or_default();
        if response.succeeded() {
            return Ok(CreateOutcome::Created { revision });
        }

        let holder = response.op_responses().into_iter().find_map(|op| match op {
            TxnOpResponse::Get(get) => get.kvs().first().map(|kv| HolderRecord {
                lease: LeaseId(kv.lease()),
                create_revision: kv.create_revision(),
                value: kv.value().to_vec(),
            }),
            _ => None,
        });
        Ok(CreateOutcome::Exists { holder, revision })
    }

    async fn delete_if_owned(&self, key: &str, lease: LeaseId) -> LockResult<bool> {
        let txn = Txn::new()
            .when(vec![Compare::lease(key, CompareOp::Equal, lease.0)])
            .and_then(vec![TxnOp::delete(key, None)]);
        let response = self.client()?.txn(txn).await.map_err(LockError::backend)?;
        Ok(response.succeeded())
    }

    async fn wait_deleted(&self, key: &str, observed_revision: i64) -> LockResult<()> {
        let options = WatchOptions::new().with_start_revision(observed_revision + 1);
        let (_watcher, mut stream) = self
            .client()?
            .watch(key, Some(options))
            .await
            .map_err(LockError::backend)?;

        loop {
            let Some(response) = stream.message().await.map_err(LockError::backend)? else {
                return Err(LockError::backend_msg("watch stream closed"));
            };
            // History before the requested revision was compacted away; let
            // the caller look at the key again.
            if response.compact_revision() > 0 {
                return Ok(());
            }
            if response.canceled() {
                return Err(LockError::backend_msg(format!(
                    "watch canceled: {}",
                    response.cancel_reason()
                )));
            }
            if response
                .events()
                .iter()
                .any(|event| event.event_type() == EventType::Delete)
            {
                return Ok(());
            }
        }
    }

    async fn close(&self) -> LockResult<()> {
        self.client.write().take();
        Ok(())
    }
}
