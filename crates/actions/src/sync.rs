//! Public key set synchronization with the coordination service.

use std::{fmt, sync::Arc};

use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};
use wallet_primitives::Environment;
use wallet_service_proto::{
    ExternalAddressesRecord, KeyCoordinationService, KeyStorage, PublicKeySet, ServiceError,
};

use crate::{ActionState, RetryPolicy, SingleFlight, SyncError};

/// Sends the user's base public key to the service and stores what comes back.
///
/// The service is authoritative for the cosigning and swap server keys. External address indexes
/// are merged with the local ones so they never move backwards.
pub struct SyncPublicKeySetAction {
    storage: Arc<dyn KeyStorage>,
    service: Arc<dyn KeyCoordinationService>,
    retry: RetryPolicy<ServiceError>,
    flight: SingleFlight<PublicKeySet, SyncError>,
}

impl fmt::Debug for SyncPublicKeySetAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncPublicKeySetAction")
            .field("retry", &self.retry)
            .field("flight", &self.flight)
            .finish_non_exhaustive()
    }
}

impl SyncPublicKeySetAction {
    /// Creates the action, retrying as configured in `env`.
    pub fn new(
        env: &Environment,
        storage: Arc<dyn KeyStorage>,
        service: Arc<dyn KeyCoordinationService>,
    ) -> Self {
        Self {
            storage,
            service,
            retry: RetryPolicy::from_config(&env.sync_retry),
            flight: SingleFlight::new(),
        }
    }

    /// Observes the progress of syncs.
    pub fn state(&self) -> watch::Receiver<ActionState<PublicKeySet, SyncError>> {
        self.flight.subscribe()
    }

    /// Syncs, or joins the sync in progress.
    pub async fn run(&self) -> Result<PublicKeySet, SyncError> {
        let storage = self.storage.clone();
        let service = self.service.clone();
        let retry = self.retry.clone();

        self.flight
            .run(move || sync(storage, service, retry))
            .await
    }

    /// Syncs without waiting for the outcome. Failures are logged and published on
    /// [`Self::state`].
    pub fn run_in_background(self: &Arc<Self>) -> JoinHandle<()> {
        let action = self.clone();
        tokio::spawn(async move {
            if let Err(error) = action.run().await {
                warn!(%error, "background public key set sync failed");
            }
        })
    }
}

async fn sync(
    storage: Arc<dyn KeyStorage>,
    service: Arc<dyn KeyCoordinationService>,
    retry: RetryPolicy<ServiceError>,
) -> Result<PublicKeySet, SyncError> {
    let base_public_key = storage.base_public_key().await?;

    let remote = retry
        .retry(|| service.update_public_key_set(&base_public_key))
        .await?;
    if remote.base_public_key != base_public_key {
        warn!(
            ours = %base_public_key.fingerprint(),
            theirs = %remote.base_public_key.fingerprint(),
            "service answered with a foreign key set"
        );
        return Err(SyncError::ForeignKeySet);
    }

    let local_watching = storage.max_watching_index().await?;
    let mut record = ExternalAddressesRecord {
        max_used_index: storage.max_used_index().await?,
        max_watching_index: (local_watching >= 0).then_some(local_watching),
    };
    if let Some(theirs) = &remote.external_addresses {
        record.merge(theirs);
        storage.update_max_used_index(record.max_used_index).await?;
        if let Some(watching) = record.max_watching_index {
            storage.update_max_watching_index(watching).await?;
        }
        debug!(?record, "merged external address indexes");
    }

    if let Some(cosigning) = &remote.base_cosigning_public_key {
        storage.store_cosigning_key(cosigning).await?;
    }
    if let Some(swap_server) = &remote.base_swap_server_public_key {
        storage.store_swap_server_key(swap_server).await?;
    }

    let mut set = PublicKeySet::new(base_public_key);
    set.merge(&remote);
    set.external_addresses = Some(record);

    info!(
        has_cosigning_key = set.base_cosigning_public_key.is_some(),
        has_swap_server_key = set.base_swap_server_public_key.is_some(),
        max_used_index = record.max_used_index,
        "synced public key set"
    );
    Ok(set)
}
