//! Receiving address generation.

use std::{fmt, sync::Arc};

use bitcoin::Network;
use rand::Rng;
use tracing::{debug, info};
use wallet_key_deriv::DerivationError;
use wallet_primitives::{DerivationSchema, Environment};
use wallet_service_proto::KeyStorage;
use wallet_signer::{AddressDescriptor, AddressVersion, MuunAddress};

use crate::{AddressError, SyncPublicKeySetAction};

/// The addresses handed to the user for one external index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalAddresses {
    /// The external index the addresses derive from.
    pub index: u32,

    /// Nested segwit, for senders without native segwit support.
    pub legacy: MuunAddress,

    /// Native segwit.
    pub segwit: MuunAddress,

    /// Taproot, when enabled.
    pub taproot: Option<MuunAddress>,
}

/// Picks the external index for the next receiving address.
///
/// Fresh indexes are used while the service watches them. Past the watched range, offline
/// wallets reuse a random index from the last window, all of which the service still watches.
pub fn next_external_index<R: Rng + ?Sized>(
    max_used_index: i64,
    max_watching_index: i64,
    watch_window: u32,
    rng: &mut R,
) -> i64 {
    if max_used_index < 0 {
        return 0;
    }
    if max_used_index < max_watching_index {
        return max_used_index + 1;
    }

    let min_watching_index = (max_watching_index - i64::from(watch_window)).max(0);
    if min_watching_index >= max_watching_index {
        // nothing watched yet, stay on the last handed out index
        return max_used_index;
    }
    rng.gen_range(min_watching_index..max_watching_index)
}

/// Derives receiving addresses.
pub struct AddressActions {
    network: Network,
    watch_window: u32,
    taproot_enabled: bool,
    storage: Arc<dyn KeyStorage>,
    sync: Arc<SyncPublicKeySetAction>,
}

impl fmt::Debug for AddressActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressActions")
            .field("network", &self.network)
            .field("watch_window", &self.watch_window)
            .field("taproot_enabled", &self.taproot_enabled)
            .finish_non_exhaustive()
    }
}

impl AddressActions {
    /// Creates the actions. `sync` is triggered whenever a fresh index is handed out.
    pub fn new(
        env: &Environment,
        storage: Arc<dyn KeyStorage>,
        sync: Arc<SyncPublicKeySetAction>,
    ) -> Self {
        Self {
            network: env.network,
            watch_window: env.external_watch_window,
            taproot_enabled: env.taproot_enabled,
            storage,
            sync,
        }
    }

    /// Derives the addresses for the next external index and records its use.
    ///
    /// Works offline. Using a fresh index starts a background sync so the service learns about
    /// it.
    pub async fn generate_external_addresses(&self) -> Result<ExternalAddresses, AddressError> {
        let max_used_index = self.storage.max_used_index().await?;
        let max_watching_index = self.storage.max_watching_index().await?;

        let next = next_external_index(
            max_used_index,
            max_watching_index,
            self.watch_window,
            &mut rand::thread_rng(),
        );
        let index = u32::try_from(next).map_err(|_| AddressError::IndexOutOfRange(next))?;

        let user_base = self.storage.base_public_key().await?;
        let muun_base = self.storage.cosigning_key().await?;
        let path = DerivationSchema::External
            .path()
            .child_index(index)
            .map_err(DerivationError::from)?;

        let derive = |version| {
            AddressDescriptor::new(version, path.clone()).derive(
                &user_base,
                &muun_base,
                self.network,
            )
        };
        let addresses = ExternalAddresses {
            index,
            legacy: derive(AddressVersion::V3)?,
            segwit: derive(AddressVersion::V4)?,
            taproot: self
                .taproot_enabled
                .then(|| derive(AddressVersion::V5))
                .transpose()?,
        };

        if next > max_used_index {
            self.storage.update_max_used_index(next).await?;
            self.sync.run_in_background();
            info!(index, "handed out fresh external index");
        } else {
            debug!(index, max_watching_index, "reusing watched external index");
        }

        Ok(addresses)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng};
    use wallet_db::inmemory::prelude::KeyStorageInMemory;
    use wallet_service_proto::{ExternalAddressesRecord, PublicKeySet};
    use wallet_test_utils::{fixtures, FakeCoordinationService};

    use super::*;

    struct Setup {
        storage: Arc<KeyStorageInMemory>,
        service: Arc<FakeCoordinationService>,
        sync: Arc<SyncPublicKeySetAction>,
        actions: AddressActions,
    }

    async fn setup(env: Environment) -> Setup {
        let storage = Arc::new(KeyStorageInMemory::new(fixtures::NETWORK));
        storage
            .store_base_private_key(&fixtures::user_base_key())
            .await
            .unwrap();
        storage
            .store_cosigning_key(&fixtures::muun_base_key().public_key())
            .await
            .unwrap();

        let mut remote = PublicKeySet::new(fixtures::user_base_key().public_key());
        remote.external_addresses = Some(ExternalAddressesRecord::new());
        let service = Arc::new(FakeCoordinationService::new(remote));
        let sync = Arc::new(SyncPublicKeySetAction::new(
            &env,
            storage.clone(),
            service.clone(),
        ));
        let actions = AddressActions::new(&env, storage.clone(), sync.clone());

        Setup {
            storage,
            service,
            sync,
            actions,
        }
    }

    #[test]
    fn index_selection_follows_the_watch_window() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(next_external_index(-1, -1, 15, &mut rng), 0);
        assert_eq!(next_external_index(-1, 40, 15, &mut rng), 0);
        assert_eq!(next_external_index(3, 18, 15, &mut rng), 4);
        assert_eq!(next_external_index(0, -1, 15, &mut rng), 0);

        for _ in 0..100 {
            let index = next_external_index(40, 40, 15, &mut rng);
            assert!((25..40).contains(&index));
        }
        for _ in 0..100 {
            let index = next_external_index(9, 5, 15, &mut rng);
            assert!((0..5).contains(&index));
        }
    }

    proptest! {
        #[test]
        fn next_index_is_always_watched_or_fresh(
            used in -1i64..500,
            watching in -1i64..500,
            seed in any::<u64>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let next = next_external_index(used, watching, 15, &mut rng);

            prop_assert!(next >= 0);
            if used < watching {
                prop_assert!(next <= watching);
            } else if next > used {
                prop_assert_eq!(used, -1);
            }
        }
    }

    #[tokio::test]
    async fn hands_out_fresh_indexes_and_syncs() {
        let s = setup(Environment::regtest()).await;

        let first = s.actions.generate_external_addresses().await.unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(first.legacy.version, AddressVersion::V3);
        assert_eq!(first.segwit.version, AddressVersion::V4);
        assert_eq!(first.taproot.as_ref().unwrap().version, AddressVersion::V5);
        assert_eq!(
            first.segwit.path,
            DerivationSchema::External.path().child_index(0).unwrap()
        );
        assert_eq!(s.storage.max_used_index().await.unwrap(), 0);

        // The background sync reports -1 as used; the local index must survive it.
        s.service.wait_for_update_calls(1).await;
        let second = s.actions.generate_external_addresses().await.unwrap();
        assert_eq!(second.index, 0);
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn moves_through_the_watched_range() {
        let s = setup(Environment::regtest()).await;
        s.storage.update_max_used_index(3).await.unwrap();
        s.storage.update_max_watching_index(18).await.unwrap();

        let addresses = s.actions.generate_external_addresses().await.unwrap();

        assert_eq!(addresses.index, 4);
        assert_eq!(s.storage.max_used_index().await.unwrap(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn syncs_racing_generation_never_lower_the_used_index() {
        let s = setup(Environment::regtest()).await;
        s.storage.update_max_watching_index(200).await.unwrap();

        for expected in 0..32u32 {
            let sync = s.sync.clone();
            let racing = tokio::spawn(async move { sync.run().await });

            let addresses = s.actions.generate_external_addresses().await.unwrap();
            racing.await.unwrap().unwrap();

            assert_eq!(addresses.index, expected);
            assert_eq!(s.storage.max_used_index().await.unwrap(), i64::from(expected));
        }
    }

    #[tokio::test]
    async fn reuses_watched_indexes_offline() {
        let s = setup(Environment::regtest()).await;
        s.storage.update_max_used_index(30).await.unwrap();
        s.storage.update_max_watching_index(30).await.unwrap();

        let addresses = s.actions.generate_external_addresses().await.unwrap();

        assert!((15..30).contains(&addresses.index));
        assert_eq!(s.storage.max_used_index().await.unwrap(), 30);
        assert_eq!(s.service.update_calls(), 0);
    }

    #[tokio::test]
    async fn taproot_follows_the_feature_flag() {
        let mut env = Environment::regtest();
        env.taproot_enabled = false;
        let s = setup(env).await;

        let addresses = s.actions.generate_external_addresses().await.unwrap();

        assert!(addresses.taproot.is_none());
    }

    #[tokio::test]
    async fn needs_the_cosigning_key() {
        let s = setup(Environment::regtest()).await;
        s.storage.wipe().await;
        s.storage
            .store_base_private_key(&fixtures::user_base_key())
            .await
            .unwrap();

        let err = s.actions.generate_external_addresses().await.unwrap_err();

        assert!(matches!(err, AddressError::Storage(e) if e.is_missing()));
    }
}
