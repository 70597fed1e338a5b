//! In-memory key storage.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use bitcoin::Network;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use wallet_crypto::{ChallengeKey, ChallengeType};
use wallet_key_deriv::{WalletPrivateKey, WalletPublicKey};
use wallet_primitives::NamedPath;
use wallet_service_proto::{KeyStorage, KeyStorageError};
use zeroize::Zeroizing;

use super::errors::InMemoryError;
use crate::errors::DbResult;

/// An extended key kept in its serialized form, the way a keychain holds it.
#[derive(Clone)]
struct StoredKey {
    base58: Zeroizing<String>,
    path: NamedPath,
}

impl fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredKey")
            .field("path", &self.path.to_string())
            .finish_non_exhaustive()
    }
}

fn corrupted(entry: &'static str, reason: impl fmt::Display) -> InMemoryError {
    InMemoryError::Corrupted {
        entry,
        reason: reason.to_string(),
    }
}

/// Key storage held in process memory.
///
/// Private keys are stored serialized and parsed on every fetch, so callers always get a fresh
/// value they own and drop.
#[derive(Debug, Clone)]
pub struct KeyStorageInMemory {
    network: Network,

    base_private_key: Arc<RwLock<Option<StoredKey>>>,

    cosigning_key: Arc<RwLock<Option<StoredKey>>>,

    swap_server_key: Arc<RwLock<Option<StoredKey>>>,

    /// entry name -> value, for the opaque strings the wallet keeps
    values: Arc<RwLock<HashMap<&'static str, Zeroizing<String>>>>,

    challenge_keys: Arc<RwLock<HashMap<ChallengeType, ChallengeKey>>>,

    /// (max used, max watching) external address indexes
    indexes: Arc<RwLock<(i64, i64)>>,
}

const USER_FINGERPRINT: &str = "user key fingerprint";
const MUUN_FINGERPRINT: &str = "muun key fingerprint";
const MUUN_PRIVATE_KEY: &str = "muun private key";
const ENCRYPTED_USER_KEY: &str = "encrypted user private key";

impl KeyStorageInMemory {
    /// Empty storage for keys of `network`.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            base_private_key: Arc::default(),
            cosigning_key: Arc::default(),
            swap_server_key: Arc::default(),
            values: Arc::default(),
            challenge_keys: Arc::default(),
            indexes: Arc::new(RwLock::new((-1, -1))),
        }
    }

    /// Drops every stored value, as on sign out.
    pub async fn wipe(&self) {
        *self.base_private_key.write().await = None;
        *self.cosigning_key.write().await = None;
        *self.swap_server_key.write().await = None;
        self.values.write().await.clear();
        self.challenge_keys.write().await.clear();
        *self.indexes.write().await = (-1, -1);
        debug!("wiped key storage");
    }

    async fn public_key(
        &self,
        slot: &RwLock<Option<StoredKey>>,
        entry: &'static str,
    ) -> DbResult<WalletPublicKey> {
        let stored = slot.read().await;
        let stored = stored.as_ref().ok_or(InMemoryError::NotFound(entry))?;
        Ok(
            WalletPublicKey::from_base58(&stored.base58, stored.path.clone(), self.network)
                .map_err(|e| corrupted(entry, e))?,
        )
    }

    async fn private_key(&self) -> DbResult<WalletPrivateKey> {
        const ENTRY: &str = "base private key";

        let stored = self.base_private_key.read().await;
        let stored = stored.as_ref().ok_or(InMemoryError::NotFound(ENTRY))?;
        Ok(
            WalletPrivateKey::from_base58(&stored.base58, stored.path.clone(), self.network)
                .map_err(|e| corrupted(ENTRY, e))?,
        )
    }

    async fn value(&self, entry: &'static str) -> DbResult<String> {
        Ok(self
            .values
            .read()
            .await
            .get(entry)
            .map(|v| v.as_str().to_owned())
            .ok_or(InMemoryError::NotFound(entry))?)
    }

    async fn set_value(&self, entry: &'static str, value: String) {
        trace!(action = "trying to acquire wlock on values", %entry);
        self.values.write().await.insert(entry, Zeroizing::new(value));
    }
}

fn store(key: &WalletPublicKey) -> StoredKey {
    StoredKey {
        base58: Zeroizing::new(key.to_base58()),
        path: key.path().clone(),
    }
}

#[async_trait]
impl KeyStorage for KeyStorageInMemory {
    async fn base_private_key(&self) -> Result<WalletPrivateKey, KeyStorageError> {
        Ok(self.private_key().await?)
    }

    async fn store_base_private_key(&self, key: &WalletPrivateKey) -> Result<(), KeyStorageError> {
        *self.base_private_key.write().await = Some(StoredKey {
            base58: Zeroizing::new(key.to_base58()),
            path: key.path().clone(),
        });

        {
            let mut values = self.values.write().await;
            values.insert(
                USER_FINGERPRINT,
                Zeroizing::new(key.fingerprint().to_string()),
            );
            values.remove(ENCRYPTED_USER_KEY);
        }
        // a new base key starts a fresh external chain
        self.indexes.write().await.0 = -1;

        debug!(fingerprint = %key.fingerprint(), "stored base private key");
        Ok(())
    }

    async fn cosigning_key(&self) -> Result<WalletPublicKey, KeyStorageError> {
        Ok(self
            .public_key(&self.cosigning_key, "cosigning key")
            .await?)
    }

    async fn store_cosigning_key(&self, key: &WalletPublicKey) -> Result<(), KeyStorageError> {
        *self.cosigning_key.write().await = Some(store(key));
        self.set_value(MUUN_FINGERPRINT, key.fingerprint().to_string())
            .await;
        Ok(())
    }

    async fn swap_server_key(&self) -> Result<WalletPublicKey, KeyStorageError> {
        Ok(self
            .public_key(&self.swap_server_key, "swap server key")
            .await?)
    }

    async fn store_swap_server_key(&self, key: &WalletPublicKey) -> Result<(), KeyStorageError> {
        *self.swap_server_key.write().await = Some(store(key));
        Ok(())
    }

    async fn muun_private_key(&self) -> Result<String, KeyStorageError> {
        Ok(self.value(MUUN_PRIVATE_KEY).await?)
    }

    async fn store_muun_private_key(&self, encrypted: &str) -> Result<(), KeyStorageError> {
        self.set_value(MUUN_PRIVATE_KEY, encrypted.to_string())
            .await;
        Ok(())
    }

    async fn muun_key_fingerprint(&self) -> Result<String, KeyStorageError> {
        Ok(self.value(MUUN_FINGERPRINT).await?)
    }

    async fn store_muun_key_fingerprint(&self, fingerprint: &str) -> Result<(), KeyStorageError> {
        self.set_value(MUUN_FINGERPRINT, fingerprint.to_string())
            .await;
        Ok(())
    }

    async fn user_key_fingerprint(&self) -> Result<String, KeyStorageError> {
        Ok(self.value(USER_FINGERPRINT).await?)
    }

    async fn challenge_key(
        &self,
        challenge_type: ChallengeType,
    ) -> Result<ChallengeKey, KeyStorageError> {
        self.challenge_keys
            .read()
            .await
            .get(&challenge_type)
            .cloned()
            .ok_or_else(|| KeyStorageError::MissingKey(format!("{challenge_type:?} challenge key")))
    }

    async fn store_challenge_key(&self, key: &ChallengeKey) -> Result<(), KeyStorageError> {
        // both held, so no reader sees the new key next to the old kit key
        let mut values = self.values.write().await;
        let mut keys = self.challenge_keys.write().await;

        let rotated = keys
            .get(&key.challenge_type())
            .is_some_and(|previous| previous != key);
        if rotated && key.challenge_type() == ChallengeType::RecoveryCode {
            values.remove(ENCRYPTED_USER_KEY);
            debug!("dropped emergency kit user key of the previous recovery code");
        }
        keys.insert(key.challenge_type(), key.clone());

        debug!(
            challenge_type = ?key.challenge_type(),
            checksum = %key.checksum(),
            rotated,
            "stored challenge key"
        );
        Ok(())
    }

    async fn has_challenge_key(
        &self,
        challenge_type: ChallengeType,
    ) -> Result<bool, KeyStorageError> {
        Ok(self.challenge_keys.read().await.contains_key(&challenge_type))
    }

    async fn encrypted_user_private_key(&self) -> Result<String, KeyStorageError> {
        Ok(self.value(ENCRYPTED_USER_KEY).await?)
    }

    async fn store_encrypted_user_private_key(
        &self,
        encrypted: &str,
    ) -> Result<(), KeyStorageError> {
        self.set_value(ENCRYPTED_USER_KEY, encrypted.to_string())
            .await;
        Ok(())
    }

    async fn max_used_index(&self) -> Result<i64, KeyStorageError> {
        Ok(self.indexes.read().await.0)
    }

    async fn update_max_used_index(&self, index: i64) -> Result<(), KeyStorageError> {
        let mut indexes = self.indexes.write().await;
        indexes.0 = indexes.0.max(index);
        Ok(())
    }

    async fn max_watching_index(&self) -> Result<i64, KeyStorageError> {
        Ok(self.indexes.read().await.1)
    }

    async fn update_max_watching_index(&self, index: i64) -> Result<(), KeyStorageError> {
        let mut indexes = self.indexes.write().await;
        indexes.1 = indexes.1.max(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wallet_crypto::{ChallengePrivateKey, RecoveryCode};
    use wallet_primitives::DerivationSchema;

    use super::*;

    const NETWORK: Network = Network::Regtest;

    fn base_key(seed: u8) -> WalletPrivateKey {
        WalletPrivateKey::from_seed(&[seed; 32], NETWORK)
            .unwrap()
            .derive_to_schema(DerivationSchema::Base)
            .unwrap()
    }

    #[tokio::test]
    async fn missing_entries_are_reported_as_missing() {
        let storage = KeyStorageInMemory::new(NETWORK);

        assert!(storage.base_private_key().await.unwrap_err().is_missing());
        assert!(storage.cosigning_key().await.unwrap_err().is_missing());
        assert!(storage.muun_private_key().await.unwrap_err().is_missing());
        assert!(storage
            .challenge_key(ChallengeType::RecoveryCode)
            .await
            .unwrap_err()
            .is_missing());
        assert_eq!(storage.max_used_index().await.unwrap(), -1);
        assert_eq!(storage.max_watching_index().await.unwrap(), -1);
    }

    #[tokio::test]
    async fn base_key_round_trips_and_resets_address_usage() {
        let storage = KeyStorageInMemory::new(NETWORK);
        storage.update_max_used_index(7).await.unwrap();

        let key = base_key(1);
        storage.store_base_private_key(&key).await.unwrap();

        let fetched = storage.base_private_key().await.unwrap();
        assert_eq!(fetched.to_base58(), key.to_base58());
        assert_eq!(fetched.path(), key.path());
        assert_eq!(storage.base_public_key().await.unwrap(), key.public_key());
        assert_eq!(
            storage.user_key_fingerprint().await.unwrap(),
            key.fingerprint().to_string()
        );
        assert_eq!(storage.max_used_index().await.unwrap(), -1);
    }

    #[tokio::test]
    async fn cosigning_key_records_its_fingerprint() {
        let storage = KeyStorageInMemory::new(NETWORK);
        let muun = base_key(2).public_key();

        storage.store_cosigning_key(&muun).await.unwrap();

        assert_eq!(storage.cosigning_key().await.unwrap(), muun);
        assert_eq!(
            storage.muun_key_fingerprint().await.unwrap(),
            muun.fingerprint().to_string()
        );
    }

    #[tokio::test]
    async fn challenge_keys_rotate_per_type() {
        let storage = KeyStorageInMemory::new(NETWORK);
        let first = ChallengePrivateKey::from_user_key(&base_key(3)).challenge_key();
        let second = ChallengePrivateKey::from_user_key(&base_key(4)).challenge_key();

        storage.store_challenge_key(&first).await.unwrap();
        storage.store_challenge_key(&second).await.unwrap();

        assert!(storage.has_challenge_key(ChallengeType::UserKey).await.unwrap());
        assert!(!storage.has_challenge_key(ChallengeType::Password).await.unwrap());
        assert_eq!(
            storage.challenge_key(ChallengeType::UserKey).await.unwrap(),
            second
        );
    }

    fn recovery_code_key() -> ChallengeKey {
        let code = RecoveryCode::random().unwrap();
        ChallengePrivateKey::from_recovery_code(&code, None)
            .unwrap()
            .challenge_key()
    }

    #[tokio::test]
    async fn kit_user_key_follows_the_recovery_code_and_base_key() {
        let storage = KeyStorageInMemory::new(NETWORK);
        let rc = recovery_code_key();
        storage.store_challenge_key(&rc).await.unwrap();
        storage
            .store_encrypted_user_private_key("for the first code")
            .await
            .unwrap();

        // re-storing the same key, or another challenge type, keeps the kit key
        storage.store_challenge_key(&rc).await.unwrap();
        storage
            .store_challenge_key(&ChallengePrivateKey::from_user_key(&base_key(5)).challenge_key())
            .await
            .unwrap();
        assert_eq!(
            storage.encrypted_user_private_key().await.unwrap(),
            "for the first code"
        );

        storage
            .store_challenge_key(&recovery_code_key())
            .await
            .unwrap();
        assert!(storage
            .encrypted_user_private_key()
            .await
            .unwrap_err()
            .is_missing());

        storage
            .store_encrypted_user_private_key("for the second code")
            .await
            .unwrap();
        storage.store_base_private_key(&base_key(6)).await.unwrap();
        assert!(storage
            .encrypted_user_private_key()
            .await
            .unwrap_err()
            .is_missing());
    }

    #[tokio::test]
    async fn address_indexes_only_increase() {
        let storage = KeyStorageInMemory::new(NETWORK);
        storage.update_max_used_index(5).await.unwrap();
        storage.update_max_used_index(3).await.unwrap();
        storage.update_max_watching_index(20).await.unwrap();
        storage.update_max_watching_index(-1).await.unwrap();

        assert_eq!(storage.max_used_index().await.unwrap(), 5);
        assert_eq!(storage.max_watching_index().await.unwrap(), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_index_updates_keep_the_highest() {
        let storage = KeyStorageInMemory::new(NETWORK);

        let updates: Vec<_> = (0..64)
            .rev()
            .map(|index| {
                let storage = storage.clone();
                tokio::spawn(async move { storage.update_max_used_index(index).await })
            })
            .collect();
        for update in updates {
            update.await.unwrap().unwrap();
        }

        assert_eq!(storage.max_used_index().await.unwrap(), 63);
    }

    #[tokio::test]
    async fn clones_share_state_until_wiped() {
        let storage = KeyStorageInMemory::new(NETWORK);
        let other = storage.clone();

        storage.store_muun_private_key("encrypted").await.unwrap();
        assert_eq!(other.muun_private_key().await.unwrap(), "encrypted");

        other.wipe().await;
        assert!(storage.muun_private_key().await.unwrap_err().is_missing());
    }
}
