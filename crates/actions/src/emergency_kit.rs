//! Assembly of the emergency kit export.

use std::{fmt, sync::Arc};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use wallet_crypto::{ChallengeKey, ChallengeType};
use wallet_service_proto::KeyStorage;

use crate::EmergencyKitExportError;

/// Everything printed on an emergency kit.
#[derive(Clone, PartialEq, Eq)]
pub struct EmergencyKitData {
    /// The user key encrypted to the recovery code challenge key.
    pub user_key: String,

    /// Fingerprint of the user key.
    pub user_fingerprint: String,

    /// The cosigner key as encrypted by the service.
    pub muun_key: String,

    /// Fingerprint of the cosigner key.
    pub muun_fingerprint: String,

    /// Checksum of the recovery code challenge key.
    pub rc_checksum: String,
}

impl fmt::Debug for EmergencyKitData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmergencyKitData")
            .field("user_fingerprint", &self.user_fingerprint)
            .field("muun_fingerprint", &self.muun_fingerprint)
            .field("rc_checksum", &self.rc_checksum)
            .finish_non_exhaustive()
    }
}

/// Builds [`EmergencyKitData`] from stored keys.
///
/// The encrypted user key is created on the first export and reused until the recovery code or
/// the base key changes, so kits printed in between carry the same ciphertext.
pub struct EmergencyKitDataSelector {
    storage: Arc<dyn KeyStorage>,
    lock: Mutex<()>,
}

impl fmt::Debug for EmergencyKitDataSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmergencyKitDataSelector").finish_non_exhaustive()
    }
}

impl EmergencyKitDataSelector {
    /// Creates a selector over `storage`.
    pub fn new(storage: Arc<dyn KeyStorage>) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    /// Gathers the kit. Requires the wallet keys and a recovery code to be set up.
    pub async fn get(&self) -> Result<EmergencyKitData, EmergencyKitExportError> {
        self.assemble().await.inspect_err(|e| {
            if e.is_fatal() {
                error!(error = %e, "could not encrypt the user key for the emergency kit");
            } else {
                warn!(error = %e, "could not assemble the emergency kit");
            }
        })
    }

    async fn assemble(&self) -> Result<EmergencyKitData, EmergencyKitExportError> {
        let muun_key = self.storage.muun_private_key().await?;
        let muun_fingerprint = self.storage.muun_key_fingerprint().await?;
        let user_fingerprint = self.storage.user_key_fingerprint().await?;
        let (user_key, rc_key) = self.encrypted_user_key().await?;

        Ok(EmergencyKitData {
            user_key,
            user_fingerprint,
            muun_key,
            muun_fingerprint,
            rc_checksum: rc_key.checksum(),
        })
    }

    /// The cached user key ciphertext and the recovery code key it was made for.
    ///
    /// Storage drops the cache when the recovery code rotates. A rotation racing the
    /// encryption is caught by reading the key again once the ciphertext is stored.
    async fn encrypted_user_key(
        &self,
    ) -> Result<(String, ChallengeKey), EmergencyKitExportError> {
        let _guard = self.lock.lock().await;

        // false once our own ciphertext went stale
        let mut use_cache = true;
        loop {
            let rc_key = self
                .storage
                .challenge_key(ChallengeType::RecoveryCode)
                .await?;

            if use_cache {
                match self.storage.encrypted_user_private_key().await {
                    Ok(cached) => return Ok((cached, rc_key)),
                    Err(e) if e.is_missing() => {}
                    Err(e) => return Err(e.into()),
                }
            }

            let user = self.storage.base_private_key().await?;
            let encrypted = rc_key.encrypt_key(&user, None)?;
            self.storage
                .store_encrypted_user_private_key(&encrypted)
                .await?;

            let current = self
                .storage
                .challenge_key(ChallengeType::RecoveryCode)
                .await?;
            if current == rc_key {
                info!(
                    fingerprint = %user.fingerprint(),
                    rc_checksum = %rc_key.checksum(),
                    "created emergency kit user key"
                );
                return Ok((encrypted, rc_key));
            }
            debug!("recovery code rotated while encrypting the kit user key, retrying");
            use_cache = false;
        }
    }
}
