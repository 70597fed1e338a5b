//! Collaborators the wallet core talks to but does not implement.

use async_trait::async_trait;
use wallet_crypto::{ChallengeKey, ChallengeType};
use wallet_key_deriv::{WalletPrivateKey, WalletPublicKey};
use wallet_signer::{Fulfillment, FulfillmentData, InvoiceSecret, PREIMAGE_LEN};

use crate::{
    ChallengeSetup, KeyStorageError, PublicKeySet, ServiceError, SetupChallengeResponse,
};

/// Secure storage of the wallet's keys and key metadata.
///
/// Private keys are fetched per operation and dropped when it completes; implementations must not
/// hand out long-lived references to key material.
#[async_trait]
pub trait KeyStorage: Send + Sync {
    /// The user's base private key.
    async fn base_private_key(&self) -> Result<WalletPrivateKey, KeyStorageError>;

    /// The user's base public key.
    async fn base_public_key(&self) -> Result<WalletPublicKey, KeyStorageError> {
        Ok(self.base_private_key().await?.public_key())
    }

    /// Stores the base private key and its fingerprint, and restarts address usage.
    ///
    /// Drops the cached emergency kit user key, which holds the previous base key.
    async fn store_base_private_key(&self, key: &WalletPrivateKey) -> Result<(), KeyStorageError>;

    /// The cosigner base public key.
    async fn cosigning_key(&self) -> Result<WalletPublicKey, KeyStorageError>;

    /// Stores the cosigner base public key and its fingerprint.
    async fn store_cosigning_key(&self, key: &WalletPublicKey) -> Result<(), KeyStorageError>;

    /// The swap server base public key.
    async fn swap_server_key(&self) -> Result<WalletPublicKey, KeyStorageError>;

    /// Stores the swap server base public key.
    async fn store_swap_server_key(&self, key: &WalletPublicKey) -> Result<(), KeyStorageError>;

    /// The cosigner key as encrypted by the service for the emergency kit.
    async fn muun_private_key(&self) -> Result<String, KeyStorageError>;

    /// Stores the encrypted cosigner key.
    async fn store_muun_private_key(&self, encrypted: &str) -> Result<(), KeyStorageError>;

    /// Fingerprint of the cosigner key.
    async fn muun_key_fingerprint(&self) -> Result<String, KeyStorageError>;

    /// Stores the cosigner key fingerprint.
    async fn store_muun_key_fingerprint(&self, fingerprint: &str) -> Result<(), KeyStorageError>;

    /// Fingerprint of the user key.
    async fn user_key_fingerprint(&self) -> Result<String, KeyStorageError>;

    /// The challenge key of `challenge_type`.
    async fn challenge_key(
        &self,
        challenge_type: ChallengeType,
    ) -> Result<ChallengeKey, KeyStorageError>;

    /// Stores a challenge key, replacing any previous key of the same type.
    ///
    /// Replacing the recovery code key with a different one drops the cached emergency kit user
    /// key, which only the old recovery code opens. The cache is dropped before the new key
    /// becomes visible.
    async fn store_challenge_key(&self, key: &ChallengeKey) -> Result<(), KeyStorageError>;

    /// Whether a challenge key of `challenge_type` is stored.
    async fn has_challenge_key(&self, challenge_type: ChallengeType)
        -> Result<bool, KeyStorageError>;

    /// The user key encrypted for the emergency kit.
    async fn encrypted_user_private_key(&self) -> Result<String, KeyStorageError>;

    /// Stores the user key encrypted for the emergency kit.
    async fn store_encrypted_user_private_key(
        &self,
        encrypted: &str,
    ) -> Result<(), KeyStorageError>;

    /// Highest external address index handed out, `-1` if none.
    async fn max_used_index(&self) -> Result<i64, KeyStorageError>;

    /// Raises the highest external address index handed out to `index`. Lower values are
    /// ignored.
    async fn update_max_used_index(&self, index: i64) -> Result<(), KeyStorageError>;

    /// Highest external address index the service watches, `-1` if unknown.
    async fn max_watching_index(&self) -> Result<i64, KeyStorageError>;

    /// Raises the highest external address index the service watches to `index`. Lower values
    /// are ignored.
    async fn update_max_watching_index(&self, index: i64) -> Result<(), KeyStorageError>;
}

/// The remote key coordination service.
#[async_trait]
pub trait KeyCoordinationService: Send + Sync {
    /// Registers the user's base public key and returns what the service knows.
    async fn update_public_key_set(
        &self,
        base_public_key: &WalletPublicKey,
    ) -> Result<PublicKeySet, ServiceError>;

    /// Fingerprint of the cosigner key.
    async fn fetch_muun_key_fingerprint(&self) -> Result<String, ServiceError>;

    /// Registers a challenge key.
    async fn setup_challenge(
        &self,
        setup: &ChallengeSetup,
    ) -> Result<SetupChallengeResponse, ServiceError>;
}

/// Incoming swap endpoints of the coordination service.
#[async_trait]
pub trait IncomingSwapService: Send + Sync {
    /// The unsigned claim template and cosigner signature for a swap.
    async fn fetch_fulfillment_data(&self, uuid: &str) -> Result<FulfillmentData, ServiceError>;

    /// Publishes the signed claim transaction.
    async fn push_fulfillment_transaction(
        &self,
        uuid: &str,
        raw_transaction_hex: &str,
    ) -> Result<(), ServiceError>;

    /// Settles a full-debt swap with its preimage.
    async fn fulfill(&self, uuid: &str, preimage: &[u8; PREIMAGE_LEN])
        -> Result<(), ServiceError>;

    /// Tells the service an invoice can no longer be paid.
    async fn expire_invoice(&self, payment_hash_hex: &str) -> Result<(), ServiceError>;
}

/// Local storage of invoice secrets and swap fulfillments.
#[async_trait]
pub trait InvoiceSecretStore: Send + Sync {
    /// The secret of the invoice with `payment_hash`.
    async fn invoice_secret(
        &self,
        payment_hash: &[u8; PREIMAGE_LEN],
    ) -> Result<Option<InvoiceSecret>, KeyStorageError>;

    /// Stores freshly generated secrets.
    async fn store_invoice_secrets(&self, secrets: &[InvoiceSecret])
        -> Result<(), KeyStorageError>;

    /// Records the fulfillment of the swap `uuid`.
    async fn record_fulfillment(
        &self,
        uuid: &str,
        fulfillment: &Fulfillment,
    ) -> Result<(), KeyStorageError>;

    /// The recorded fulfillment of the swap `uuid`.
    async fn fulfillment(&self, uuid: &str) -> Result<Option<Fulfillment>, KeyStorageError>;
}
