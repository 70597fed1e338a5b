//! JSON representations exchanged with the coordination service and kept in storage.
//!
//! Fields added over time are optional on the wire. Their defaults live in [`defaults`] and are
//! applied only here; the models in [`crate::models`] never see a missing field.

use std::str::FromStr;

use bitcoin::Network;
use serde::{Deserialize, Serialize};
use tracing::warn;
use wallet_crypto::{ChallengeKey, ChallengeType};
use wallet_key_deriv::WalletPublicKey;
use wallet_primitives::NamedPath;
use wallet_signer::{AddressVersion, FulfillmentData};

use crate::{
    ChallengeSetup, ExternalAddressesRecord, KeySet, PublicKeySet, ServiceError,
    SetupChallengeResponse,
};

/// Values assumed for fields older payloads do not carry.
mod defaults {
    /// Challenge keys registered before versioning existed.
    pub(super) const fn challenge_version() -> u32 {
        0
    }
}

fn codable(what: &str, e: impl std::fmt::Display) -> ServiceError {
    warn!(%what, error = %e, "rejecting service payload");
    ServiceError::Codable(format!("{what}: {e}"))
}

/// A challenge key on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeKeyJson {
    /// Challenge type.
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,

    /// Hex public key.
    pub public_key: String,

    /// Hex salt.
    #[serde(default)]
    pub salt: Option<String>,

    /// Derivation version.
    #[serde(default = "defaults::challenge_version")]
    pub challenge_version: u32,
}

impl ChallengeKeyJson {
    /// Validates into a [`ChallengeKey`].
    pub fn into_model(self) -> Result<ChallengeKey, ServiceError> {
        let public_key = hex::decode(&self.public_key).map_err(|e| codable("publicKey", e))?;
        let salt = self
            .salt
            .map(hex::decode)
            .transpose()
            .map_err(|e| codable("salt", e))?;

        ChallengeKey::from_public_key_bytes(
            self.challenge_type,
            &public_key,
            salt,
            self.challenge_version,
        )
        .map_err(|e| codable("challengeKey", e))
    }
}

impl From<&ChallengeKey> for ChallengeKeyJson {
    fn from(key: &ChallengeKey) -> Self {
        Self {
            challenge_type: key.challenge_type(),
            public_key: hex::encode(key.public_key().serialize()),
            salt: key.salt().map(hex::encode),
            challenge_version: key.version(),
        }
    }
}

/// A key set on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySetJson {
    /// Encrypted base key.
    pub encrypted_private_key: String,

    /// Encrypted cosigner key.
    #[serde(default)]
    pub muun_key: Option<String>,

    /// Cosigner key fingerprint.
    #[serde(default)]
    pub muun_key_fingerprint: Option<String>,

    /// Registered challenge keys.
    #[serde(default)]
    pub challenge_keys: Vec<ChallengeKeyJson>,
}

impl KeySetJson {
    /// Validates into a [`KeySet`].
    pub fn into_model(self) -> Result<KeySet, ServiceError> {
        if self.encrypted_private_key.is_empty() {
            return Err(codable("encryptedPrivateKey", "empty"));
        }

        Ok(KeySet {
            encrypted_private_key: self.encrypted_private_key,
            muun_key: self.muun_key,
            muun_key_fingerprint: self.muun_key_fingerprint,
            challenge_keys: self
                .challenge_keys
                .into_iter()
                .map(ChallengeKeyJson::into_model)
                .collect::<Result<_, _>>()?,
        })
    }
}

impl From<&KeySet> for KeySetJson {
    fn from(set: &KeySet) -> Self {
        Self {
            encrypted_private_key: set.encrypted_private_key.clone(),
            muun_key: set.muun_key.clone(),
            muun_key_fingerprint: set.muun_key_fingerprint.clone(),
            challenge_keys: set.challenge_keys.iter().map(Into::into).collect(),
        }
    }
}

/// An extended public key with its path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyJson {
    /// Base58 extended key.
    pub key: String,

    /// Named derivation path.
    pub path: String,
}

impl PublicKeyJson {
    /// Parses the key, checking it belongs to `network`.
    pub fn into_model(self, network: Network) -> Result<WalletPublicKey, ServiceError> {
        let path = NamedPath::from_str(&self.path).map_err(|e| codable("path", e))?;
        WalletPublicKey::from_base58(&self.key, path, network).map_err(|e| codable("key", e))
    }
}

impl From<&WalletPublicKey> for PublicKeyJson {
    fn from(key: &WalletPublicKey) -> Self {
        Self {
            key: key.to_base58(),
            path: key.path().to_string(),
        }
    }
}

/// External address indexes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAddressesRecordJson {
    /// Highest used index.
    pub max_used_index: i64,

    /// Highest watched index.
    #[serde(default)]
    pub max_watching_index: Option<i64>,
}

impl ExternalAddressesRecordJson {
    /// Validates into an [`ExternalAddressesRecord`].
    pub fn into_model(self) -> Result<ExternalAddressesRecord, ServiceError> {
        let record = ExternalAddressesRecord {
            max_used_index: self.max_used_index,
            max_watching_index: self.max_watching_index,
        };
        if record.max_used_index < -1 || !record.is_consistent() {
            return Err(codable(
                "externalPublicKeyIndices",
                format!("{record:?} is inconsistent"),
            ));
        }
        Ok(record)
    }
}

impl From<&ExternalAddressesRecord> for ExternalAddressesRecordJson {
    fn from(record: &ExternalAddressesRecord) -> Self {
        Self {
            max_used_index: record.max_used_index,
            max_watching_index: record.max_watching_index,
        }
    }
}

/// A public key set on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeySetJson {
    /// User base key.
    pub base_public_key: PublicKeyJson,

    /// Cosigner base key.
    #[serde(default)]
    pub base_cosigning_public_key: Option<PublicKeyJson>,

    /// Swap server base key.
    #[serde(default)]
    pub base_swap_server_public_key: Option<PublicKeyJson>,

    /// External address indexes.
    #[serde(default)]
    pub external_public_key_indices: Option<ExternalAddressesRecordJson>,
}

impl PublicKeySetJson {
    /// Validates into a [`PublicKeySet`] for `network`.
    pub fn into_model(self, network: Network) -> Result<PublicKeySet, ServiceError> {
        Ok(PublicKeySet {
            base_public_key: self.base_public_key.into_model(network)?,
            base_cosigning_public_key: self
                .base_cosigning_public_key
                .map(|key| key.into_model(network))
                .transpose()?,
            base_swap_server_public_key: self
                .base_swap_server_public_key
                .map(|key| key.into_model(network))
                .transpose()?,
            external_addresses: self
                .external_public_key_indices
                .map(ExternalAddressesRecordJson::into_model)
                .transpose()?,
        })
    }
}

impl From<&PublicKeySet> for PublicKeySetJson {
    fn from(set: &PublicKeySet) -> Self {
        Self {
            base_public_key: (&set.base_public_key).into(),
            base_cosigning_public_key: set.base_cosigning_public_key.as_ref().map(Into::into),
            base_swap_server_public_key: set.base_swap_server_public_key.as_ref().map(Into::into),
            external_public_key_indices: set.external_addresses.as_ref().map(Into::into),
        }
    }
}

/// A challenge setup on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeSetupJson {
    /// Challenge type.
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,

    /// Hex challenge public key.
    pub password_secret_public_key: String,

    /// Hex salt.
    pub password_secret_salt: String,

    /// Encrypted base key.
    pub encrypted_private_key: String,

    /// Challenge version.
    pub version: u32,
}

impl From<&ChallengeSetup> for ChallengeSetupJson {
    fn from(setup: &ChallengeSetup) -> Self {
        Self {
            challenge_type: setup.challenge_type,
            password_secret_public_key: hex::encode(setup.public_key.serialize()),
            password_secret_salt: hex::encode(&setup.salt),
            encrypted_private_key: setup.encrypted_private_key.clone(),
            version: setup.version,
        }
    }
}

/// The service's answer to a challenge setup.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupChallengeResponseJson {
    /// Encrypted cosigner key.
    #[serde(default)]
    pub muun_key: Option<String>,

    /// Cosigner key fingerprint.
    #[serde(default)]
    pub muun_key_fingerprint: Option<String>,
}

impl From<SetupChallengeResponseJson> for SetupChallengeResponse {
    fn from(json: SetupChallengeResponseJson) -> Self {
        Self {
            muun_key: json.muun_key,
            muun_key_fingerprint: json.muun_key_fingerprint,
        }
    }
}

/// Incoming swap fulfillment data on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentDataJson {
    /// Hex claim template.
    pub fulfillment_tx: String,

    /// Hex cosigner signature.
    pub muun_signature: String,

    /// Named path of the destination address.
    pub output_path: String,

    /// Version of the destination address.
    pub output_version: u8,
}

impl FulfillmentDataJson {
    /// Validates into [`FulfillmentData`].
    pub fn into_model(self) -> Result<FulfillmentData, ServiceError> {
        Ok(FulfillmentData {
            fulfillment_tx_hex: self.fulfillment_tx,
            muun_signature: hex::decode(&self.muun_signature)
                .map_err(|e| codable("muunSignature", e))?,
            output_path: NamedPath::from_str(&self.output_path)
                .map_err(|e| codable("outputPath", e))?,
            output_version: AddressVersion::try_from(self.output_version)
                .map_err(|e| codable("outputVersion", e))?,
        })
    }
}
