//! Key coordination records, as used inside the wallet.
//!
//! Wire representations live in [`crate::wire`]; these types are always valid.

use secp256k1::PublicKey;
use wallet_crypto::{ChallengeKey, ChallengeType};
use wallet_key_deriv::WalletPublicKey;

/// Keys handed out by the service when a session is created or recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySet {
    /// The user's base key, encrypted with a challenge passphrase.
    pub encrypted_private_key: String,

    /// The cosigner key, encrypted for the emergency kit.
    pub muun_key: Option<String>,

    /// Fingerprint of the cosigner key.
    pub muun_key_fingerprint: Option<String>,

    /// Challenge keys registered for the user.
    pub challenge_keys: Vec<ChallengeKey>,
}

impl KeySet {
    /// The registered challenge key of `challenge_type`, if any.
    pub fn challenge_key(&self, challenge_type: ChallengeType) -> Option<&ChallengeKey> {
        self.challenge_keys
            .iter()
            .find(|key| key.challenge_type() == challenge_type)
    }
}

/// How far the wallet and the service have gone into the external address chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalAddressesRecord {
    /// Highest index handed out. `-1` before the first address.
    pub max_used_index: i64,

    /// Highest index the service watches, once known.
    pub max_watching_index: Option<i64>,
}

impl ExternalAddressesRecord {
    /// A record with nothing used or watched.
    pub const fn new() -> Self {
        Self {
            max_used_index: -1,
            max_watching_index: None,
        }
    }

    /// Folds `other` in. Indexes only move forward.
    pub fn merge(&mut self, other: &Self) {
        self.max_used_index = self.max_used_index.max(other.max_used_index);
        self.max_watching_index = match (self.max_watching_index, other.max_watching_index) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    /// Whether the used index stays within the watched range, when both are known.
    pub fn is_consistent(&self) -> bool {
        self.max_watching_index
            .map_or(true, |watching| self.max_used_index <= watching)
    }
}

impl Default for ExternalAddressesRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// The public keys of the wallet, filled in as coordination progresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeySet {
    /// The user's base public key.
    pub base_public_key: WalletPublicKey,

    /// The cosigner base key, known once the wallet is created.
    pub base_cosigning_public_key: Option<WalletPublicKey>,

    /// The swap server base key, known after the first migration.
    pub base_swap_server_public_key: Option<WalletPublicKey>,

    /// External address indexes.
    pub external_addresses: Option<ExternalAddressesRecord>,
}

impl PublicKeySet {
    /// A set with only the user key.
    pub const fn new(base_public_key: WalletPublicKey) -> Self {
        Self {
            base_public_key,
            base_cosigning_public_key: None,
            base_swap_server_public_key: None,
            external_addresses: None,
        }
    }

    /// Folds a newer set in. Known keys are kept, missing ones are filled and indexes only move
    /// forward.
    pub fn merge(&mut self, newer: &Self) {
        if self.base_cosigning_public_key.is_none() {
            self.base_cosigning_public_key = newer.base_cosigning_public_key.clone();
        }
        if self.base_swap_server_public_key.is_none() {
            self.base_swap_server_public_key = newer.base_swap_server_public_key.clone();
        }
        match (&mut self.external_addresses, &newer.external_addresses) {
            (Some(ours), Some(theirs)) => ours.merge(theirs),
            (ours @ None, theirs) => *ours = *theirs,
            (Some(_), None) => {}
        }
    }
}

/// Registration of a new challenge key with the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeSetup {
    /// The secret the key is bound to.
    pub challenge_type: ChallengeType,

    /// The challenge public key.
    pub public_key: PublicKey,

    /// The derivation salt. Saltless types still send one for compatibility.
    pub salt: Vec<u8>,

    /// The user's base key encrypted with the same secret.
    pub encrypted_private_key: String,

    /// Derivation version of the challenge key.
    pub version: u32,
}

/// The service's answer to a [`ChallengeSetup`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetupChallengeResponse {
    /// The cosigner key encrypted for the emergency kit, when the service issues one.
    pub muun_key: Option<String>,

    /// Its fingerprint.
    pub muun_key_fingerprint: Option<String>,
}

#[cfg(test)]
mod tests {
    use bitcoin::Network;
    use proptest::prelude::*;
    use wallet_key_deriv::WalletPrivateKey;

    use super::*;

    fn key(seed: u8) -> WalletPublicKey {
        WalletPrivateKey::from_seed(&[seed; 32], Network::Regtest)
            .unwrap()
            .public_key()
    }

    #[test]
    fn merging_fills_but_never_clears() {
        let mut set = PublicKeySet::new(key(1));
        let mut update = PublicKeySet::new(key(1));
        update.base_cosigning_public_key = Some(key(2));
        update.external_addresses = Some(ExternalAddressesRecord {
            max_used_index: 4,
            max_watching_index: Some(19),
        });

        set.merge(&update);
        assert_eq!(set.base_cosigning_public_key, Some(key(2)));
        assert_eq!(set.external_addresses.unwrap().max_used_index, 4);

        let mut later = PublicKeySet::new(key(1));
        later.base_swap_server_public_key = Some(key(3));
        later.base_cosigning_public_key = Some(key(9));
        set.merge(&later);
        assert_eq!(set.base_cosigning_public_key, Some(key(2)));
        assert_eq!(set.base_swap_server_public_key, Some(key(3)));
        assert!(set.external_addresses.is_some());
    }

    proptest! {
        #[test]
        fn used_index_never_decreases(
            start in -1i64..1_000,
            updates in proptest::collection::vec((-1i64..1_000, proptest::option::of(0i64..2_000)), 0..10),
        ) {
            let mut record = ExternalAddressesRecord { max_used_index: start, max_watching_index: None };
            let mut previous = record;
            for (used, watching) in updates {
                record.merge(&ExternalAddressesRecord { max_used_index: used, max_watching_index: watching });
                prop_assert!(record.max_used_index >= previous.max_used_index);
                prop_assert!(record.max_watching_index >= previous.max_watching_index);
                previous = record;
            }
        }
    }
}
