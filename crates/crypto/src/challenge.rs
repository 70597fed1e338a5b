//! Challenge keys.
//!
//! A challenge key is a secp256k1 key pair derived from something only the user knows: their
//! password or their recovery code. The public half is registered with the coordination service
//! and used to encrypt the wallet key for backups; the private half is re-derived whenever the
//! user proves knowledge of the secret, to sign authentication challenges or to decrypt those
//! backups.
//!
//! The challenge version selects the derivation algorithm:
//!
//! | type | version | salt | scrypt cost |
//! |------|---------|------|-------------|
//! | `PASSWORD` | any | 8 random bytes | `log_n = 9` |
//! | `RECOVERY_CODE` | < 2 | 8 random bytes | `log_n = 9` |
//! | `RECOVERY_CODE` | ≥ 2 | none | `log_n = 14`, fixed domain salt |
//! | `USER_KEY` | 1 | none | not derived, the base key itself |

use std::fmt;

use bitcoin::{
    hashes::{sha256, Hash},
    secp256k1::{ecdsa::Signature, Message, PublicKey, SecretKey},
};
use secp256k1::SECP256K1;
use serde::{Deserialize, Serialize};
use wallet_key_deriv::WalletPrivateKey;
use zeroize::Zeroize;

use crate::{
    ChallengeKeyError, CryptoProvider, NativeCryptoProvider, RecoveryCode, ScryptCost,
};

/// Length of random challenge salts.
pub const CHALLENGE_SALT_LEN: usize = 8;

/// Salt used for saltless recovery code derivation.
const RECOVERY_CODE_V2_SALT: &[u8] = b"wallet:recovery-code:v2";

/// The secret a challenge key is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeType {
    /// The user's password.
    Password,

    /// The user's recovery code.
    RecoveryCode,

    /// The user's base key, for wallets without any other secret.
    UserKey,
}

impl ChallengeType {
    /// The version new challenge keys of this type are created with.
    pub const fn version(self) -> u32 {
        match self {
            Self::Password | Self::UserKey => 1,
            Self::RecoveryCode => 2,
        }
    }

    /// Whether a key of this type and version carries a salt.
    pub const fn requires_salt(self, version: u32) -> bool {
        match self {
            Self::Password => true,
            Self::RecoveryCode => version < 2,
            Self::UserKey => false,
        }
    }

    fn check_salt(self, version: u32, has_salt: bool) -> Result<(), ChallengeKeyError> {
        if self.requires_salt(version) != has_salt {
            return Err(ChallengeKeyError::SaltMismatch {
                challenge_type: self,
                version,
            });
        }
        Ok(())
    }
}

/// The public half of a challenge, as registered with the coordination service.
#[derive(Clone, PartialEq, Eq)]
pub struct ChallengeKey {
    challenge_type: ChallengeType,
    public_key: PublicKey,
    salt: Option<Vec<u8>>,
    version: u32,
}

impl ChallengeKey {
    /// Builds a challenge key, enforcing that the salt matches the type and version.
    pub fn new(
        challenge_type: ChallengeType,
        public_key: PublicKey,
        salt: Option<Vec<u8>>,
        version: u32,
    ) -> Result<Self, ChallengeKeyError> {
        challenge_type.check_salt(version, salt.is_some())?;
        Ok(Self {
            challenge_type,
            public_key,
            salt,
            version,
        })
    }

    /// Builds a challenge key from a serialized public key.
    pub fn from_public_key_bytes(
        challenge_type: ChallengeType,
        public_key: &[u8],
        salt: Option<Vec<u8>>,
        version: u32,
    ) -> Result<Self, ChallengeKeyError> {
        let public_key =
            PublicKey::from_slice(public_key).map_err(|_| ChallengeKeyError::InvalidPublicKey)?;
        Self::new(challenge_type, public_key, salt, version)
    }

    /// The secret this key is bound to.
    pub const fn challenge_type(&self) -> ChallengeType {
        self.challenge_type
    }

    /// The challenge public key.
    pub const fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The derivation salt, absent for saltless types and versions.
    pub fn salt(&self) -> Option<&[u8]> {
        self.salt.as_deref()
    }

    /// The derivation version.
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// A short digest of the public key the user can compare against a printed kit.
    pub fn checksum(&self) -> String {
        let digest = sha256::Hash::hash(&self.public_key.serialize());
        let hex = hex::encode(digest.to_byte_array());
        hex[hex.len() - 8..].to_string()
    }

    /// Re-derives the private half from `secret`, checking it matches this key.
    ///
    /// A mismatch means the user typed the wrong secret.
    pub fn derive_private(&self, secret: &str) -> Result<ChallengePrivateKey, ChallengeKeyError> {
        self.derive_private_with(&NativeCryptoProvider, secret)
    }

    /// Like [`Self::derive_private`], using `provider` for key stretching.
    pub fn derive_private_with<P: CryptoProvider>(
        &self,
        provider: &P,
        secret: &str,
    ) -> Result<ChallengePrivateKey, ChallengeKeyError> {
        let private = ChallengePrivateKey::derive_with(
            provider,
            self.challenge_type,
            secret,
            self.salt.as_deref(),
            self.version,
        )?;

        if private.public_key() != self.public_key {
            return Err(ChallengeKeyError::SecretMismatch);
        }

        Ok(private)
    }

    /// Checks a signature produced by [`ChallengePrivateKey::sign_challenge`].
    pub fn verify_challenge_signature(&self, challenge: &[u8], signature: &Signature) -> bool {
        SECP256K1
            .verify_ecdsa(&challenge_message(challenge), signature, &self.public_key)
            .is_ok()
    }
}

impl fmt::Debug for ChallengeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeKey")
            .field("type", &self.challenge_type)
            .field("public_key", &self.public_key)
            .field("salt", &self.salt.as_ref().map(hex::encode))
            .field("version", &self.version)
            .finish()
    }
}

/// The private half of a challenge. Only lives for the duration of one operation.
#[derive(Clone)]
pub struct ChallengePrivateKey {
    secret_key: SecretKey,
    challenge_type: ChallengeType,
    salt: Option<Vec<u8>>,
    version: u32,
}

impl ChallengePrivateKey {
    /// Derives a challenge key from a secret with the native provider.
    pub fn derive(
        challenge_type: ChallengeType,
        secret: &str,
        salt: Option<&[u8]>,
        version: u32,
    ) -> Result<Self, ChallengeKeyError> {
        Self::derive_with(&NativeCryptoProvider, challenge_type, secret, salt, version)
    }

    /// Derives a challenge key from a secret.
    pub fn derive_with<P: CryptoProvider>(
        provider: &P,
        challenge_type: ChallengeType,
        secret: &str,
        salt: Option<&[u8]>,
        version: u32,
    ) -> Result<Self, ChallengeKeyError> {
        if challenge_type == ChallengeType::UserKey {
            return Err(ChallengeKeyError::NotDerivable(challenge_type));
        }
        challenge_type.check_salt(version, salt.is_some())?;

        let (kdf_salt, cost) = match salt {
            Some(salt) => (salt, ScryptCost::CHALLENGE_V1),
            None => (RECOVERY_CODE_V2_SALT, ScryptCost::CHALLENGE_V2),
        };

        let mut stretched = provider.scrypt(secret.as_bytes(), kdf_salt, cost)?;
        let secret_key = SecretKey::from_slice(&stretched);
        stretched.zeroize();

        Ok(Self {
            secret_key: secret_key.map_err(|_| ChallengeKeyError::InvalidDerivedKey)?,
            challenge_type,
            salt: salt.map(<[u8]>::to_vec),
            version,
        })
    }

    /// Derives a password challenge key. Passwords are always salted.
    pub fn from_password(password: &str, salt: &[u8]) -> Result<Self, ChallengeKeyError> {
        let challenge_type = ChallengeType::Password;
        Self::derive(challenge_type, password, Some(salt), challenge_type.version())
    }

    /// Derives a recovery code challenge key at the code's own version.
    ///
    /// Legacy codes need the salt recorded when they were set up; current codes take none.
    pub fn from_recovery_code(
        code: &RecoveryCode,
        salt: Option<&[u8]>,
    ) -> Result<Self, ChallengeKeyError> {
        Self::from_recovery_code_with(&NativeCryptoProvider, code, salt)
    }

    /// Like [`Self::from_recovery_code`], using `provider` for key stretching.
    pub fn from_recovery_code_with<P: CryptoProvider>(
        provider: &P,
        code: &RecoveryCode,
        salt: Option<&[u8]>,
    ) -> Result<Self, ChallengeKeyError> {
        let mut text = code.to_string();
        let key = Self::derive_with(
            provider,
            ChallengeType::RecoveryCode,
            &text,
            salt,
            code.version(),
        );
        text.zeroize();
        key
    }

    /// Uses the wallet's base key as the challenge key.
    pub fn from_user_key(key: &WalletPrivateKey) -> Self {
        let challenge_type = ChallengeType::UserKey;
        Self {
            secret_key: key.secret_key(),
            challenge_type,
            salt: None,
            version: challenge_type.version(),
        }
    }

    /// The challenge public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_secret_key(SECP256K1, &self.secret_key)
    }

    /// The private scalar.
    pub const fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    /// The type of this challenge.
    pub const fn challenge_type(&self) -> ChallengeType {
        self.challenge_type
    }

    /// The public record for this key.
    pub fn challenge_key(&self) -> ChallengeKey {
        ChallengeKey {
            challenge_type: self.challenge_type,
            public_key: self.public_key(),
            salt: self.salt.clone(),
            version: self.version,
        }
    }

    /// Signs an authentication challenge issued by the coordination service.
    pub fn sign_challenge(&self, challenge: &[u8]) -> Signature {
        SECP256K1.sign_ecdsa(&challenge_message(challenge), &self.secret_key)
    }
}

impl fmt::Debug for ChallengePrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengePrivateKey")
            .field("type", &self.challenge_type)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl Drop for ChallengePrivateKey {
    fn drop(&mut self) {
        self.secret_key.non_secure_erase();
    }
}

fn challenge_message(challenge: &[u8]) -> Message {
    Message::from_digest(sha256::Hash::hash(challenge).to_byte_array())
}

#[cfg(test)]
mod tests {
    use bitcoin::Network;
    use proptest::prelude::*;

    use super::*;

    const SALT: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

    #[test]
    fn versions_per_type() {
        assert_eq!(ChallengeType::Password.version(), 1);
        assert_eq!(ChallengeType::UserKey.version(), 1);
        assert_eq!(ChallengeType::RecoveryCode.version(), 2);
    }

    #[test]
    fn password_keys_are_salted_and_deterministic() {
        let a = ChallengePrivateKey::from_password("hunter22", &SALT).unwrap();
        let b = ChallengePrivateKey::from_password("hunter22", &SALT).unwrap();
        let c = ChallengePrivateKey::from_password("hunter22", &[9u8; 8]).unwrap();
        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), c.public_key());

        let record = a.challenge_key();
        assert_eq!(record.salt(), Some(&SALT[..]));
        assert_eq!(record.version(), 1);
    }

    #[test]
    fn current_recovery_codes_are_saltless() {
        let code = RecoveryCode::random().unwrap();
        let key = ChallengePrivateKey::from_recovery_code(&code, None).unwrap();
        let record = key.challenge_key();
        assert_eq!(record.salt(), None);
        assert_eq!(record.version(), 2);

        assert!(matches!(
            ChallengePrivateKey::from_recovery_code(&code, Some(&SALT)),
            Err(ChallengeKeyError::SaltMismatch { .. })
        ));
    }

    #[test]
    fn legacy_recovery_codes_need_salt() {
        let code = RecoveryCode::parse("ABCD-EFHJ-KMNP-QRST-UVWX-YZ23-4578-9ABC").unwrap();
        assert!(matches!(
            ChallengePrivateKey::from_recovery_code(&code, None),
            Err(ChallengeKeyError::SaltMismatch { .. })
        ));

        let key = ChallengePrivateKey::from_recovery_code(&code, Some(&SALT)).unwrap();
        assert_eq!(key.challenge_key().version(), 1);
    }

    #[test]
    fn user_keys_are_not_derived_from_secrets() {
        assert!(matches!(
            ChallengePrivateKey::derive(ChallengeType::UserKey, "x", None, 1),
            Err(ChallengeKeyError::NotDerivable(ChallengeType::UserKey))
        ));

        let base = WalletPrivateKey::from_seed(&[3u8; 32], Network::Regtest).unwrap();
        let key = ChallengePrivateKey::from_user_key(&base);
        assert_eq!(key.public_key(), base.public_key().public_key());
        assert_eq!(key.challenge_key().salt(), None);
    }

    #[test]
    fn derive_private_detects_wrong_secret() {
        let record = ChallengePrivateKey::from_password("right", &SALT)
            .unwrap()
            .challenge_key();

        assert!(record.derive_private("right").is_ok());
        assert!(matches!(
            record.derive_private("wrong"),
            Err(ChallengeKeyError::SecretMismatch)
        ));
    }

    #[test]
    fn signs_and_verifies_challenges() {
        let key = ChallengePrivateKey::from_password("pw", &SALT).unwrap();
        let record = key.challenge_key();

        let signature = key.sign_challenge(b"challenge-42");
        assert!(record.verify_challenge_signature(b"challenge-42", &signature));
        assert!(!record.verify_challenge_signature(b"challenge-43", &signature));
    }

    #[test]
    fn checksum_is_short_hex() {
        let record = ChallengePrivateKey::from_password("pw", &SALT)
            .unwrap()
            .challenge_key();
        let checksum = record.checksum();
        assert_eq!(checksum.len(), 8);
        assert!(checksum.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(checksum, record.checksum());
    }

    #[test]
    fn rejects_invalid_public_key_bytes() {
        assert!(matches!(
            ChallengeKey::from_public_key_bytes(ChallengeType::UserKey, &[0u8; 33], None, 1),
            Err(ChallengeKeyError::InvalidPublicKey)
        ));
    }

    fn challenge_type_strategy() -> impl Strategy<Value = ChallengeType> {
        prop_oneof![
            Just(ChallengeType::Password),
            Just(ChallengeType::RecoveryCode),
            Just(ChallengeType::UserKey),
        ]
    }

    proptest! {
        #[test]
        fn salt_presence_follows_type_and_version(
            challenge_type in challenge_type_strategy(),
            version in 0u32..5,
            with_salt in any::<bool>(),
        ) {
            let public_key = PublicKey::from_secret_key(
                SECP256K1,
                &SecretKey::from_slice(&[5u8; 32]).unwrap(),
            );
            let salt = with_salt.then(|| SALT.to_vec());
            let built = ChallengeKey::new(challenge_type, public_key, salt, version);

            let saltless = challenge_type == ChallengeType::UserKey
                || (challenge_type == ChallengeType::RecoveryCode && version >= 2);

            match built {
                Ok(key) => prop_assert_eq!(key.salt().is_none(), saltless),
                Err(ChallengeKeyError::SaltMismatch { .. }) => prop_assert_eq!(with_salt, saltless),
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
        }
    }
}
