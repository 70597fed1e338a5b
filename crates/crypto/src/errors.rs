//! Error types for the wallet's cryptographic operations.
//!
//! Every error distinguishes between conditions the user can fix (a wrong passphrase, a
//! mistyped recovery code) and environment faults that must not be retried. The latter report
//! `true` from their `is_fatal` method.

use thiserror::Error;
use wallet_key_deriv::DerivationError;

use crate::challenge::ChallengeType;

/// Failures of the primitive operations behind [`CryptoProvider`](crate::CryptoProvider).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The secure random number generator failed.
    #[error("secure randomness unavailable: {0}")]
    EntropyUnavailable(String),

    /// Key-stretching parameters were rejected.
    #[error("invalid key derivation parameters: {0}")]
    InvalidKdfParams(String),

    /// HKDF could not expand the requested output.
    #[error("key expansion failed: {0}")]
    KeyExpansion(String),

    /// Authenticated encryption of valid input failed.
    #[error("encryption failed: {0}")]
    Seal(String),

    /// The ciphertext did not authenticate under the given key.
    #[error("ciphertext authentication failed")]
    Open,
}

impl CryptoError {
    /// Whether this error indicates a broken environment rather than bad input.
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// Errors raised when parsing a recovery code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecoveryCodeError {
    /// The code does not have exactly eight segments.
    #[error("recovery code must have 8 segments, found {0}")]
    SegmentCount(usize),

    /// A segment does not have exactly four characters.
    #[error("recovery code segment {index} has {length} characters, expected 4")]
    SegmentLength {
        /// Position of the offending segment.
        index: usize,

        /// Its length in characters.
        length: usize,
    },

    /// A segment contains characters outside the alphabet.
    #[error("recovery code segment {0} contains invalid characters")]
    InvalidCharacters(usize),

    /// The code announces a version this wallet does not know.
    #[error("unsupported recovery code version {0}")]
    UnsupportedVersion(u32),

    /// Generating a random code failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Errors raised by passphrase-based key encryption.
#[derive(Debug, Clone, Error)]
pub enum KeyCrypterError {
    /// The passphrase does not open the ciphertext.
    #[error("wrong passphrase or corrupted ciphertext")]
    WrongPassphrase,

    /// The payload is not in the expected format.
    #[error("malformed encrypted key: {0}")]
    Malformed(String),

    /// The payload was produced by an unknown format version.
    #[error("unsupported encrypted key version: {0}")]
    UnsupportedVersion(String),

    /// The decrypted key could not be loaded.
    #[error("decrypted key is invalid: {0}")]
    Key(#[from] DerivationError),

    /// A primitive failed while encrypting.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl KeyCrypterError {
    /// Whether this error indicates a broken environment rather than bad input.
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Crypto(e) => e.is_fatal(),
            Self::Key(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Errors raised by challenge keys and challenge-key encryption.
#[derive(Debug, Clone, Error)]
pub enum ChallengeKeyError {
    /// The salt does not match what the type and version require.
    #[error("{challenge_type:?} challenge key version {version} has an unexpected salt")]
    SaltMismatch {
        /// Challenge type.
        challenge_type: ChallengeType,

        /// Challenge version.
        version: u32,
    },

    /// This challenge type is not derived from a secret.
    #[error("{0:?} challenge keys are not derived from a secret")]
    NotDerivable(ChallengeType),

    /// The secret derives a different key than the one on record.
    #[error("secret does not match the challenge key on record")]
    SecretMismatch,

    /// Key stretching produced an invalid scalar.
    #[error("derived challenge key is not a valid secp256k1 scalar")]
    InvalidDerivedKey,

    /// The challenge public key bytes are not a valid point.
    #[error("invalid challenge public key")]
    InvalidPublicKey,

    /// The encrypted key payload is not in the expected format.
    #[error("malformed encrypted key payload: {0}")]
    MalformedPayload(String),

    /// The encrypted key payload was produced by an unknown format version.
    #[error("unsupported encrypted key payload version {0}")]
    UnsupportedPayloadVersion(u8),

    /// The payload does not open with this challenge key.
    #[error("encrypted key does not open with this challenge key")]
    DecryptionFailed,

    /// The recovery code is invalid.
    #[error(transparent)]
    RecoveryCode(#[from] RecoveryCodeError),

    /// A wallet key could not be loaded.
    #[error(transparent)]
    Key(#[from] DerivationError),

    /// A primitive failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl ChallengeKeyError {
    /// Whether this error indicates a broken environment rather than bad input.
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Crypto(e) => e.is_fatal(),
            Self::Key(e) => e.is_fatal(),
            Self::RecoveryCode(RecoveryCodeError::Crypto(e)) => e.is_fatal(),
            _ => false,
        }
    }
}
