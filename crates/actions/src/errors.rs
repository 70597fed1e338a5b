//! Errors surfaced by wallet actions.
//!
//! Actions wrap storage, network and crypto failures into kinds the caller can act on. Every error
//! is `Clone` so a single in-flight result can be handed to every waiting caller.

use thiserror::Error;
use wallet_crypto::{ChallengeKeyError, ChallengeType, CryptoError, KeyCrypterError, RecoveryCodeError};
use wallet_key_deriv::DerivationError;
use wallet_service_proto::{KeyStorageError, ServiceError};
use wallet_signer::{FulfillmentError, SignError};

/// Error type for [`SyncPublicKeySetAction`](crate::SyncPublicKeySetAction).
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Local key storage failed.
    #[error(transparent)]
    Storage(#[from] KeyStorageError),

    /// The coordination service failed.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The service answered with another wallet's base key.
    #[error("service returned the key set of another wallet")]
    ForeignKeySet,
}

/// Error type for [`AddressActions`](crate::AddressActions).
#[derive(Debug, Clone, Error)]
pub enum AddressError {
    /// Local key storage failed.
    #[error(transparent)]
    Storage(#[from] KeyStorageError),

    /// An address key could not be derived.
    #[error(transparent)]
    Key(#[from] DerivationError),

    /// An address could not be built.
    #[error(transparent)]
    Address(#[from] SignError),

    /// The stored index does not fit a derivation index.
    #[error("external address index {0} is out of range")]
    IndexOutOfRange(i64),
}

/// Error type for [`ChallengeSetupAction`](crate::ChallengeSetupAction).
#[derive(Debug, Clone, Error)]
pub enum ChallengeSetupError {
    /// Local key storage failed.
    #[error(transparent)]
    Storage(#[from] KeyStorageError),

    /// The coordination service rejected the setup.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The challenge key could not be derived.
    #[error(transparent)]
    Challenge(#[from] ChallengeKeyError),

    /// The user input is not a valid recovery code.
    #[error(transparent)]
    RecoveryCode(#[from] RecoveryCodeError),

    /// The base key could not be encrypted.
    #[error(transparent)]
    Crypter(#[from] KeyCrypterError),

    /// Generating the salt failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Challenges of this type are not set up from user input.
    #[error("{0:?} challenges cannot be set up from user input")]
    Unsupported(ChallengeType),
}

impl ChallengeSetupError {
    /// Whether this error indicates a broken environment rather than bad input.
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Challenge(e) => e.is_fatal(),
            Self::Crypter(e) => e.is_fatal(),
            Self::Crypto(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Error type for [`EmergencyKitDataSelector`](crate::EmergencyKitDataSelector).
///
/// Lower-layer failures are flattened to text so keychain and crypto details never reach the
/// export screen.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmergencyKitExportError {
    /// A key the kit needs has not been set up yet.
    #[error("emergency kit needs {0}, which is not set up")]
    NotSetUp(String),

    /// Reading or writing key storage failed.
    #[error("emergency kit export failed: {0}")]
    Storage(String),

    /// Encrypting the user key failed.
    #[error("emergency kit encryption failed: {reason}")]
    Encryption {
        /// Description of the failure.
        reason: String,

        /// Whether the failure indicates a broken environment.
        fatal: bool,
    },
}

impl EmergencyKitExportError {
    /// Whether this error indicates a broken environment rather than missing setup.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Encryption { fatal: true, .. })
    }
}

impl From<KeyStorageError> for EmergencyKitExportError {
    fn from(e: KeyStorageError) -> Self {
        match e {
            KeyStorageError::MissingKey(what) => Self::NotSetUp(what),
            KeyStorageError::Storage(reason) => Self::Storage(reason),
        }
    }
}

impl From<ChallengeKeyError> for EmergencyKitExportError {
    fn from(e: ChallengeKeyError) -> Self {
        Self::Encryption {
            fatal: e.is_fatal(),
            reason: e.to_string(),
        }
    }
}

/// Error type for [`FulfillIncomingSwapAction`](crate::FulfillIncomingSwapAction).
#[derive(Debug, Clone, Error)]
pub enum FulfillActionError {
    /// No invoice secret matches the swap. The invoice was expired.
    #[error("no invoice secret for payment hash {0}")]
    UnknownInvoice(String),

    /// The swap failed verification. The invoice was expired.
    #[error("incoming swap is not fulfillable: {0}")]
    Unfulfillable(FulfillmentError),

    /// Signing the claim failed.
    #[error(transparent)]
    Fulfillment(#[from] FulfillmentError),

    /// Local storage failed.
    #[error(transparent)]
    Storage(#[from] KeyStorageError),

    /// The coordination service failed.
    #[error(transparent)]
    Service(#[from] ServiceError),
}
