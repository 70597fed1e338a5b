//! Errors raised while creating, parsing or deriving wallet keys.

use bitcoin::{bip32, NetworkKind};
use thiserror::Error;
use wallet_primitives::PathError;

/// Error type for key derivation operations.
#[derive(Debug, Clone, Error)]
pub enum DerivationError {
    /// BIP32 derivation or decoding failed.
    #[error("BIP32 derivation error: {0}")]
    Bip32(#[from] bip32::Error),

    /// The derivation path is malformed.
    #[error("malformed derivation path: {0}")]
    Path(#[from] PathError),

    /// A hardened child was requested from a public key.
    #[error("cannot derive hardened child from public key at {0}")]
    HardenedFromPublic(String),

    /// The requested path does not descend from the key's own path.
    #[error("path {to} does not descend from key path {from}")]
    NotDescendant {
        /// Path of the key being derived from.
        from: String,

        /// Requested target path.
        to: String,
    },

    /// A serialized key belongs to another network.
    #[error("key is for {found:?} but the wallet runs on {expected:?}")]
    NetworkMismatch {
        /// Network of the wallet.
        expected: NetworkKind,

        /// Network encoded in the key.
        found: NetworkKind,
    },

    /// The secure random number generator failed.
    #[error("secure randomness unavailable: {0}")]
    EntropyUnavailable(String),
}

impl DerivationError {
    /// Whether this error indicates a broken environment rather than bad input.
    ///
    /// Fatal errors must not be retried; the embedding application is expected to abort.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::EntropyUnavailable(_))
    }
}
