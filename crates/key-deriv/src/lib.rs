//! Hierarchical wallet keys.
//!
//! [`WalletPrivateKey`] and [`WalletPublicKey`] wrap BIP32 extended keys together with the
//! [`NamedPath`](wallet_primitives::NamedPath) they were derived to. The path travels with the
//! key because the base58 encoding does not carry it and later derivations depend on it.
//!
//! # Usage
//!
//! ```rust,ignore
//! use bitcoin::Network;
//! use wallet_key_deriv::WalletPrivateKey;
//! use wallet_primitives::DerivationSchema;
//!
//! let root = WalletPrivateKey::create_random(Network::Regtest)?;
//! let base = root.derive_to_schema(DerivationSchema::Base)?;
//!
//! // Receiving addresses only need the public half.
//! let external = base.public_key().derive_to_schema(DerivationSchema::External)?;
//! let first = external.derive_at(0)?;
//! ```

mod errors;
mod keys;

pub use errors::DerivationError;
pub use keys::{WalletPrivateKey, WalletPublicKey, ENCODED_KEY_LEN, SEED_LEN};
