//! Wallet address versions and their derivation from the user and cosigner keys.
//!
//! | version | output | keys |
//! |---------|--------|------|
//! | 1 | P2PKH | user |
//! | 2 | P2SH 2-of-2 multisig | user, cosigner |
//! | 3 | P2SH-P2WSH 2-of-2 multisig | user, cosigner |
//! | 4 | P2WSH 2-of-2 multisig | user, cosigner |
//! | 5 | P2TR, MuSig2 key path | user, cosigner |

use std::fmt;

use bitcoin::{Address, Network, ScriptBuf};
use secp256k1::{PublicKey, SECP256K1};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wallet_key_deriv::{DerivationError, WalletPublicKey};
use wallet_primitives::{bitcoin::BitcoinAddress, NamedPath};

use crate::{
    scripts::{multisig_script, musig_key_agg},
    SignError,
};

/// An address version number no wallet has produced.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("unknown address version {0}")]
pub struct UnknownAddressVersion(pub u8);

/// The script template of a wallet address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AddressVersion {
    /// Pay to the user's public key hash.
    V1,

    /// 2-of-2 multisig behind P2SH.
    V2,

    /// 2-of-2 multisig behind nested segwit.
    V3,

    /// 2-of-2 multisig behind native segwit.
    V4,

    /// MuSig2 aggregate key behind taproot.
    V5,
}

impl AddressVersion {
    /// The protocol number of this version.
    pub const fn number(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
            Self::V4 => 4,
            Self::V5 => 5,
        }
    }

    /// Whether spending needs the cosigner.
    pub const fn is_multisig(self) -> bool {
        !matches!(self, Self::V1)
    }
}

impl TryFrom<u8> for AddressVersion {
    type Error = UnknownAddressVersion;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            4 => Ok(Self::V4),
            5 => Ok(Self::V5),
            other => Err(UnknownAddressVersion(other)),
        }
    }
}

impl From<AddressVersion> for u8 {
    fn from(version: AddressVersion) -> Self {
        version.number()
    }
}

impl fmt::Display for AddressVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.number())
    }
}

/// Identifies a wallet address by the keys it is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressDescriptor {
    /// Script template.
    pub version: AddressVersion,

    /// Path of both the user and cosigner keys.
    pub path: NamedPath,
}

impl AddressDescriptor {
    /// Creates a descriptor.
    pub const fn new(version: AddressVersion, path: NamedPath) -> Self {
        Self { version, path }
    }

    /// Derives the address from the base keys of both parties.
    pub fn derive(
        &self,
        user_base: &WalletPublicKey,
        muun_base: &WalletPublicKey,
        network: Network,
    ) -> Result<MuunAddress, SignError> {
        let keys = AddressKeys::derive(user_base, muun_base, &self.path)?;
        let address = keys.address(self.version, network)?;

        Ok(MuunAddress {
            version: self.version,
            path: self.path.clone(),
            address,
        })
    }
}

/// A derived wallet address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuunAddress {
    /// Script template.
    pub version: AddressVersion,

    /// Derivation path of the keys.
    pub path: NamedPath,

    /// The address itself.
    pub address: BitcoinAddress,
}

impl MuunAddress {
    /// The descriptor of this address.
    pub fn descriptor(&self) -> AddressDescriptor {
        AddressDescriptor::new(self.version, self.path.clone())
    }
}

/// The user and cosigner public keys at one derivation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressKeys {
    /// User key.
    pub user: PublicKey,

    /// Cosigner key.
    pub muun: PublicKey,
}

impl AddressKeys {
    /// Derives both keys at `path` from the base public keys.
    pub fn derive(
        user_base: &WalletPublicKey,
        muun_base: &WalletPublicKey,
        path: &NamedPath,
    ) -> Result<Self, DerivationError> {
        Ok(Self {
            user: user_base.derive_to(path)?.public_key(),
            muun: muun_base.derive_to(path)?.public_key(),
        })
    }

    /// The 2-of-2 multisig script of versions 2 to 4.
    pub fn multisig_script(&self) -> ScriptBuf {
        multisig_script(&self.user, &self.muun)
    }

    /// The untweaked MuSig2 aggregate of version 5, as an x-only key.
    pub fn musig_internal_key(&self) -> Result<bitcoin::key::UntweakedPublicKey, SignError> {
        let aggregated: PublicKey = musig_key_agg(&self.user, &self.muun)?.aggregated_pubkey();
        Ok(aggregated.x_only_public_key().0)
    }

    /// The address of `version` locked to these keys.
    pub fn address(
        &self,
        version: AddressVersion,
        network: Network,
    ) -> Result<BitcoinAddress, SignError> {
        let address = match version {
            AddressVersion::V1 => Address::p2pkh(crate::scripts::pubkey_hash(&self.user), network),
            AddressVersion::V2 => Address::p2sh(&self.multisig_script(), network)
                .map_err(|e| SignError::Address(e.to_string()))?,
            AddressVersion::V3 => Address::p2shwsh(&self.multisig_script(), network),
            AddressVersion::V4 => Address::p2wsh(&self.multisig_script(), network),
            AddressVersion::V5 => {
                Address::p2tr(SECP256K1, self.musig_internal_key()?, None, network)
            }
        };

        Ok(BitcoinAddress::from_checked(address, network))
    }
}
