//! Bitcoin address handling.

use std::fmt;

use bitcoin::{self, address::NetworkUnchecked, Address, Network, ScriptBuf};
use serde::{de, Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Errors raised when user or server supplied address text is unusable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The text is not a bitcoin address.
    #[error("invalid bitcoin address: {0}")]
    Invalid(String),

    /// The address is valid but belongs to a different network.
    #[error("address {address} is not valid on {network}")]
    WrongNetwork {
        /// The offending address.
        address: String,

        /// The network the wallet runs on.
        network: Network,
    },
}

/// A [`bitcoin::Address`] coupled with the network it was checked against.
///
/// Keeps the network across serialization so addresses read back from storage are not silently
/// accepted on another chain.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BitcoinAddress {
    /// The [`bitcoin::Network`] that this address is valid in.
    network: Network,

    /// The actual [`Address`] that this type wraps.
    address: Address,
}

impl BitcoinAddress {
    /// Parses a bitcoin address from a string and network.
    pub fn parse(address_str: &str, network: Network) -> Result<Self, AddressError> {
        let address = address_str
            .trim()
            .parse::<Address<NetworkUnchecked>>()
            .map_err(|_| AddressError::Invalid(address_str.to_string()))?;

        let checked_address =
            address
                .require_network(network)
                .map_err(|_| AddressError::WrongNetwork {
                    address: address_str.to_string(),
                    network,
                })?;

        Ok(Self {
            network,
            address: checked_address,
        })
    }

    /// Wraps an address built locally for `network`.
    pub const fn from_checked(address: Address, network: Network) -> Self {
        Self { network, address }
    }

    /// Returns the address.
    pub const fn address(&self) -> &Address {
        &self.address
    }

    /// Returns the network.
    pub const fn network(&self) -> &Network {
        &self.network
    }

    /// The output script paying to this address.
    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }
}

impl fmt::Display for BitcoinAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.address.fmt(f)
    }
}

impl<'de> Deserialize<'de> for BitcoinAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct BitcoinAddressShim {
            network: Network,
            address: String,
        }

        let shim = BitcoinAddressShim::deserialize(deserializer)?;
        BitcoinAddress::parse(&shim.address, shim.network).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{
        secp256k1::{PublicKey, Secp256k1, SecretKey},
        CompressedPublicKey,
    };

    use super::*;

    fn regtest_address() -> String {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let pk = CompressedPublicKey(PublicKey::from_secret_key(&secp, &sk));
        Address::p2wpkh(&pk, Network::Regtest).to_string()
    }

    #[test]
    fn parse_checks_network() {
        let text = regtest_address();
        let address = BitcoinAddress::parse(&text, Network::Regtest).unwrap();
        assert_eq!(address.to_string(), text);
        assert_eq!(*address.network(), Network::Regtest);

        assert!(matches!(
            BitcoinAddress::parse(&text, Network::Bitcoin),
            Err(AddressError::WrongNetwork { .. })
        ));
        assert!(matches!(
            BitcoinAddress::parse("not an address", Network::Regtest),
            Err(AddressError::Invalid(_))
        ));
    }

    #[test]
    fn serde_keeps_network() {
        let address = BitcoinAddress::parse(&regtest_address(), Network::Regtest).unwrap();
        let json = serde_json::to_string(&address).unwrap();
        let back: BitcoinAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);

        let tampered = json.replace("regtest", "bitcoin");
        assert!(serde_json::from_str::<BitcoinAddress>(&tampered).is_err());
    }
}
