//! Passphrase encryption of wallet keys for local storage.
//!
//! An encrypted key is a single line of colon-separated fields:
//!
//! ```text
//! v1:<log_n>:<nonce hex>:<salt hex>:<ciphertext hex>:<path>
//! ```
//!
//! The key is stretched with scrypt at the recorded cost, so the cost can be raised later without
//! breaking existing ciphertexts. The derivation path is authenticated as associated data and
//! restored alongside the key.

use bitcoin::Network;
use tracing::{debug, warn};
use wallet_key_deriv::WalletPrivateKey;
use wallet_primitives::NamedPath;
use zeroize::Zeroize;

use crate::{
    provider::NONCE_LEN, CryptoError, CryptoProvider, KeyCrypterError, NativeCryptoProvider,
    ScryptCost,
};

/// Format version written by [`KeyCrypter::encrypt`].
pub const KEY_CRYPTER_VERSION: &str = "v1";

/// Length of the random scrypt salt.
pub const KEY_CRYPTER_SALT_LEN: usize = 16;

const MAX_LOG_N: u8 = 20;
const FIELD_COUNT: usize = 6;

/// Encrypts and decrypts wallet keys under a user passphrase.
#[derive(Debug, Clone)]
pub struct KeyCrypter<P = NativeCryptoProvider> {
    provider: P,
    cost: ScryptCost,
}

impl Default for KeyCrypter {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyCrypter {
    /// A crypter with the native provider and the default cost.
    pub const fn new() -> Self {
        Self {
            provider: NativeCryptoProvider,
            cost: ScryptCost::KEY_CRYPTER,
        }
    }
}

impl<P: CryptoProvider> KeyCrypter<P> {
    /// A crypter with a specific provider and cost for new ciphertexts.
    pub const fn with_cost(provider: P, cost: ScryptCost) -> Self {
        Self { provider, cost }
    }

    /// Encrypts `key` under `passphrase`.
    pub fn encrypt(
        &self,
        key: &WalletPrivateKey,
        passphrase: &str,
    ) -> Result<String, KeyCrypterError> {
        let salt: [u8; KEY_CRYPTER_SALT_LEN] = self.provider.random_array()?;
        let nonce: [u8; NONCE_LEN] = self.provider.random_array()?;
        let path = key.path().to_string();

        let mut symmetric_key = self
            .provider
            .scrypt(passphrase.as_bytes(), &salt, self.cost)?;
        let mut plaintext = key.to_base58();
        let sealed = self.provider.seal(
            &symmetric_key,
            &nonce,
            plaintext.as_bytes(),
            path.as_bytes(),
        );
        symmetric_key.zeroize();
        plaintext.zeroize();

        Ok(format!(
            "{KEY_CRYPTER_VERSION}:{}:{}:{}:{}:{path}",
            self.cost.log_n,
            hex::encode(nonce),
            hex::encode(salt),
            hex::encode(sealed?),
        ))
    }

    /// Decrypts a key produced by [`Self::encrypt`].
    ///
    /// A wrong passphrase and a corrupted ciphertext are indistinguishable and both surface as
    /// [`KeyCrypterError::WrongPassphrase`].
    pub fn decrypt(
        &self,
        encrypted: &str,
        passphrase: &str,
        network: Network,
    ) -> Result<WalletPrivateKey, KeyCrypterError> {
        let fields: Vec<&str> = encrypted.trim().splitn(FIELD_COUNT, ':').collect();
        if fields.len() != FIELD_COUNT {
            return Err(KeyCrypterError::Malformed(format!(
                "expected {FIELD_COUNT} fields, found {}",
                fields.len()
            )));
        }

        if fields[0] != KEY_CRYPTER_VERSION {
            warn!(version = fields[0], "encrypted key has unknown format version");
            return Err(KeyCrypterError::UnsupportedVersion(fields[0].to_string()));
        }

        let log_n: u8 = fields[1]
            .parse()
            .map_err(|_| KeyCrypterError::Malformed("cost is not a number".into()))?;
        if !(1..=MAX_LOG_N).contains(&log_n) {
            return Err(KeyCrypterError::Malformed(format!(
                "cost {log_n} is out of range"
            )));
        }

        let nonce: [u8; NONCE_LEN] = decode_hex(fields[2], "nonce")?
            .try_into()
            .map_err(|_| KeyCrypterError::Malformed("nonce has the wrong length".into()))?;
        let salt = decode_hex(fields[3], "salt")?;
        let ciphertext = decode_hex(fields[4], "ciphertext")?;
        let path: NamedPath = fields[5]
            .parse()
            .map_err(|e| KeyCrypterError::Malformed(format!("path: {e}")))?;

        let cost = ScryptCost {
            log_n,
            ..self.cost
        };
        let mut symmetric_key = self.provider.scrypt(passphrase.as_bytes(), &salt, cost)?;
        let opened = self
            .provider
            .open(&symmetric_key, &nonce, &ciphertext, fields[5].as_bytes());
        symmetric_key.zeroize();

        let mut plaintext = match opened {
            Ok(plaintext) => plaintext,
            Err(CryptoError::Open) => {
                debug!("passphrase did not open encrypted key");
                return Err(KeyCrypterError::WrongPassphrase);
            }
            Err(e) => return Err(e.into()),
        };

        let key = std::str::from_utf8(&plaintext)
            .map_err(|_| KeyCrypterError::Malformed("decrypted key is not utf-8".into()))
            .and_then(|encoded| Ok(WalletPrivateKey::from_base58(encoded, path, network)?));
        plaintext.zeroize();

        key
    }
}

fn decode_hex(field: &str, name: &str) -> Result<Vec<u8>, KeyCrypterError> {
    hex::decode(field).map_err(|e| KeyCrypterError::Malformed(format!("{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use wallet_primitives::DerivationSchema;

    use super::*;

    // Low cost keeps the tests fast; the format records it per ciphertext.
    fn crypter() -> KeyCrypter {
        KeyCrypter::with_cost(
            NativeCryptoProvider,
            ScryptCost {
                log_n: 4,
                r: 8,
                p: 1,
            },
        )
    }

    fn key() -> WalletPrivateKey {
        WalletPrivateKey::from_seed(&[4u8; 32], Network::Regtest)
            .unwrap()
            .derive_to_schema(DerivationSchema::Base)
            .unwrap()
    }

    #[test]
    fn round_trip_restores_key_and_path() {
        let key = key();
        let encrypted = crypter().encrypt(&key, "passphrase").unwrap();

        assert!(encrypted.starts_with("v1:4:"));
        assert!(encrypted.ends_with(&key.path().to_string()));

        let decrypted = crypter()
            .decrypt(&encrypted, "passphrase", Network::Regtest)
            .unwrap();
        assert_eq!(decrypted, key);
    }

    #[test]
    fn default_cost_is_recorded() {
        let encrypted = KeyCrypter::new().encrypt(&key(), "pw").unwrap();
        assert!(encrypted.starts_with("v1:14:"));
    }

    #[test]
    fn wrong_passphrase_is_recoverable() {
        let encrypted = crypter().encrypt(&key(), "right").unwrap();
        let err = crypter()
            .decrypt(&encrypted, "wrong", Network::Regtest)
            .unwrap_err();
        assert!(matches!(err, KeyCrypterError::WrongPassphrase));
        assert!(!err.is_fatal());
    }

    #[test]
    fn path_is_authenticated() {
        let encrypted = crypter().encrypt(&key(), "pw").unwrap();
        let (head, _) = encrypted.rsplit_once(':').unwrap();
        let moved = format!("{head}:m/schema:1'/recovery:1'/change:0");

        assert!(matches!(
            crypter().decrypt(&moved, "pw", Network::Regtest),
            Err(KeyCrypterError::WrongPassphrase)
        ));
    }

    #[test]
    fn rejects_malformed_input() {
        let c = crypter();
        assert!(matches!(
            c.decrypt("v1:4:00", "pw", Network::Regtest),
            Err(KeyCrypterError::Malformed(_))
        ));
        assert!(matches!(
            c.decrypt("v9:4:00:00:00:m", "pw", Network::Regtest),
            Err(KeyCrypterError::UnsupportedVersion(v)) if v == "v9"
        ));
        assert!(matches!(
            c.decrypt("v1:99:00:00:00:m", "pw", Network::Regtest),
            Err(KeyCrypterError::Malformed(_))
        ));
        assert!(matches!(
            c.decrypt("v1:4:zz:00:00:m", "pw", Network::Regtest),
            Err(KeyCrypterError::Malformed(_))
        ));
        assert!(matches!(
            c.decrypt("v1:4:00:00:00:m", "pw", Network::Regtest),
            Err(KeyCrypterError::Malformed(_))
        ));
    }
}
