//! The primitive operations the wallet's cryptography is built from.
//!
//! Key stretching, key agreement and authenticated encryption all go through
//! [`CryptoProvider`], so tests can substitute a provider whose randomness fails and callers can
//! swap in a hardware-backed implementation.

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use bitcoin::secp256k1::{ecdh::SharedSecret, PublicKey, SecretKey};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use tracing::error;

use crate::CryptoError;

/// Length of symmetric keys.
pub const SYMMETRIC_KEY_LEN: usize = 32;

/// Length of AES-GCM nonces.
pub const NONCE_LEN: usize = 12;

/// Length of the AES-GCM authentication tag appended to ciphertexts.
pub const TAG_LEN: usize = 16;

/// Cost parameters for scrypt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScryptCost {
    /// Base-2 logarithm of the CPU/memory cost `N`.
    pub log_n: u8,

    /// Block size.
    pub r: u32,

    /// Parallelization.
    pub p: u32,
}

impl ScryptCost {
    /// Cost used for legacy password and recovery code challenge keys.
    pub const CHALLENGE_V1: ScryptCost = ScryptCost {
        log_n: 9,
        r: 8,
        p: 1,
    };

    /// Cost used for saltless recovery code challenge keys.
    pub const CHALLENGE_V2: ScryptCost = ScryptCost {
        log_n: 14,
        r: 8,
        p: 1,
    };

    /// Default cost for passphrase-encrypted keys.
    pub const KEY_CRYPTER: ScryptCost = ScryptCost {
        log_n: 14,
        r: 8,
        p: 1,
    };
}

/// Primitive cryptographic operations.
pub trait CryptoProvider: fmt::Debug + Send + Sync {
    /// Fills `dest` from a cryptographically secure RNG.
    fn fill_random(&self, dest: &mut [u8]) -> Result<(), CryptoError>;

    /// Stretches `secret` with scrypt into a 32-byte key.
    fn scrypt(
        &self,
        secret: &[u8],
        salt: &[u8],
        cost: ScryptCost,
    ) -> Result<[u8; SYMMETRIC_KEY_LEN], CryptoError>;

    /// Hashed ECDH shared secret between a private and a public key.
    fn ecdh(&self, secret_key: &SecretKey, public_key: &PublicKey) -> [u8; SYMMETRIC_KEY_LEN];

    /// HKDF-SHA256 extract-and-expand into a 32-byte key.
    fn hkdf_sha256(
        &self,
        ikm: &[u8],
        salt: &[u8],
        info: &[u8],
    ) -> Result<[u8; SYMMETRIC_KEY_LEN], CryptoError>;

    /// AES-256-GCM encryption. The result carries the authentication tag.
    fn seal(
        &self,
        key: &[u8; SYMMETRIC_KEY_LEN],
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// AES-256-GCM decryption. Fails with [`CryptoError::Open`] if authentication fails.
    fn open(
        &self,
        key: &[u8; SYMMETRIC_KEY_LEN],
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Returns `N` fresh random bytes.
    fn random_array<const N: usize>(&self) -> Result<[u8; N], CryptoError>
    where
        Self: Sized,
    {
        let mut out = [0u8; N];
        self.fill_random(&mut out)?;
        Ok(out)
    }
}

/// [`CryptoProvider`] backed by the operating system RNG and RustCrypto implementations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCryptoProvider;

impl CryptoProvider for NativeCryptoProvider {
    fn fill_random(&self, dest: &mut [u8]) -> Result<(), CryptoError> {
        OsRng.try_fill_bytes(dest).map_err(|e| {
            error!(%e, "secure rng failed");
            CryptoError::EntropyUnavailable(e.to_string())
        })
    }

    fn scrypt(
        &self,
        secret: &[u8],
        salt: &[u8],
        cost: ScryptCost,
    ) -> Result<[u8; SYMMETRIC_KEY_LEN], CryptoError> {
        let params = scrypt::Params::new(cost.log_n, cost.r, cost.p, SYMMETRIC_KEY_LEN)
            .map_err(|e| CryptoError::InvalidKdfParams(e.to_string()))?;

        let mut output = [0u8; SYMMETRIC_KEY_LEN];
        scrypt::scrypt(secret, salt, &params, &mut output)
            .map_err(|e| CryptoError::InvalidKdfParams(e.to_string()))?;

        Ok(output)
    }

    fn ecdh(&self, secret_key: &SecretKey, public_key: &PublicKey) -> [u8; SYMMETRIC_KEY_LEN] {
        SharedSecret::new(public_key, secret_key).secret_bytes()
    }

    fn hkdf_sha256(
        &self,
        ikm: &[u8],
        salt: &[u8],
        info: &[u8],
    ) -> Result<[u8; SYMMETRIC_KEY_LEN], CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
        let mut okm = [0u8; SYMMETRIC_KEY_LEN];
        hk.expand(info, &mut okm)
            .map_err(|e| CryptoError::KeyExpansion(e.to_string()))?;
        Ok(okm)
    }

    fn seal(
        &self,
        key: &[u8; SYMMETRIC_KEY_LEN],
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::Seal(e.to_string()))?;
        cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| {
                error!(%e, "authenticated encryption failed");
                CryptoError::Seal(e.to_string())
            })
    }

    fn open(
        &self,
        key: &[u8; SYMMETRIC_KEY_LEN],
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::Open)?;
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::Open)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::secp256k1::SECP256K1;

    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let provider = NativeCryptoProvider;
        let key = [7u8; 32];
        let nonce = [9u8; 12];

        let sealed = provider.seal(&key, &nonce, b"secret", b"header").unwrap();
        assert_eq!(sealed.len(), b"secret".len() + TAG_LEN);
        assert_eq!(
            provider.open(&key, &nonce, &sealed, b"header").unwrap(),
            b"secret"
        );

        assert_eq!(
            provider.open(&key, &nonce, &sealed, b"other header"),
            Err(CryptoError::Open)
        );
        assert_eq!(
            provider.open(&[8u8; 32], &nonce, &sealed, b"header"),
            Err(CryptoError::Open)
        );
    }

    #[test]
    fn ecdh_is_symmetric() {
        let provider = NativeCryptoProvider;
        let a = SecretKey::from_slice(&[1u8; 32]).unwrap();
        let b = SecretKey::from_slice(&[2u8; 32]).unwrap();

        let ab = provider.ecdh(&a, &PublicKey::from_secret_key(SECP256K1, &b));
        let ba = provider.ecdh(&b, &PublicKey::from_secret_key(SECP256K1, &a));
        assert_eq!(ab, ba);
    }

    #[test]
    fn scrypt_is_deterministic_and_salted() {
        let provider = NativeCryptoProvider;
        let cost = ScryptCost::CHALLENGE_V1;

        let k1 = provider.scrypt(b"password", b"salt", cost).unwrap();
        let k2 = provider.scrypt(b"password", b"salt", cost).unwrap();
        let k3 = provider.scrypt(b"password", b"pepper", cost).unwrap();
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);

        let broken = ScryptCost {
            log_n: 9,
            r: 0,
            p: 1,
        };
        assert!(matches!(
            provider.scrypt(b"password", b"salt", broken),
            Err(CryptoError::InvalidKdfParams(_))
        ));
    }

    #[test]
    fn random_arrays_differ() {
        let provider = NativeCryptoProvider;
        let a: [u8; 32] = provider.random_array().unwrap();
        let b: [u8; 32] = provider.random_array().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn only_authentication_failures_are_recoverable() {
        assert!(!CryptoError::Open.is_fatal());
        assert!(CryptoError::EntropyUnavailable("gone".into()).is_fatal());
        assert!(CryptoError::Seal("bug".into()).is_fatal());
    }
}
