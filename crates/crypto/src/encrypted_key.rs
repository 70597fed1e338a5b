//! Encryption of wallet keys to a challenge public key.
//!
//! Only the holder of the challenge secret (password or recovery code) can open the result,
//! which lets users restore their wallet from a backup without the coordination service ever
//! seeing plaintext keys.
//!
//! # Wire format
//!
//! The payload is base58 encoded:
//!
//! ```text
//! version (1) || birthday (2, BE) || ephemeral pubkey (33) || salt len (1) || salt
//!     || nonce (12) || AES-256-GCM ciphertext + tag
//! ```
//!
//! The symmetric key is HKDF-SHA256 over the ECDH secret between the ephemeral key and the
//! challenge key. Everything before the nonce is authenticated as associated data. The salt is
//! the challenge key's own salt, so a backup carries everything needed to re-derive the
//! challenge key from the user's secret.
//!
//! The plaintext is a key count followed by, for each key, its 78-byte BIP32 serialization, a
//! one-byte path length and the path string. Version 2 holds the user key; version 3 also holds
//! the cosigner key.

use bitcoin::{
    base58,
    secp256k1::{PublicKey, SecretKey},
    Network, NetworkKind,
};
use secp256k1::SECP256K1;
use tracing::debug;
use wallet_key_deriv::{DerivationError, WalletPrivateKey, ENCODED_KEY_LEN};
use wallet_primitives::NamedPath;
use zeroize::Zeroize;

use crate::{
    provider::NONCE_LEN, ChallengeKey, ChallengeKeyError, ChallengePrivateKey, CryptoProvider,
    NativeCryptoProvider,
};

/// Payload version holding only the user key.
pub const ENCRYPTED_KEY_V2: u8 = 2;

/// Payload version holding the user key and the cosigner key.
pub const ENCRYPTED_KEY_V3: u8 = 3;

/// Birthday recorded when the wallet creation date is unknown.
pub const UNKNOWN_BIRTHDAY: u16 = 0xFFFF;

const HKDF_INFO: &[u8] = b"wallet:challenge-key-encryption";
const PUBKEY_LEN: usize = 33;

/// Keys recovered from an encrypted payload.
#[derive(Debug)]
pub struct DecryptedKeys {
    /// The user's key.
    pub user_key: WalletPrivateKey,

    /// The cosigner key, present in version 3 payloads.
    pub muun_key: Option<WalletPrivateKey>,

    /// Days since the wallet epoch when the wallet was created.
    pub birthday: u16,
}

/// A parsed, still encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedKeyPayload {
    version: u8,
    birthday: u16,
    ephemeral_public_key: PublicKey,
    salt: Option<Vec<u8>>,
    header: Vec<u8>,
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl EncryptedKeyPayload {
    /// Parses a base58 payload without decrypting it.
    pub fn parse(payload: &str) -> Result<Self, ChallengeKeyError> {
        let bytes = base58::decode(payload.trim())
            .map_err(|e| ChallengeKeyError::MalformedPayload(e.to_string()))?;
        let mut reader = Reader::new(&bytes);

        let version = reader.u8()?;
        if version != ENCRYPTED_KEY_V2 && version != ENCRYPTED_KEY_V3 {
            return Err(ChallengeKeyError::UnsupportedPayloadVersion(version));
        }

        let birthday = u16::from_be_bytes(reader.array()?);
        let ephemeral_public_key = PublicKey::from_slice(reader.take(PUBKEY_LEN)?)
            .map_err(|_| ChallengeKeyError::MalformedPayload("ephemeral key".to_string()))?;
        let salt_len = reader.u8()? as usize;
        let salt = (salt_len > 0)
            .then(|| reader.take(salt_len).map(<[u8]>::to_vec))
            .transpose()?;
        let header = bytes[..reader.position()].to_vec();
        let nonce = reader.array()?;
        let ciphertext = reader.rest().to_vec();

        Ok(Self {
            version,
            birthday,
            ephemeral_public_key,
            salt,
            header,
            nonce,
            ciphertext,
        })
    }

    /// Format version of the payload.
    pub const fn version(&self) -> u8 {
        self.version
    }

    /// Wallet birthday recorded at encryption time.
    pub const fn birthday(&self) -> u16 {
        self.birthday
    }

    /// Salt of the challenge key the payload was encrypted to.
    pub fn salt(&self) -> Option<&[u8]> {
        self.salt.as_deref()
    }
}

impl ChallengeKey {
    /// Encrypts the user key, and optionally the cosigner key, to this challenge key.
    pub fn encrypt_key(
        &self,
        user_key: &WalletPrivateKey,
        muun_key: Option<&WalletPrivateKey>,
    ) -> Result<String, ChallengeKeyError> {
        self.encrypt_key_with(&NativeCryptoProvider, user_key, muun_key, UNKNOWN_BIRTHDAY)
    }

    /// Like [`Self::encrypt_key`], with an explicit provider and wallet birthday.
    pub fn encrypt_key_with<P: CryptoProvider>(
        &self,
        provider: &P,
        user_key: &WalletPrivateKey,
        muun_key: Option<&WalletPrivateKey>,
        birthday: u16,
    ) -> Result<String, ChallengeKeyError> {
        let version = if muun_key.is_some() {
            ENCRYPTED_KEY_V3
        } else {
            ENCRYPTED_KEY_V2
        };

        let ephemeral = random_secret_key(provider)?;
        let ephemeral_public_key = PublicKey::from_secret_key(SECP256K1, &ephemeral);

        let mut header = Vec::with_capacity(64);
        header.push(version);
        header.extend_from_slice(&birthday.to_be_bytes());
        header.extend_from_slice(&ephemeral_public_key.serialize());
        match self.salt() {
            Some(salt) => {
                let len = u8::try_from(salt.len())
                    .map_err(|_| ChallengeKeyError::MalformedPayload("salt too long".into()))?;
                header.push(len);
                header.extend_from_slice(salt);
            }
            None => header.push(0),
        }

        let mut symmetric_key =
            shared_key(provider, &ephemeral, self.public_key(), self.public_key())?;
        let nonce: [u8; NONCE_LEN] = provider.random_array()?;

        let keys: Vec<&WalletPrivateKey> = std::iter::once(user_key).chain(muun_key).collect();
        let mut plaintext = encode_keys(&keys)?;
        let sealed = provider.seal(&symmetric_key, &nonce, &plaintext, &header);
        plaintext.zeroize();
        symmetric_key.zeroize();
        let ciphertext = sealed?;

        let mut payload = header;
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        debug!(
            version,
            challenge_type = ?self.challenge_type(),
            "encrypted wallet key to challenge key"
        );

        Ok(base58::encode(&payload))
    }
}

impl ChallengePrivateKey {
    /// Opens a payload produced by [`ChallengeKey::encrypt_key`].
    pub fn decrypt_key(
        &self,
        payload: &str,
        network: Network,
    ) -> Result<DecryptedKeys, ChallengeKeyError> {
        self.decrypt_key_with(&NativeCryptoProvider, payload, network)
    }

    /// Like [`Self::decrypt_key`], with an explicit provider.
    pub fn decrypt_key_with<P: CryptoProvider>(
        &self,
        provider: &P,
        payload: &str,
        network: Network,
    ) -> Result<DecryptedKeys, ChallengeKeyError> {
        let payload = EncryptedKeyPayload::parse(payload)?;

        let mut symmetric_key = shared_key(
            provider,
            self.secret_key(),
            &payload.ephemeral_public_key,
            &self.public_key(),
        )?;
        let opened = provider.open(
            &symmetric_key,
            &payload.nonce,
            &payload.ciphertext,
            &payload.header,
        );
        symmetric_key.zeroize();
        let mut plaintext = opened.map_err(|_| ChallengeKeyError::DecryptionFailed)?;

        let decoded = decode_keys(&plaintext, network);
        plaintext.zeroize();
        let mut keys = decoded?;

        let expected = if payload.version == ENCRYPTED_KEY_V3 {
            2
        } else {
            1
        };
        if keys.len() != expected {
            return Err(ChallengeKeyError::MalformedPayload(format!(
                "expected {expected} keys, found {}",
                keys.len()
            )));
        }

        let muun_key = (keys.len() == 2).then(|| keys.remove(1));
        let user_key = keys.remove(0);

        Ok(DecryptedKeys {
            user_key,
            muun_key,
            birthday: payload.birthday,
        })
    }
}

fn random_secret_key<P: CryptoProvider>(provider: &P) -> Result<SecretKey, ChallengeKeyError> {
    loop {
        let mut bytes: [u8; 32] = provider.random_array()?;
        let key = SecretKey::from_slice(&bytes);
        bytes.zeroize();
        if let Ok(key) = key {
            return Ok(key);
        }
    }
}

/// Derives the symmetric key from an ECDH exchange, salted with the challenge public key.
fn shared_key<P: CryptoProvider>(
    provider: &P,
    secret_key: &SecretKey,
    public_key: &PublicKey,
    challenge_public_key: &PublicKey,
) -> Result<[u8; 32], ChallengeKeyError> {
    let mut ikm = provider.ecdh(secret_key, public_key);
    let key = provider.hkdf_sha256(&ikm, &challenge_public_key.serialize(), HKDF_INFO);
    ikm.zeroize();
    Ok(key?)
}

fn encode_keys(keys: &[&WalletPrivateKey]) -> Result<Vec<u8>, ChallengeKeyError> {
    let mut out = Vec::with_capacity(1 + keys.len() * (ENCODED_KEY_LEN + 40));
    out.push(keys.len() as u8);
    for key in keys {
        let path = key.path().to_string();
        let len = u8::try_from(path.len())
            .map_err(|_| ChallengeKeyError::MalformedPayload("path too long".into()))?;
        out.extend_from_slice(&key.encode());
        out.push(len);
        out.extend_from_slice(path.as_bytes());
    }
    Ok(out)
}

fn decode_keys(
    plaintext: &[u8],
    network: Network,
) -> Result<Vec<WalletPrivateKey>, ChallengeKeyError> {
    let mut reader = Reader::new(plaintext);
    let count = reader.u8()?;

    let mut keys = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let encoded = reader.take(ENCODED_KEY_LEN)?;
        let path_len = reader.u8()? as usize;
        let path = std::str::from_utf8(reader.take(path_len)?)
            .map_err(|_| ChallengeKeyError::MalformedPayload("path is not utf-8".into()))?
            .parse::<NamedPath>()
            .map_err(DerivationError::from)?;

        let key = WalletPrivateKey::decode(encoded, path)?;
        let expected = NetworkKind::from(network);
        if key.network() != expected {
            return Err(DerivationError::NetworkMismatch {
                expected,
                found: key.network(),
            }
            .into());
        }
        keys.push(key);
    }

    if !reader.rest().is_empty() {
        return Err(ChallengeKeyError::MalformedPayload(
            "trailing bytes after keys".into(),
        ));
    }

    Ok(keys)
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    const fn position(&self) -> usize {
        self.position
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ChallengeKeyError> {
        let end = self.position + len;
        let slice = self
            .bytes
            .get(self.position..end)
            .ok_or_else(|| ChallengeKeyError::MalformedPayload("truncated payload".into()))?;
        self.position = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ChallengeKeyError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ChallengeKeyError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.position..];
        self.position = self.bytes.len();
        rest
    }
}
