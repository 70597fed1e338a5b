//! Secrets the user holds and the keys derived from them.
//!
//! - [`RecoveryCode`]: the code users write down.
//! - [`ChallengeKey`] / [`ChallengePrivateKey`]: key pairs bound to a password, a recovery code
//!   or the wallet's own key, used to authenticate and to encrypt backups.
//! - [`KeyCrypter`]: passphrase encryption of keys at rest.
//!
//! All primitives go through a [`CryptoProvider`]. Errors whose `is_fatal` returns `true` mean
//! the environment is broken (no secure randomness, say) and must not be retried.

mod challenge;
mod encrypted_key;
mod errors;
mod key_crypter;
mod provider;
mod recovery_code;

pub use challenge::{ChallengeKey, ChallengePrivateKey, ChallengeType, CHALLENGE_SALT_LEN};
pub use encrypted_key::{
    DecryptedKeys, EncryptedKeyPayload, ENCRYPTED_KEY_V2, ENCRYPTED_KEY_V3, UNKNOWN_BIRTHDAY,
};
pub use errors::{ChallengeKeyError, CryptoError, KeyCrypterError, RecoveryCodeError};
pub use key_crypter::{KeyCrypter, KEY_CRYPTER_SALT_LEN, KEY_CRYPTER_VERSION};
pub use provider::{
    CryptoProvider, NativeCryptoProvider, ScryptCost, NONCE_LEN, SYMMETRIC_KEY_LEN, TAG_LEN,
};
pub use recovery_code::{
    RecoveryCode, ALPHABET, CURRENT_VERSION as RECOVERY_CODE_VERSION, SEGMENT_COUNT,
    SEGMENT_LENGTH,
};
