//! Extended keys that remember where they were derived to.

use std::{fmt, str::FromStr};

use bitcoin::{
    bip32::{ChildNumber, Fingerprint, Xpriv, Xpub},
    secp256k1::{PublicKey, SecretKey},
    Network, NetworkKind,
};
use rand::{rngs::OsRng, RngCore};
use secp256k1::SECP256K1;
use tracing::error;
use wallet_primitives::{DerivationSchema, NamedPath};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::DerivationError;

/// Length of the seed a fresh root key is generated from.
pub const SEED_LEN: usize = 32;

/// Length of a BIP32 extended key in binary form.
pub const ENCODED_KEY_LEN: usize = 78;

/// An extended private key together with the path it was derived to.
///
/// Two keys are equal only if both the key material and the recorded path match, since the
/// path decides what later derivations produce.
#[derive(Clone)]
pub struct WalletPrivateKey {
    xpriv: Xpriv,
    path: NamedPath,
}

impl WalletPrivateKey {
    /// Generates a new root key for `network` from the operating system's secure RNG.
    pub fn create_random(network: Network) -> Result<Self, DerivationError> {
        Self::create_random_with(network, &mut OsRng)
    }

    /// Generates a new root key from the given RNG.
    ///
    /// An RNG failure is reported as [`DerivationError::EntropyUnavailable`], which is fatal.
    pub fn create_random_with<R: RngCore>(
        network: Network,
        rng: &mut R,
    ) -> Result<Self, DerivationError> {
        let mut seed = [0u8; SEED_LEN];
        if let Err(e) = rng.try_fill_bytes(&mut seed) {
            error!(%e, "secure rng failed while creating root key");
            return Err(DerivationError::EntropyUnavailable(e.to_string()));
        }

        let key = Self::from_seed(&seed, network);
        seed.zeroize();
        key
    }

    /// Builds the root key for a seed.
    pub fn from_seed(seed: &[u8], network: Network) -> Result<Self, DerivationError> {
        let xpriv = Xpriv::new_master(network, seed)?;
        Ok(Self {
            xpriv,
            path: NamedPath::root(),
        })
    }

    /// Wraps an extended key the caller knows to be at `path`.
    pub const fn from_xpriv(xpriv: Xpriv, path: NamedPath) -> Self {
        Self { xpriv, path }
    }

    /// Parses a base58 key. The path is not part of the encoding, so the caller supplies it.
    pub fn from_base58(
        s: &str,
        path: NamedPath,
        network: Network,
    ) -> Result<Self, DerivationError> {
        let xpriv = Xpriv::from_str(s.trim())?;
        check_network(xpriv.network, network)?;
        Ok(Self { xpriv, path })
    }

    /// Decodes the 78-byte BIP32 serialization.
    pub fn decode(bytes: &[u8], path: NamedPath) -> Result<Self, DerivationError> {
        let xpriv = Xpriv::decode(bytes)?;
        Ok(Self { xpriv, path })
    }

    /// The base58 serialization (`xprv…`/`tprv…`).
    pub fn to_base58(&self) -> String {
        self.xpriv.to_string()
    }

    /// The 78-byte BIP32 serialization.
    pub fn encode(&self) -> [u8; ENCODED_KEY_LEN] {
        self.xpriv.encode()
    }

    /// The path this key was derived to.
    pub const fn path(&self) -> &NamedPath {
        &self.path
    }

    /// The network kind encoded in the key.
    pub const fn network(&self) -> NetworkKind {
        self.xpriv.network
    }

    /// The underlying extended key.
    pub const fn xpriv(&self) -> &Xpriv {
        &self.xpriv
    }

    /// The private scalar of this key.
    pub const fn secret_key(&self) -> SecretKey {
        self.xpriv.private_key
    }

    /// The matching public key.
    pub fn public_key(&self) -> WalletPublicKey {
        WalletPublicKey {
            xpub: Xpub::from_priv(SECP256K1, &self.xpriv),
            path: self.path.clone(),
        }
    }

    /// BIP32 fingerprint of this key.
    pub fn fingerprint(&self) -> Fingerprint {
        self.xpriv.fingerprint(SECP256K1)
    }

    /// Derives the key at `path`, which must extend this key's path.
    pub fn derive_to(&self, path: &NamedPath) -> Result<Self, DerivationError> {
        let suffix = path
            .strip_prefix(&self.path)
            .ok_or_else(|| DerivationError::NotDescendant {
                from: self.path.to_string(),
                to: path.to_string(),
            })?;

        let xpriv = self.xpriv.derive_priv(SECP256K1, &suffix)?;
        Ok(Self {
            xpriv,
            path: path.clone(),
        })
    }

    /// Derives the key for a schema.
    pub fn derive_to_schema(&self, schema: DerivationSchema) -> Result<Self, DerivationError> {
        self.derive_to(&schema.path())
    }

    /// Derives the non-hardened child at `index`.
    pub fn derive_at(&self, index: u32) -> Result<Self, DerivationError> {
        let path = self.path.child_index(index)?;
        let xpriv = self
            .xpriv
            .derive_priv(SECP256K1, &[ChildNumber::from_normal_idx(index)?])?;
        Ok(Self { xpriv, path })
    }
}

impl PartialEq for WalletPrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_base58() == other.to_base58() && self.path == other.path
    }
}

impl Eq for WalletPrivateKey {}

impl fmt::Debug for WalletPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletPrivateKey")
            .field("path", &self.path.to_string())
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

impl Drop for WalletPrivateKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl Zeroize for WalletPrivateKey {
    #[inline]
    fn zeroize(&mut self) {
        let Self { xpriv, path: _ } = self;

        // Network and path are public parameters.
        //
        // NOTE: `SecretKey::non_secure_erase` writes `1`s to the memory.
        xpriv.depth.zeroize();
        {
            let fingerprint: &mut [u8; 4] = xpriv.parent_fingerprint.as_mut();
            fingerprint.zeroize();
        }
        xpriv.private_key.non_secure_erase();
        {
            let chaincode: &mut [u8; 32] = xpriv.chain_code.as_mut();
            chaincode.zeroize();
        }
        xpriv.child_number = match xpriv.child_number {
            ChildNumber::Normal { .. } => ChildNumber::Normal { index: 0 },
            ChildNumber::Hardened { .. } => ChildNumber::Hardened { index: 0 },
        };
    }
}

impl ZeroizeOnDrop for WalletPrivateKey {}

/// An extended public key together with the path it was derived to.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct WalletPublicKey {
    xpub: Xpub,
    path: NamedPath,
}

impl WalletPublicKey {
    /// Wraps an extended key the caller knows to be at `path`.
    pub const fn from_xpub(xpub: Xpub, path: NamedPath) -> Self {
        Self { xpub, path }
    }

    /// Parses a base58 key. The path is not part of the encoding, so the caller supplies it.
    pub fn from_base58(
        s: &str,
        path: NamedPath,
        network: Network,
    ) -> Result<Self, DerivationError> {
        let xpub = Xpub::from_str(s.trim())?;
        check_network(xpub.network, network)?;
        Ok(Self { xpub, path })
    }

    /// The base58 serialization (`xpub…`/`tpub…`).
    pub fn to_base58(&self) -> String {
        self.xpub.to_string()
    }

    /// The path this key was derived to.
    pub const fn path(&self) -> &NamedPath {
        &self.path
    }

    /// The network kind encoded in the key.
    pub const fn network(&self) -> NetworkKind {
        self.xpub.network
    }

    /// The underlying extended key.
    pub const fn xpub(&self) -> &Xpub {
        &self.xpub
    }

    /// The compressed secp256k1 point of this key.
    pub const fn public_key(&self) -> PublicKey {
        self.xpub.public_key
    }

    /// BIP32 fingerprint of this key.
    pub fn fingerprint(&self) -> Fingerprint {
        self.xpub.fingerprint()
    }

    /// Derives the key at `path`, which must extend this key's path through normal steps only.
    pub fn derive_to(&self, path: &NamedPath) -> Result<Self, DerivationError> {
        let suffix = path
            .strip_prefix(&self.path)
            .ok_or_else(|| DerivationError::NotDescendant {
                from: self.path.to_string(),
                to: path.to_string(),
            })?;

        if suffix.iter().any(ChildNumber::is_hardened) {
            return Err(DerivationError::HardenedFromPublic(path.to_string()));
        }

        let xpub = self.xpub.derive_pub(SECP256K1, &suffix)?;
        Ok(Self {
            xpub,
            path: path.clone(),
        })
    }

    /// Derives the key for a schema.
    pub fn derive_to_schema(&self, schema: DerivationSchema) -> Result<Self, DerivationError> {
        self.derive_to(&schema.path())
    }

    /// Derives the child at `index`. Indexes in the hardened range are rejected.
    pub fn derive_at(&self, index: u32) -> Result<Self, DerivationError> {
        let child = ChildNumber::from(index);
        if child.is_hardened() {
            return Err(DerivationError::HardenedFromPublic(format!(
                "{}/{}'",
                self.path,
                index & !(1 << 31)
            )));
        }

        let path = self.path.child_index(index)?;
        let xpub = self.xpub.ckd_pub(SECP256K1, child)?;
        Ok(Self { xpub, path })
    }
}

impl fmt::Debug for WalletPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletPublicKey")
            .field("key", &self.to_base58())
            .field("path", &self.path.to_string())
            .finish()
    }
}

fn check_network(found: NetworkKind, network: Network) -> Result<(), DerivationError> {
    let expected = NetworkKind::from(network);
    if found != expected {
        return Err(DerivationError::NetworkMismatch { expected, found });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::rngs::mock::StepRng;

    use super::*;

    const ROOT: &str = "tprv8ZgxMBicQKsPdGCzsJ31BsQnFL1TSQ82dfsZYTtsWJ1T8g7xTfnV19gf8nYPqzkzk6yLL9kzDYshmUrYyXt7uXsGbk9eN7juRxg9sjaxSjn";
    const BASE: &str = "tprv8e8vMhwEcLr1ZfZETKTQSpxJ6KfZuczALe8KrRCDLpSbXPwp7PY1ZVHtqUkFsYZETPRcfjVSCv8DiYP9RyAZrFhnLE8aYdaSaZEWyT5c8Ji";

    fn root() -> WalletPrivateKey {
        WalletPrivateKey::from_base58(ROOT, NamedPath::root(), Network::Regtest).unwrap()
    }

    struct BrokenRng;

    impl RngCore for BrokenRng {
        fn next_u32(&mut self) -> u32 {
            unreachable!("only try_fill_bytes is used")
        }

        fn next_u64(&mut self) -> u64 {
            unreachable!("only try_fill_bytes is used")
        }

        fn fill_bytes(&mut self, _dest: &mut [u8]) {
            unreachable!("only try_fill_bytes is used")
        }

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new("entropy source offline"))
        }
    }

    #[test]
    fn derives_known_base_key() {
        let base = root().derive_to_schema(DerivationSchema::Base).unwrap();
        assert_eq!(base.to_base58(), BASE);
        assert_eq!(base.path().to_string(), "m/schema:1'/recovery:1'");
    }

    #[test]
    fn equality_respects_path() {
        let base = root().derive_to_schema(DerivationSchema::Base).unwrap();
        let same_bytes_other_path =
            WalletPrivateKey::from_base58(BASE, "m/1'/1'".parse().unwrap(), Network::Regtest)
                .unwrap();
        assert_ne!(base, same_bytes_other_path);

        let reloaded = WalletPrivateKey::from_base58(
            &base.to_base58(),
            base.path().clone(),
            Network::Regtest,
        )
        .unwrap();
        assert_eq!(base, reloaded);
    }

    #[test]
    fn public_derivation_matches_private() {
        let base = root().derive_to_schema(DerivationSchema::Base).unwrap();
        let external: NamedPath = "m/schema:1'/recovery:1'/external:1/5".parse().unwrap();

        let from_private = base.derive_to(&external).unwrap().public_key();
        let from_public = base.public_key().derive_to(&external).unwrap();
        assert_eq!(from_private, from_public);

        let by_index = base
            .public_key()
            .derive_to_schema(DerivationSchema::External)
            .unwrap()
            .derive_at(5)
            .unwrap();
        assert_eq!(by_index.public_key(), from_public.public_key());
        assert_eq!(by_index.path().to_string(), "m/schema:1'/recovery:1'/external:1/5");
    }

    #[test]
    fn public_keys_refuse_hardened_children() {
        let root_pub = root().public_key();
        assert!(matches!(
            root_pub.derive_to_schema(DerivationSchema::Base),
            Err(DerivationError::HardenedFromPublic(_))
        ));
        assert!(matches!(
            root_pub.derive_at(1 << 31),
            Err(DerivationError::HardenedFromPublic(_))
        ));
    }

    #[test]
    fn derive_to_requires_descendant_path() {
        let base = root().derive_to_schema(DerivationSchema::Base).unwrap();
        let elsewhere: NamedPath = "m/44'/0'".parse().unwrap();
        assert!(matches!(
            base.derive_to(&elsewhere),
            Err(DerivationError::NotDescendant { .. })
        ));
    }

    #[test]
    fn rejects_other_network() {
        assert!(matches!(
            WalletPrivateKey::from_base58(ROOT, NamedPath::root(), Network::Bitcoin),
            Err(DerivationError::NetworkMismatch { .. })
        ));
        assert!(matches!(
            WalletPrivateKey::from_base58("tprvnope", NamedPath::root(), Network::Regtest),
            Err(DerivationError::Bip32(_))
        ));
    }

    #[test]
    fn random_keys_are_roots() {
        let key = WalletPrivateKey::create_random(Network::Regtest).unwrap();
        assert!(key.path().is_root());
        assert_eq!(key.network(), NetworkKind::Test);
        assert_ne!(
            key,
            WalletPrivateKey::create_random(Network::Regtest).unwrap()
        );

        let mut rng = StepRng::new(1, 1);
        let seeded = WalletPrivateKey::create_random_with(Network::Bitcoin, &mut rng).unwrap();
        assert_eq!(seeded.network(), NetworkKind::Main);
    }

    #[test]
    fn broken_rng_is_fatal() {
        let err = WalletPrivateKey::create_random_with(Network::Regtest, &mut BrokenRng)
            .unwrap_err();
        assert!(matches!(err, DerivationError::EntropyUnavailable(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn binary_encoding_round_trips() {
        let base = root().derive_to_schema(DerivationSchema::Base).unwrap();
        let decoded = WalletPrivateKey::decode(&base.encode(), base.path().clone()).unwrap();
        assert_eq!(decoded, base);
        assert_eq!(decoded.fingerprint(), base.public_key().fingerprint());
    }

    #[test]
    fn test_zeroize() {
        let mut key = root().derive_to_schema(DerivationSchema::Base).unwrap();

        assert_ne!(*key.xpriv().chain_code.as_bytes(), [0u8; 32]);

        key.zeroize();

        // NOTE: SecretKey::non_secure_erase writes `1`s to the memory.
        assert_eq!(key.xpriv().private_key.secret_bytes(), [1u8; 32]);
        assert_eq!(*key.xpriv().chain_code.as_bytes(), [0u8; 32]);
        assert_eq!(*key.xpriv().parent_fingerprint.as_bytes(), [0u8; 4]);
        assert_eq!(key.xpriv().depth, 0);
        assert_eq!(key.xpriv().child_number, ChildNumber::Hardened { index: 0 });
    }

    proptest! {
        #[test]
        fn derivation_is_deterministic(seed in any::<[u8; 32]>(), external in 0u32..1000) {
            let root = WalletPrivateKey::from_seed(&seed, Network::Regtest).unwrap();
            let path = DerivationSchema::External.path().child_index(external).unwrap();

            let first = root.derive_to(&path).unwrap();
            let second = root.derive_to(&path).unwrap();
            prop_assert_eq!(&first, &second);

            let reloaded = WalletPrivateKey::from_base58(
                &first.to_base58(),
                path.clone(),
                Network::Regtest,
            )
            .unwrap();
            prop_assert_eq!(reloaded, first);
        }
    }
}
