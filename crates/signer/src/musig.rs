//! MuSig2 nonces and the taproot key-path signature of version 5 inputs.
//!
//! Nonces are generated before the cosigner builds its partial signatures: the public halves are
//! sent with the signing request and the secret halves stay here until the matching input is
//! signed. Each secret nonce is consumed by exactly one signature.

use std::fmt;

use bitcoin::{taproot, TapSighashType};
use musig2::{
    aggregate_partial_signatures, sign_partial, verify_partial, AggNonce, KeyAggContext,
    PartialSignature, PubNonce, SecNonce,
};
use rand::{rngs::OsRng, RngCore};
use secp256k1::{schnorr, PublicKey, SecretKey};
use tracing::error;

use crate::{MalformedTransactionError, SignError};

/// Length of a serialized MuSig2 public nonce.
pub const PUB_NONCE_LEN: usize = 66;

/// Length of a serialized MuSig2 partial signature.
pub const PARTIAL_SIGNATURE_LEN: usize = 32;

/// Length of the cosigner blob attached to version 5 inputs.
pub const MUUN_MUSIG_BLOB_LEN: usize = PUB_NONCE_LEN + PARTIAL_SIGNATURE_LEN;

const NONCE_SEED_LEN: usize = 32;

/// Secret nonces for the taproot inputs of one transaction, indexed by input.
pub struct MusigNonces {
    nonces: Vec<Option<SecNonce>>,
}

impl MusigNonces {
    /// Generates one fresh nonce per input.
    pub fn generate(count: usize) -> Self {
        Self::generate_with(&mut OsRng, count)
    }

    /// Generates one nonce per input from `rng`.
    pub fn generate_with<R: RngCore>(rng: &mut R, count: usize) -> Self {
        let nonces = (0..count)
            .map(|_| {
                let mut seed = [0u8; NONCE_SEED_LEN];
                rng.fill_bytes(&mut seed);
                Some(SecNonce::build(seed).build())
            })
            .collect();
        Self { nonces }
    }

    /// Wraps nonces generated elsewhere.
    pub fn from_sec_nonces(nonces: Vec<SecNonce>) -> Self {
        Self {
            nonces: nonces.into_iter().map(Some).collect(),
        }
    }

    /// The public nonces to share with the cosigner. Consumed slots are skipped.
    pub fn public_nonces(&self) -> Vec<PubNonce> {
        self.nonces
            .iter()
            .flatten()
            .map(SecNonce::public_nonce)
            .collect()
    }

    /// Number of slots, consumed or not.
    pub fn len(&self) -> usize {
        self.nonces.len()
    }

    /// Whether there are no slots.
    pub fn is_empty(&self) -> bool {
        self.nonces.is_empty()
    }

    /// Removes the nonce for `input`. A nonce is never handed out twice.
    pub(crate) fn take(&mut self, input: usize) -> Option<SecNonce> {
        self.nonces.get_mut(input).and_then(Option::take)
    }
}

impl fmt::Debug for MusigNonces {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MusigNonces")
            .field("slots", &self.nonces.len())
            .field("available", &self.nonces.iter().flatten().count())
            .finish()
    }
}

/// The cosigner's contribution to a version 5 input.
#[derive(Debug, Clone)]
pub struct MuunMusigContribution {
    /// Cosigner public nonce.
    pub pub_nonce: PubNonce,

    /// Cosigner partial signature.
    pub partial_signature: PartialSignature,
}

impl MuunMusigContribution {
    /// Parses `pub nonce (66) || partial signature (32)`.
    pub fn parse(input: usize, blob: &[u8]) -> Result<Self, MalformedTransactionError> {
        let malformed = |reason: String| MalformedTransactionError::Signature { input, reason };

        if blob.len() != MUUN_MUSIG_BLOB_LEN {
            return Err(malformed(format!(
                "expected {MUUN_MUSIG_BLOB_LEN} bytes, found {}",
                blob.len()
            )));
        }

        let mut nonce_bytes = [0u8; PUB_NONCE_LEN];
        nonce_bytes.copy_from_slice(&blob[..PUB_NONCE_LEN]);
        let pub_nonce =
            PubNonce::try_from(nonce_bytes).map_err(|e| malformed(format!("nonce: {e}")))?;
        let partial_signature = PartialSignature::from_slice(&blob[PUB_NONCE_LEN..])
            .map_err(|e| malformed(format!("partial signature: {e}")))?;

        Ok(Self {
            pub_nonce,
            partial_signature,
        })
    }

    /// Serializes into the blob format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MUUN_MUSIG_BLOB_LEN);
        out.extend_from_slice(&self.pub_nonce.serialize());
        out.extend_from_slice(&self.partial_signature.serialize());
        out
    }
}

/// Signs a key-path spend of a version 5 output and aggregates the cosigner's contribution.
///
/// `key_agg` must be the untweaked aggregation of `[user, muun]`; the taproot tweak is applied
/// here.
pub(crate) fn sign_key_spend(
    input: usize,
    key_agg: KeyAggContext,
    user_secret: SecretKey,
    muun_public: PublicKey,
    sec_nonce: SecNonce,
    muun: &MuunMusigContribution,
    sighash: [u8; 32],
) -> Result<taproot::Signature, SignError> {
    let key_agg = key_agg
        .with_unspendable_taproot_tweak()
        .map_err(|e| SignError::Musig(e.to_string()))?;

    let user_pub_nonce = sec_nonce.public_nonce();
    let agg_nonce = AggNonce::sum([&user_pub_nonce, &muun.pub_nonce]);

    verify_partial(
        &key_agg,
        muun.partial_signature,
        &agg_nonce,
        muun_public,
        &muun.pub_nonce,
        sighash,
    )
    .map_err(|_| {
        error!(input, "cosigner partial signature does not verify");
        SignError::InvalidMuunSignature { input }
    })?;

    let user_partial: PartialSignature =
        sign_partial(&key_agg, user_secret, sec_nonce, &agg_nonce, sighash)
            .map_err(|e| SignError::Musig(e.to_string()))?;

    let signature: schnorr::Signature = aggregate_partial_signatures(
        &key_agg,
        &agg_nonce,
        [user_partial, muun.partial_signature],
        sighash,
    )
    .map_err(|e| SignError::Musig(e.to_string()))?;

    Ok(taproot::Signature {
        signature,
        sighash_type: TapSighashType::Default,
    })
}
