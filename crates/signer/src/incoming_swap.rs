//! Claiming inbound Lightning payments.
//!
//! The swap server locks the payment on chain in an HTLC that the wallet spends with the invoice
//! preimage and both its keys. When the wallet owes the server at least the payment amount there
//! is no HTLC and revealing the preimage settles the debt instead.
//!
//! A swap is fulfilled at most once: the first successful fulfillment is cached and every later
//! call hands it back without signing again.

use std::{
    fmt,
    sync::{Mutex, PoisonError},
};

use bitcoin::{
    ecdsa,
    hashes::{sha256, Hash},
    sighash::SighashCache,
    Network, OutPoint, ScriptBuf, Transaction, Witness,
};
use rand::{rngs::OsRng, RngCore};
use secp256k1::{PublicKey, SECP256K1};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use wallet_key_deriv::{WalletPrivateKey, WalletPublicKey};
use wallet_primitives::{DerivationSchema, NamedPath, PathError, Satoshis};
use zeroize::Zeroize;

use crate::{
    psbt::{decode_transaction, segwit_message, sign_ecdsa, EMPTY},
    scripts::{incoming_swap_htlc_script, PREIMAGE_LEN},
    AddressDescriptor, AddressKeys, AddressVersion, FulfillmentError, MalformedTransactionError,
};

/// Blocks that must remain before the HTLC expires for a claim to be attempted.
pub const EXPIRATION_SAFETY_MARGIN: u32 = 6;

/// The preimage behind an invoice, with the path of the keys that lock its HTLC.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSecret {
    #[serde(with = "hex::serde")]
    preimage: [u8; PREIMAGE_LEN],

    #[serde(with = "hex::serde")]
    payment_hash: [u8; PREIMAGE_LEN],

    key_path: NamedPath,
}

impl InvoiceSecret {
    /// Generates a fresh secret for the invoice key at `index`.
    pub fn generate(index: u32) -> Result<Self, PathError> {
        Self::generate_with(&mut OsRng, index)
    }

    /// Generates a secret from `rng`.
    pub fn generate_with<R: RngCore>(rng: &mut R, index: u32) -> Result<Self, PathError> {
        let mut preimage = [0u8; PREIMAGE_LEN];
        rng.fill_bytes(&mut preimage);
        let key_path = DerivationSchema::Invoices.path().child_index(index)?;
        Ok(Self::from_preimage(preimage, key_path))
    }

    /// Rebuilds a secret from its preimage.
    pub fn from_preimage(preimage: [u8; PREIMAGE_LEN], key_path: NamedPath) -> Self {
        Self {
            preimage,
            payment_hash: sha256::Hash::hash(&preimage).to_byte_array(),
            key_path,
        }
    }

    /// The preimage.
    pub const fn preimage(&self) -> &[u8; PREIMAGE_LEN] {
        &self.preimage
    }

    /// SHA-256 of the preimage.
    pub const fn payment_hash(&self) -> &[u8; PREIMAGE_LEN] {
        &self.payment_hash
    }

    /// Path of the user and cosigner keys of the HTLC.
    pub const fn key_path(&self) -> &NamedPath {
        &self.key_path
    }
}

impl fmt::Debug for InvoiceSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvoiceSecret")
            .field("payment_hash", &hex::encode(self.payment_hash))
            .field("key_path", &self.key_path)
            .finish_non_exhaustive()
    }
}

impl Drop for InvoiceSecret {
    fn drop(&mut self) {
        self.preimage.zeroize();
    }
}

/// The on-chain side of an incoming swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingSwapHtlc {
    /// Transaction funding the HTLC.
    pub htlc_tx: Transaction,

    /// Index of the HTLC output in [`Self::htlc_tx`].
    pub output_index: u32,

    /// Block height after which the server can reclaim the HTLC.
    pub expiration_height: u32,

    /// Key the server reclaims with.
    pub swap_server_public_key: PublicKey,

    /// Fee the server contributes to the claim.
    pub fulfillment_fee_subsidy: Satoshis,
}

impl IncomingSwapHtlc {
    fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.htlc_tx.compute_txid(),
            vout: self.output_index,
        }
    }
}

/// Result of a fulfillment.
#[derive(Clone, PartialEq, Eq)]
pub struct Fulfillment {
    preimage: [u8; PREIMAGE_LEN],
    transaction: Option<Transaction>,
}

impl Fulfillment {
    /// Rebuilds a fulfillment recorded earlier.
    pub const fn new(preimage: [u8; PREIMAGE_LEN], transaction: Option<Transaction>) -> Self {
        Self {
            preimage,
            transaction,
        }
    }

    /// The revealed preimage, the proof of payment.
    pub const fn preimage(&self) -> &[u8; PREIMAGE_LEN] {
        &self.preimage
    }

    /// The signed claim transaction. `None` for debt settlements.
    pub const fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }
}

impl fmt::Debug for Fulfillment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fulfillment")
            .field("txid", &self.transaction.as_ref().map(Transaction::compute_txid))
            .finish_non_exhaustive()
    }
}

/// What the server sends to claim an HTLC: the unsigned template and its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentData {
    /// Consensus-encoded template spending the HTLC.
    pub fulfillment_tx_hex: String,

    /// Cosigner signature over the template's only input, DER plus sighash byte.
    #[serde(with = "hex::serde")]
    pub muun_signature: Vec<u8>,

    /// Key path of the wallet address the template pays.
    pub output_path: NamedPath,

    /// Version of that address.
    pub output_version: AddressVersion,
}

/// An inbound Lightning payment.
#[derive(Debug)]
pub struct IncomingSwap {
    /// Server identifier.
    pub uuid: String,

    /// Hash of the invoice preimage.
    pub payment_hash: [u8; PREIMAGE_LEN],

    /// Amount the payer sent.
    pub payment_amount: Satoshis,

    /// Debt collected by the server out of the payment.
    pub collect: Satoshis,

    /// The HTLC, absent when the payment settles debt.
    pub htlc: Option<IncomingSwapHtlc>,

    fulfillment: Mutex<Option<Fulfillment>>,
}

impl IncomingSwap {
    /// Creates an unfulfilled swap.
    pub const fn new(
        uuid: String,
        payment_hash: [u8; PREIMAGE_LEN],
        payment_amount: Satoshis,
        collect: Satoshis,
        htlc: Option<IncomingSwapHtlc>,
    ) -> Self {
        Self {
            uuid,
            payment_hash,
            payment_amount,
            collect,
            htlc,
            fulfillment: Mutex::new(None),
        }
    }

    /// Whether the swap settles debt rather than paying on chain.
    pub const fn is_full_debt(&self) -> bool {
        self.htlc.is_none()
    }

    /// The cached fulfillment, if any.
    pub fn fulfillment(&self) -> Option<Fulfillment> {
        self.fulfillment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Checks that the HTLC can be claimed safely with `secret` at `current_height`.
    pub fn verify_fulfillable(
        &self,
        secret: &InvoiceSecret,
        user_base: &WalletPublicKey,
        muun_base: &WalletPublicKey,
        current_height: u32,
    ) -> Result<(), FulfillmentError> {
        let result = self.check_fulfillable(secret, user_base, muun_base, current_height);
        if let Err(e) = &result {
            error!(
                uuid = %self.uuid,
                payment_hash = %hex::encode(self.payment_hash),
                current_height,
                error = %e,
                "incoming swap is not fulfillable"
            );
        }
        result.map(|_| ())
    }

    /// Returns the HTLC keys and witness script once every check passed.
    fn check_fulfillable(
        &self,
        secret: &InvoiceSecret,
        user_base: &WalletPublicKey,
        muun_base: &WalletPublicKey,
        current_height: u32,
    ) -> Result<Option<(AddressKeys, ScriptBuf)>, FulfillmentError> {
        if secret.payment_hash() != &self.payment_hash {
            return Err(FulfillmentError::UnknownInvoice(hex::encode(
                self.payment_hash,
            )));
        }

        let Some(htlc) = &self.htlc else {
            return Ok(None);
        };

        let output = htlc
            .htlc_tx
            .output
            .get(htlc.output_index as usize)
            .ok_or(FulfillmentError::HtlcOutputMissing(htlc.output_index))?;

        let keys = AddressKeys::derive(user_base, muun_base, secret.key_path())?;
        let script = incoming_swap_htlc_script(
            &self.payment_hash,
            &keys.user,
            &keys.muun,
            &htlc.swap_server_public_key,
            htlc.expiration_height,
        );
        if output.script_pubkey != ScriptBuf::new_p2wsh(&script.wscript_hash()) {
            return Err(FulfillmentError::HtlcScriptMismatch);
        }

        let value = Satoshis::from(output.value);
        let expected = self
            .payment_amount
            .checked_sub(self.collect)
            .ok_or(MalformedTransactionError::ValueOverflow("payment"))?;
        if value < expected {
            return Err(FulfillmentError::AmountMismatch {
                expected,
                found: value,
            });
        }

        if htlc.fulfillment_fee_subsidy > value {
            return Err(FulfillmentError::FeeSubsidyTooLarge {
                subsidy: htlc.fulfillment_fee_subsidy,
                value,
            });
        }

        if htlc.expiration_height <= current_height.saturating_add(EXPIRATION_SAFETY_MARGIN) {
            return Err(FulfillmentError::ExpiresTooSoon {
                expiration: htlc.expiration_height,
                current: current_height,
            });
        }

        Ok(Some((keys, script)))
    }

    /// Claims the HTLC by signing the server's template.
    ///
    /// `user_key` is the user's base private key. Returns the cached fulfillment if the swap was
    /// already fulfilled.
    #[allow(clippy::too_many_arguments)]
    pub fn fulfill(
        &self,
        data: &FulfillmentData,
        secret: &InvoiceSecret,
        user_key: &WalletPrivateKey,
        muun_base: &WalletPublicKey,
        current_height: u32,
        network: Network,
    ) -> Result<Fulfillment, FulfillmentError> {
        let mut cached = self
            .fulfillment
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(fulfillment) = cached.as_ref() {
            debug!(uuid = %self.uuid, "incoming swap already fulfilled");
            return Ok(fulfillment.clone());
        }

        let htlc = self.htlc.as_ref().ok_or(FulfillmentError::WrongPath)?;
        let user_base = user_key.public_key();
        let result = self.check_fulfillable(secret, &user_base, muun_base, current_height);
        let Some((keys, script)) = result.inspect_err(|e| {
            error!(uuid = %self.uuid, error = %e, "incoming swap is not fulfillable");
        })?
        else {
            return Err(FulfillmentError::WrongPath);
        };

        let template = decode_transaction(&data.fulfillment_tx_hex)?;
        let destination = AddressDescriptor::new(data.output_version, data.output_path.clone())
            .derive(&user_base, muun_base, network)?;
        let claims_to_us = template.input.len() == 1
            && template.input[0].previous_output == htlc.outpoint()
            && template.output.len() == 1
            && template.output[0].script_pubkey == destination.address.script_pubkey();
        if !claims_to_us {
            error!(
                uuid = %self.uuid,
                txid = %template.compute_txid(),
                "fulfillment template does not claim the HTLC to the wallet"
            );
            return Err(FulfillmentError::UnexpectedTemplate);
        }

        let htlc_value = htlc.htlc_tx.output[htlc.output_index as usize].value;
        let Some(fee) = htlc_value.checked_sub(template.output[0].value) else {
            error!(uuid = %self.uuid, "fulfillment template pays out more than the HTLC holds");
            return Err(FulfillmentError::UnexpectedTemplate);
        };
        let fee = Satoshis::from(fee);
        if fee > htlc.fulfillment_fee_subsidy {
            error!(
                uuid = %self.uuid,
                %fee,
                subsidy = %htlc.fulfillment_fee_subsidy,
                "fulfillment template overpays fees"
            );
            return Err(FulfillmentError::FeeAboveSubsidy {
                fee,
                subsidy: htlc.fulfillment_fee_subsidy,
            });
        }

        let message = segwit_message(&mut SighashCache::new(&template), 0, &script, htlc_value)?;

        let muun_sig = ecdsa::Signature::from_slice(&data.muun_signature).map_err(|e| {
            MalformedTransactionError::Signature {
                input: 0,
                reason: e.to_string(),
            }
        })?;
        if SECP256K1
            .verify_ecdsa(&message, &muun_sig.signature, &keys.muun)
            .is_err()
        {
            error!(uuid = %self.uuid, "cosigner signature for the HTLC does not verify");
            return Err(FulfillmentError::InvalidMuunSignature);
        }

        let user_secret = user_key.derive_to(secret.key_path())?.secret_key();
        let user_sig = sign_ecdsa(&message, &user_secret);

        let mut witness = Witness::new();
        witness.push(EMPTY);
        witness.push(user_sig.to_vec());
        witness.push(muun_sig.to_vec());
        witness.push(secret.preimage());
        witness.push(script.as_bytes());

        let mut signed = template;
        signed.input[0].witness = witness;

        let fulfillment = Fulfillment {
            preimage: *secret.preimage(),
            transaction: Some(signed),
        };
        info!(
            uuid = %self.uuid,
            txid = ?fulfillment.transaction().map(Transaction::compute_txid),
            "fulfilled incoming swap on chain"
        );
        *cached = Some(fulfillment.clone());
        Ok(fulfillment)
    }

    /// Settles the payment against debt by revealing the preimage.
    pub fn fulfill_full_debt(
        &self,
        secret: &InvoiceSecret,
    ) -> Result<Fulfillment, FulfillmentError> {
        let mut cached = self
            .fulfillment
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(fulfillment) = cached.as_ref() {
            debug!(uuid = %self.uuid, "incoming swap already fulfilled");
            return Ok(fulfillment.clone());
        }

        if self.htlc.is_some() {
            return Err(FulfillmentError::WrongPath);
        }
        if secret.payment_hash() != &self.payment_hash {
            return Err(FulfillmentError::UnknownInvoice(hex::encode(
                self.payment_hash,
            )));
        }

        let fulfillment = Fulfillment {
            preimage: *secret.preimage(),
            transaction: None,
        };
        info!(uuid = %self.uuid, "fulfilled incoming swap against debt");
        *cached = Some(fulfillment.clone());
        Ok(fulfillment)
    }
}
