//! Signing of server-built transactions.
//!
//! The server proposes a transaction and describes each input: which of our addresses it spends,
//! and the cosigner's signature where one is needed. Before anything is signed every input
//! script is recomputed from our keys and the outputs are checked against what the user
//! approved. Signing yields a new transaction; the proposal itself is left untouched.

use bitcoin::{
    consensus,
    ecdsa,
    hashes::Hash,
    sighash::{Prevouts, SighashCache},
    Address, Amount, EcdsaSighashType, Network, OutPoint, ScriptBuf, TapSighashType, Transaction,
    TxOut, Witness,
};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use wallet_key_deriv::{WalletPrivateKey, WalletPublicKey};
use wallet_primitives::{bitcoin::BitcoinAddress, Satoshis};

use crate::{
    expectations::transaction_fee,
    musig::{sign_key_spend, MuunMusigContribution},
    scripts::{
        musig_key_agg, pubkey_hash, push_all_script, submarine_swap_v1_script,
        submarine_swap_v2_script, PREIMAGE_LEN,
    },
    AddressDescriptor, AddressKeys, AddressVersion, MalformedTransactionError, MusigNonces,
    SignError, SignatureValidationError, SigningExpectations,
};

/// Refund context of a first version submarine swap output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmarineSwapV1 {
    /// P2PKH address the refund must go to. Must be derived from the input's key.
    pub refund_address: String,

    /// Hash of the Lightning payment preimage.
    pub payment_hash: [u8; PREIMAGE_LEN],

    /// Swap server key.
    pub server_public_key: PublicKey,

    /// Block height after which the user can refund.
    pub locktime: u32,
}

/// Refund context of a second version submarine swap output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmarineSwapV2 {
    /// Hash of the Lightning payment preimage.
    pub payment_hash: [u8; PREIMAGE_LEN],

    /// Swap server key.
    pub server_public_key: PublicKey,

    /// Block height after which the user can refund alone.
    pub locktime: u32,
}

/// A submarine swap output being refunded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmarineSwap {
    /// Nested segwit swap, refunded by the user alone.
    V1(SubmarineSwapV1),

    /// Native segwit swap, refunded with the cosigner or alone after the timelock.
    V2(SubmarineSwapV2),
}

/// One input of a [`PartiallySignedTransaction`], as described by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuunInput {
    /// The output being spent.
    pub outpoint: OutPoint,

    /// Its value.
    pub amount: Satoshis,

    /// Version and key path of the address being spent.
    pub address: AddressDescriptor,

    /// The address as the server knows it. Must match what our keys derive.
    pub declared_address: String,

    /// Cosigner signature: DER plus sighash byte, or the MuSig2 blob for version 5.
    #[serde(default, with = "hex::serde")]
    pub muun_signature: Vec<u8>,

    /// Set when the input refunds a submarine swap.
    #[serde(default)]
    pub submarine_swap: Option<SubmarineSwap>,
}

impl MuunInput {
    fn muun_signature(&self) -> Option<&[u8]> {
        (!self.muun_signature.is_empty()).then_some(self.muun_signature.as_slice())
    }
}

/// A fully signed transaction, ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    transaction: Transaction,
}

impl SignedTransaction {
    /// The transaction.
    pub const fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Consumes the wrapper.
    pub fn into_transaction(self) -> Transaction {
        self.transaction
    }

    /// Consensus serialization as hex.
    pub fn hex(&self) -> String {
        consensus::encode::serialize_hex(&self.transaction)
    }

    /// The transaction id.
    pub fn txid(&self) -> bitcoin::Txid {
        self.transaction.compute_txid()
    }
}

/// A transaction proposed by the server, with the description of its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartiallySignedTransaction {
    /// Consensus-encoded unsigned transaction.
    pub hex_transaction: String,

    /// Descriptions of the inputs, in transaction order.
    pub inputs: Vec<MuunInput>,
}

pub(crate) const EMPTY: &[u8] = &[];

/// How an input is unlocked, recomputed from our keys.
enum Spend {
    P2pkh,
    P2shMultisig { redeem_script: ScriptBuf },
    NestedMultisig { witness_script: ScriptBuf },
    Multisig { witness_script: ScriptBuf },
    Taproot,
    SwapV1 { witness_script: ScriptBuf, locktime: u32 },
    SwapV2 { witness_script: ScriptBuf, locktime: u32 },
}

struct InputPlan {
    keys: AddressKeys,
    spend: Spend,
    prevout: TxOut,
}

impl PartiallySignedTransaction {
    /// Decodes the proposed transaction.
    pub fn transaction(&self) -> Result<Transaction, MalformedTransactionError> {
        decode_transaction(&self.hex_transaction)
    }

    /// Checks the proposal and signs every input.
    ///
    /// `user_key` and `muun_key` are the base keys of both parties. Version 5 inputs consume
    /// their nonce from `nonces`.
    pub fn sign(
        &self,
        user_key: &WalletPrivateKey,
        muun_key: &WalletPublicKey,
        expectations: &SigningExpectations,
        nonces: &mut MusigNonces,
        network: Network,
    ) -> Result<SignedTransaction, SignError> {
        let tx = self.transaction()?;

        if tx.input.len() != self.inputs.len() {
            return Err(MalformedTransactionError::InputCount {
                expected: self.inputs.len(),
                found: tx.input.len(),
            }
            .into());
        }

        let user_base = user_key.public_key();
        let mut plans = Vec::with_capacity(self.inputs.len());
        for (index, (txin, input)) in tx.input.iter().zip(&self.inputs).enumerate() {
            if txin.previous_output != input.outpoint {
                return Err(MalformedTransactionError::OutpointMismatch(index).into());
            }
            plans.push(plan_input(index, input, &user_base, muun_key, network)?);
        }

        let input_total = Satoshis::checked_sum(self.inputs.iter().map(|i| i.amount))
            .ok_or(MalformedTransactionError::ValueOverflow("input"))?;
        let fee = transaction_fee(&tx, input_total)?;
        let change_script = expectations
            .change
            .as_ref()
            .map(|change| change.derive(&user_base, muun_key, network))
            .transpose()?
            .map(|change| change.address.script_pubkey());
        expectations.verify(&tx, fee, change_script.as_ref())?;

        let prevouts: Vec<TxOut> = plans.iter().map(|p| p.prevout.clone()).collect();
        let mut signed = tx.clone();
        let mut cache = SighashCache::new(&tx);

        for (index, (input, plan)) in self.inputs.iter().zip(&plans).enumerate() {
            let secret = user_key.derive_to(&input.address.path)?.secret_key();
            let (script_sig, witness) = sign_input(
                index, &tx, input, plan, &secret, &prevouts, &mut cache, nonces,
            )?;
            signed.input[index].script_sig = script_sig;
            signed.input[index].witness = witness;
        }

        let signed = SignedTransaction {
            transaction: signed,
        };
        info!(txid = %signed.txid(), inputs = plans.len(), "signed transaction");
        Ok(signed)
    }
}

pub(crate) fn decode_transaction(
    hex_transaction: &str,
) -> Result<Transaction, MalformedTransactionError> {
    let bytes = hex::decode(hex_transaction.trim())
        .map_err(|e| MalformedTransactionError::Hex(e.to_string()))?;
    consensus::deserialize(&bytes).map_err(|e| MalformedTransactionError::Decode(e.to_string()))
}

fn plan_input(
    index: usize,
    input: &MuunInput,
    user_base: &WalletPublicKey,
    muun_base: &WalletPublicKey,
    network: Network,
) -> Result<InputPlan, SignError> {
    let keys = AddressKeys::derive(user_base, muun_base, &input.address.path)?;

    let (spend, address) = match &input.submarine_swap {
        None => {
            let address = keys.address(input.address.version, network)?;
            let spend = match input.address.version {
                AddressVersion::V1 => Spend::P2pkh,
                AddressVersion::V2 => Spend::P2shMultisig {
                    redeem_script: keys.multisig_script(),
                },
                AddressVersion::V3 => Spend::NestedMultisig {
                    witness_script: keys.multisig_script(),
                },
                AddressVersion::V4 => Spend::Multisig {
                    witness_script: keys.multisig_script(),
                },
                AddressVersion::V5 => Spend::Taproot,
            };
            (spend, address)
        }
        Some(SubmarineSwap::V1(swap)) => {
            let refund = BitcoinAddress::from_checked(
                Address::p2pkh(pubkey_hash(&keys.user), network),
                network,
            );
            if BitcoinAddress::parse(&swap.refund_address, network).ok() != Some(refund) {
                error!(input = index, refund_address = %swap.refund_address, "swap refund is not ours");
                return Err(SignatureValidationError::RefundAddressNotOurs(index).into());
            }

            let witness_script = submarine_swap_v1_script(
                &swap.payment_hash,
                &swap.server_public_key,
                swap.locktime,
                &pubkey_hash(&keys.user),
            );
            let address = BitcoinAddress::from_checked(
                Address::p2shwsh(&witness_script, network),
                network,
            );
            (
                Spend::SwapV1 {
                    witness_script,
                    locktime: swap.locktime,
                },
                address,
            )
        }
        Some(SubmarineSwap::V2(swap)) => {
            let witness_script = submarine_swap_v2_script(
                &swap.payment_hash,
                &keys.user,
                &keys.muun,
                &swap.server_public_key,
                swap.locktime,
            );
            let address =
                BitcoinAddress::from_checked(Address::p2wsh(&witness_script, network), network);
            (
                Spend::SwapV2 {
                    witness_script,
                    locktime: swap.locktime,
                },
                address,
            )
        }
    };

    if BitcoinAddress::parse(&input.declared_address, network).ok().as_ref() != Some(&address) {
        error!(
            input = index,
            declared = %input.declared_address,
            derived = %address,
            "input address does not derive from our keys"
        );
        return Err(SignatureValidationError::AddressMismatch {
            input: index,
            declared: input.declared_address.clone(),
            derived: address.to_string(),
        }
        .into());
    }

    let amount = input
        .amount
        .to_amount()
        .map_err(|e| MalformedTransactionError::Decode(e.to_string()))?;

    Ok(InputPlan {
        keys,
        spend,
        prevout: TxOut {
            value: amount,
            script_pubkey: address.script_pubkey(),
        },
    })
}

#[allow(clippy::too_many_arguments)]
fn sign_input(
    index: usize,
    tx: &Transaction,
    input: &MuunInput,
    plan: &InputPlan,
    secret: &SecretKey,
    prevouts: &[TxOut],
    cache: &mut SighashCache<&Transaction>,
    nonces: &mut MusigNonces,
) -> Result<(ScriptBuf, Witness), SignError> {
    let value = plan.prevout.value;
    let user_pub = plan.keys.user;
    let muun_pub = plan.keys.muun;

    match &plan.spend {
        Spend::P2pkh => {
            let message = legacy_message(cache, index, &plan.prevout.script_pubkey)?;
            let user_sig = sign_ecdsa(&message, secret);
            let script_sig = push_all_script(&[&user_sig.to_vec(), &user_pub.serialize()])?;
            Ok((script_sig, Witness::new()))
        }
        Spend::P2shMultisig { redeem_script } => {
            let message = legacy_message(cache, index, redeem_script)?;
            let muun_sig = muun_ecdsa(index, input, &message, &muun_pub)?;
            let user_sig = sign_ecdsa(&message, secret);
            let script_sig = push_all_script(&[
                EMPTY,
                &user_sig.to_vec(),
                &muun_sig.to_vec(),
                redeem_script.as_bytes(),
            ])?;
            Ok((script_sig, Witness::new()))
        }
        Spend::NestedMultisig { witness_script } | Spend::Multisig { witness_script } => {
            let message = segwit_message(cache, index, witness_script, value)?;
            let muun_sig = muun_ecdsa(index, input, &message, &muun_pub)?;
            let user_sig = sign_ecdsa(&message, secret);

            let mut witness = Witness::new();
            witness.push(EMPTY);
            witness.push(user_sig.to_vec());
            witness.push(muun_sig.to_vec());
            witness.push(witness_script.as_bytes());

            let script_sig = if matches!(plan.spend, Spend::NestedMultisig { .. }) {
                nested_script_sig(witness_script)?
            } else {
                ScriptBuf::new()
            };
            Ok((script_sig, witness))
        }
        Spend::Taproot => {
            let blob = input
                .muun_signature()
                .ok_or(SignError::NoMuunSignature { input: index })?;
            let contribution = MuunMusigContribution::parse(index, blob)?;
            let sec_nonce = nonces
                .take(index)
                .ok_or(SignError::MissingNonce { input: index })?;

            let sighash = cache
                .taproot_key_spend_signature_hash(
                    index,
                    &Prevouts::All(prevouts),
                    TapSighashType::Default,
                )
                .map_err(|e| SignError::Sighash(e.to_string()))?;

            let signature = sign_key_spend(
                index,
                musig_key_agg(&user_pub, &muun_pub)?,
                *secret,
                muun_pub,
                sec_nonce,
                &contribution,
                sighash.to_byte_array(),
            )?;

            let mut witness = Witness::new();
            witness.push(signature.to_vec());
            Ok((ScriptBuf::new(), witness))
        }
        Spend::SwapV1 {
            witness_script,
            locktime,
        } => {
            if tx.lock_time.to_consensus_u32() < *locktime {
                return Err(SignError::LocktimeNotReached {
                    input: index,
                    locktime: *locktime,
                });
            }

            let message = segwit_message(cache, index, witness_script, value)?;
            let user_sig = sign_ecdsa(&message, secret);

            let mut witness = Witness::new();
            witness.push(user_sig.to_vec());
            witness.push(user_pub.serialize());
            witness.push(EMPTY);
            witness.push(witness_script.as_bytes());
            Ok((nested_script_sig(witness_script)?, witness))
        }
        Spend::SwapV2 {
            witness_script,
            locktime,
        } => {
            let message = segwit_message(cache, index, witness_script, value)?;
            let user_sig = sign_ecdsa(&message, secret);

            let mut witness = Witness::new();
            if input.muun_signature().is_some() {
                let muun_sig = muun_ecdsa(index, input, &message, &muun_pub)?;
                witness.push(muun_sig.to_vec());
                witness.push([1u8]);
                witness.push(user_sig.to_vec());
            } else if tx.lock_time.to_consensus_u32() >= *locktime {
                debug!(input = index, "refunding swap unilaterally");
                witness.push(EMPTY);
                witness.push(user_sig.to_vec());
            } else {
                return Err(SignError::NoMuunSignature { input: index });
            }
            witness.push(EMPTY);
            witness.push(witness_script.as_bytes());
            Ok((ScriptBuf::new(), witness))
        }
    }
}

fn legacy_message(
    cache: &SighashCache<&Transaction>,
    index: usize,
    script_code: &ScriptBuf,
) -> Result<Message, SignError> {
    let sighash = cache
        .legacy_signature_hash(index, script_code, EcdsaSighashType::All.to_u32())
        .map_err(|e| SignError::Sighash(e.to_string()))?;
    Ok(Message::from_digest(sighash.to_byte_array()))
}

pub(crate) fn segwit_message(
    cache: &mut SighashCache<&Transaction>,
    index: usize,
    witness_script: &ScriptBuf,
    value: Amount,
) -> Result<Message, SignError> {
    let sighash = cache
        .p2wsh_signature_hash(index, witness_script, value, EcdsaSighashType::All)
        .map_err(|e| SignError::Sighash(e.to_string()))?;
    Ok(Message::from_digest(sighash.to_byte_array()))
}

pub(crate) fn sign_ecdsa(message: &Message, secret: &SecretKey) -> ecdsa::Signature {
    ecdsa::Signature {
        signature: SECP256K1.sign_ecdsa(message, secret),
        sighash_type: EcdsaSighashType::All,
    }
}

/// Parses and verifies the cosigner signature of an input.
fn muun_ecdsa(
    index: usize,
    input: &MuunInput,
    message: &Message,
    muun_pub: &PublicKey,
) -> Result<ecdsa::Signature, SignError> {
    let bytes = input
        .muun_signature()
        .ok_or(SignError::NoMuunSignature { input: index })?;
    let signature = ecdsa::Signature::from_slice(bytes).map_err(|e| {
        MalformedTransactionError::Signature {
            input: index,
            reason: e.to_string(),
        }
    })?;

    if SECP256K1
        .verify_ecdsa(message, &signature.signature, muun_pub)
        .is_err()
    {
        error!(input = index, "cosigner signature does not verify");
        return Err(SignError::InvalidMuunSignature { input: index });
    }

    Ok(signature)
}

fn nested_script_sig(witness_script: &ScriptBuf) -> Result<ScriptBuf, MalformedTransactionError> {
    let redeem_script = ScriptBuf::new_p2wsh(&witness_script.wscript_hash());
    push_all_script(&[redeem_script.as_bytes()])
}
