//! Deterministic keys and incoming swaps.

use bitcoin::{
    absolute::LockTime, ecdsa, hashes::Hash, sighash::SighashCache, transaction::Version, Amount,
    EcdsaSighashType, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
};
use rand::{rngs::StdRng, SeedableRng};
use secp256k1::{Keypair, Message, SECP256K1};
use wallet_key_deriv::WalletPrivateKey;
use wallet_primitives::{DerivationSchema, NamedPath, Satoshis};
use wallet_signer::{
    scripts::incoming_swap_htlc_script, AddressDescriptor, AddressKeys, AddressVersion,
    FulfillmentData, IncomingSwap, IncomingSwapHtlc, InvoiceSecret,
};

/// Network of every fixture.
pub const NETWORK: Network = Network::Regtest;

/// Chain height at which [`incoming_swap`] is safely claimable.
pub const CURRENT_HEIGHT: u32 = 900;

/// Expiration height of the [`incoming_swap`] HTLC.
pub const HTLC_EXPIRATION_HEIGHT: u32 = 1_000;

/// Value locked in the [`incoming_swap`] HTLC.
pub const HTLC_VALUE: Amount = Amount::from_sat(50_000);

const HTLC_OUTPUT_INDEX: u32 = 1;
const INVOICE_INDEX: u32 = 3;

fn base_key(seed: u8) -> WalletPrivateKey {
    WalletPrivateKey::from_seed(&[seed; 32], NETWORK)
        .and_then(|root| root.derive_to_schema(DerivationSchema::Base))
        .expect("fixture seeds derive")
}

/// The user's base private key.
pub fn user_base_key() -> WalletPrivateKey {
    base_key(41)
}

/// The cosigner's base private key.
pub fn muun_base_key() -> WalletPrivateKey {
    base_key(42)
}

/// The swap server's base private key.
pub fn swap_server_base_key() -> WalletPrivateKey {
    base_key(43)
}

/// Key pair the swap server reclaims HTLCs with.
pub fn swap_server_keypair() -> Keypair {
    Keypair::from_seckey_slice(SECP256K1, &[88u8; 32]).expect("valid secret key")
}

/// The secret of the invoice paid by the swap fixtures.
pub fn invoice_secret() -> InvoiceSecret {
    InvoiceSecret::generate_with(&mut StdRng::seed_from_u64(7), INVOICE_INDEX)
        .expect("invoice index is not hardened")
}

/// Where the claim of [`incoming_swap`] pays to.
pub fn claim_output_path() -> NamedPath {
    DerivationSchema::External
        .path()
        .child_index(0)
        .expect("index is not hardened")
}

fn htlc_script() -> ScriptBuf {
    let secret = invoice_secret();
    let keys = AddressKeys::derive(
        &user_base_key().public_key(),
        &muun_base_key().public_key(),
        secret.key_path(),
    )
    .expect("invoice keys derive");

    incoming_swap_htlc_script(
        secret.payment_hash(),
        &keys.user,
        &keys.muun,
        &swap_server_keypair().public_key(),
        HTLC_EXPIRATION_HEIGHT,
    )
}

/// An on-chain incoming swap for [`invoice_secret`], claimable at [`CURRENT_HEIGHT`].
pub fn incoming_swap() -> IncomingSwap {
    let htlc_tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: Txid::from_byte_array([3u8; 32]),
                vout: 0,
            },
            ..Default::default()
        }],
        output: vec![
            TxOut {
                value: Amount::from_sat(12_345),
                script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
            },
            TxOut {
                value: HTLC_VALUE,
                script_pubkey: ScriptBuf::new_p2wsh(&htlc_script().wscript_hash()),
            },
        ],
    };

    IncomingSwap::new(
        "incoming-swap-1".to_string(),
        *invoice_secret().payment_hash(),
        Satoshis::new(52_000),
        Satoshis::new(2_000),
        Some(IncomingSwapHtlc {
            htlc_tx,
            output_index: HTLC_OUTPUT_INDEX,
            expiration_height: HTLC_EXPIRATION_HEIGHT,
            swap_server_public_key: swap_server_keypair().public_key(),
            fulfillment_fee_subsidy: Satoshis::new(1_000),
        }),
    )
}

/// A swap for [`invoice_secret`] settled against debt.
pub fn full_debt_swap() -> IncomingSwap {
    IncomingSwap::new(
        "incoming-swap-debt".to_string(),
        *invoice_secret().payment_hash(),
        Satoshis::new(10_000),
        Satoshis::new(10_000),
        None,
    )
}

/// What the server would send to claim `swap`: a template paying the HTLC to the user's V4
/// address, signed by the cosigner.
pub fn fulfillment_data(swap: &IncomingSwap) -> FulfillmentData {
    let htlc = swap.htlc.as_ref().expect("swap has an htlc");
    let destination = AddressDescriptor::new(AddressVersion::V4, claim_output_path())
        .derive(
            &user_base_key().public_key(),
            &muun_base_key().public_key(),
            NETWORK,
        )
        .expect("claim address derives");

    let template = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: htlc.htlc_tx.compute_txid(),
                vout: htlc.output_index,
            },
            sequence: Sequence::MAX,
            ..Default::default()
        }],
        output: vec![TxOut {
            value: HTLC_VALUE - Amount::from_sat(500),
            script_pubkey: destination.address.script_pubkey(),
        }],
    };

    let sighash = SighashCache::new(&template)
        .p2wsh_signature_hash(0, &htlc_script(), HTLC_VALUE, EcdsaSighashType::All)
        .expect("template has the input");
    let muun_secret = muun_base_key()
        .derive_to(invoice_secret().key_path())
        .expect("invoice keys derive")
        .secret_key();
    let message = Message::from_digest(sighash.to_byte_array());
    let signature = ecdsa::Signature {
        signature: SECP256K1.sign_ecdsa(&message, &muun_secret),
        sighash_type: EcdsaSighashType::All,
    };

    FulfillmentData {
        fulfillment_tx_hex: bitcoin::consensus::encode::serialize_hex(&template),
        muun_signature: signature.to_vec(),
        output_path: claim_output_path(),
        output_version: AddressVersion::V4,
    }
}
