//! Locking scripts for every contract the wallet can spend from.

use bitcoin::{
    hashes::Hash,
    opcodes::all::{
        OP_CHECKMULTISIG, OP_CHECKSIG, OP_CHECKSIGVERIFY, OP_CLTV, OP_DROP, OP_DUP, OP_ELSE,
        OP_ENDIF, OP_EQUAL, OP_EQUALVERIFY, OP_HASH160, OP_IF, OP_SHA256, OP_SIZE,
    },
    script::{Builder, PushBytesBuf},
    CompressedPublicKey, PubkeyHash, ScriptBuf,
};
use musig2::KeyAggContext;
use secp256k1::PublicKey;

use crate::{MalformedTransactionError, SignError};

/// Length of payment preimages and hashes.
pub const PREIMAGE_LEN: usize = 32;

/// 2-of-2 multisig between the user and the cosigner, user key first.
pub fn multisig_script(user: &PublicKey, muun: &PublicKey) -> ScriptBuf {
    Builder::new()
        .push_int(2)
        .push_key(&bitcoin::PublicKey::new(*user))
        .push_key(&bitcoin::PublicKey::new(*muun))
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

/// Hash of a compressed public key, as used by P2PKH outputs.
pub fn pubkey_hash(key: &PublicKey) -> PubkeyHash {
    CompressedPublicKey(*key).pubkey_hash()
}

/// Submarine swap contract, first version.
///
/// The swap server claims with the preimage; the user refunds alone once `locktime` passes.
pub fn submarine_swap_v1_script(
    payment_hash: &[u8; PREIMAGE_LEN],
    server: &PublicKey,
    locktime: u32,
    refund_pubkey_hash: &PubkeyHash,
) -> ScriptBuf {
    Builder::new()
        .push_opcode(OP_IF)
        .push_opcode(OP_SHA256)
        .push_slice(payment_hash)
        .push_opcode(OP_EQUALVERIFY)
        .push_key(&bitcoin::PublicKey::new(*server))
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_int(i64::from(locktime))
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(refund_pubkey_hash.to_byte_array())
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ENDIF)
        .into_script()
}

/// Submarine swap contract, second version.
///
/// The swap server claims with the preimage. The user refunds with the cosigner at any time, or
/// alone once `locktime` passes.
pub fn submarine_swap_v2_script(
    payment_hash: &[u8; PREIMAGE_LEN],
    user: &PublicKey,
    muun: &PublicKey,
    server: &PublicKey,
    locktime: u32,
) -> ScriptBuf {
    Builder::new()
        .push_opcode(OP_IF)
        .push_opcode(OP_SIZE)
        .push_int(PREIMAGE_LEN as i64)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_SHA256)
        .push_slice(payment_hash)
        .push_opcode(OP_EQUALVERIFY)
        .push_key(&bitcoin::PublicKey::new(*server))
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_key(&bitcoin::PublicKey::new(*user))
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_opcode(OP_IF)
        .push_key(&bitcoin::PublicKey::new(*muun))
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_int(i64::from(locktime))
        .push_opcode(OP_CLTV)
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_ENDIF)
        .into_script()
}

/// Incoming swap HTLC.
///
/// The wallet claims with the preimage and both its keys; the swap server reclaims alone after
/// `expiration_height`.
pub fn incoming_swap_htlc_script(
    payment_hash: &[u8; PREIMAGE_LEN],
    user: &PublicKey,
    muun: &PublicKey,
    server: &PublicKey,
    expiration_height: u32,
) -> ScriptBuf {
    Builder::new()
        .push_opcode(OP_SIZE)
        .push_int(PREIMAGE_LEN as i64)
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        .push_opcode(OP_SHA256)
        .push_slice(payment_hash)
        .push_opcode(OP_EQUALVERIFY)
        .push_int(2)
        .push_key(&bitcoin::PublicKey::new(*user))
        .push_key(&bitcoin::PublicKey::new(*muun))
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .push_opcode(OP_ELSE)
        .push_opcode(OP_DROP)
        .push_int(i64::from(expiration_height))
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_key(&bitcoin::PublicKey::new(*server))
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ENDIF)
        .into_script()
}

/// MuSig2 key aggregation of the user and cosigner keys, user first, without tweak.
pub fn musig_key_agg(user: &PublicKey, muun: &PublicKey) -> Result<KeyAggContext, SignError> {
    KeyAggContext::new([*user, *muun]).map_err(|e| SignError::Musig(e.to_string()))
}

/// A script-sig pushing each element in order.
pub(crate) fn push_all_script(
    items: &[&[u8]],
) -> Result<ScriptBuf, MalformedTransactionError> {
    let mut builder = Builder::new();
    for item in items {
        let bytes = PushBytesBuf::try_from(item.to_vec())
            .map_err(|_| MalformedTransactionError::ScriptTooLarge)?;
        builder = builder.push_slice(bytes);
    }
    Ok(builder.into_script())
}

#[cfg(test)]
mod tests {
    use bitcoin::{script::Instruction, secp256k1::SecretKey};
    use secp256k1::SECP256K1;

    use super::*;

    fn key(byte: u8) -> PublicKey {
        PublicKey::from_secret_key(SECP256K1, &SecretKey::from_slice(&[byte; 32]).unwrap())
    }

    #[test]
    fn multisig_orders_user_first() {
        let script = multisig_script(&key(1), &key(2));
        let pushes: Vec<Vec<u8>> = script
            .instructions()
            .filter_map(|i| match i.unwrap() {
                Instruction::PushBytes(b) if b.len() == 33 => Some(b.as_bytes().to_vec()),
                _ => None,
            })
            .collect();
        assert_eq!(pushes, vec![key(1).serialize().to_vec(), key(2).serialize().to_vec()]);
    }

    #[test]
    fn htlc_commits_to_hash_and_expiry() {
        let hash = [7u8; 32];
        let a = incoming_swap_htlc_script(&hash, &key(1), &key(2), &key(3), 800_000);
        let b = incoming_swap_htlc_script(&hash, &key(1), &key(2), &key(3), 800_001);
        let c = incoming_swap_htlc_script(&[8u8; 32], &key(1), &key(2), &key(3), 800_000);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(a.as_bytes().windows(32).any(|w| w == hash));
    }

    #[test]
    fn swap_scripts_differ_per_version() {
        let hash = [1u8; 32];
        let v1 = submarine_swap_v1_script(&hash, &key(3), 100, &pubkey_hash(&key(1)));
        let v2 = submarine_swap_v2_script(&hash, &key(1), &key(2), &key(3), 100);
        assert_ne!(v1, v2);
        assert_ne!(v1.script_hash(), v2.script_hash());
    }

    #[test]
    fn key_aggregation_depends_on_order() {
        let ab: PublicKey = musig_key_agg(&key(1), &key(2)).unwrap().aggregated_pubkey();
        let ba: PublicKey = musig_key_agg(&key(2), &key(1)).unwrap().aggregated_pubkey();
        assert_ne!(ab, ba);
    }

    #[test]
    fn push_all_builds_script_sig() {
        let script = push_all_script(&[&[1u8, 2, 3], &[4u8; 33]]).unwrap();
        assert_eq!(script.instructions().count(), 2);
    }
}
