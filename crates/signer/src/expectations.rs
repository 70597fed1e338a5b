//! What the user approved, checked against what the transaction actually does.

use bitcoin::{ScriptBuf, Transaction};
use tracing::error;
use wallet_primitives::{bitcoin::BitcoinAddress, Satoshis};

use crate::{AddressDescriptor, MalformedTransactionError, SignatureValidationError};

/// The user-approved outcome of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningExpectations {
    /// Where the payment goes.
    pub destination: BitcoinAddress,

    /// How much the destination receives.
    pub amount: Satoshis,

    /// Total fee paid.
    pub fee: Satoshis,

    /// The change output, if any, identified by the keys it must be derived from.
    pub change: Option<AddressDescriptor>,
}

impl SigningExpectations {
    /// Checks `tx` against the expectations.
    ///
    /// `change_script` is the locking script of [`Self::change`] derived from our keys, and
    /// `fee` is what the transaction pays, see [`transaction_fee`].
    pub(crate) fn verify(
        &self,
        tx: &Transaction,
        fee: Satoshis,
        change_script: Option<&ScriptBuf>,
    ) -> Result<(), SignatureValidationError> {
        let result = self.check(tx, fee, change_script);
        if let Err(e) = &result {
            error!(
                txid = %tx.compute_txid(),
                destination = %self.destination,
                amount = %self.amount,
                fee = %self.fee,
                error = %e,
                "transaction does not match the approved payment, refusing to sign"
            );
        }
        result
    }

    fn check(
        &self,
        tx: &Transaction,
        fee: Satoshis,
        change_script: Option<&ScriptBuf>,
    ) -> Result<(), SignatureValidationError> {
        let destination_script = self.destination.script_pubkey();
        let mut destination_seen = false;
        let mut change_seen = false;

        for (index, output) in tx.output.iter().enumerate() {
            if output.script_pubkey == destination_script && !destination_seen {
                let found = Satoshis::from(output.value);
                if found != self.amount {
                    return Err(SignatureValidationError::AmountMismatch {
                        expected: self.amount,
                        found,
                    });
                }
                destination_seen = true;
            } else if output.script_pubkey == destination_script {
                return Err(SignatureValidationError::DuplicateDestination(
                    self.destination.to_string(),
                ));
            } else if change_script == Some(&output.script_pubkey) && !change_seen {
                change_seen = true;
            } else {
                return Err(SignatureValidationError::UnexpectedOutput(index));
            }
        }

        if !destination_seen {
            return Err(SignatureValidationError::DestinationNotFound(
                self.destination.to_string(),
            ));
        }

        if self.change.is_some() != change_seen {
            return Err(SignatureValidationError::ChangeMismatch);
        }

        if fee != self.fee {
            return Err(SignatureValidationError::FeeMismatch {
                expected: self.fee,
                found: fee,
            });
        }

        Ok(())
    }
}

/// Sum of `input_total` minus the outputs of `tx`.
pub(crate) fn transaction_fee(
    tx: &Transaction,
    input_total: Satoshis,
) -> Result<Satoshis, MalformedTransactionError> {
    let output_total = Satoshis::checked_sum(tx.output.iter().map(|o| Satoshis::from(o.value)))
        .ok_or(MalformedTransactionError::ValueOverflow("output"))?;
    input_total
        .checked_sub(output_total)
        .ok_or(MalformedTransactionError::ValueOverflow("fee"))
}

#[cfg(test)]
mod tests {
    use bitcoin::{
        absolute::LockTime, transaction::Version, Address, Amount, Network, TxOut,
    };
    use wallet_primitives::NamedPath;

    use super::*;
    use crate::AddressVersion;

    fn address(byte: u8) -> BitcoinAddress {
        let script = ScriptBuf::from_bytes(vec![0x51, byte]);
        BitcoinAddress::from_checked(Address::p2wsh(&script, Network::Regtest), Network::Regtest)
    }

    fn tx(outputs: &[(&ScriptBuf, u64)]) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![],
            output: outputs
                .iter()
                .map(|(script, value)| TxOut {
                    value: Amount::from_sat(*value),
                    script_pubkey: (*script).clone(),
                })
                .collect(),
        }
    }

    fn expectations(change: bool) -> SigningExpectations {
        SigningExpectations {
            destination: address(1),
            amount: Satoshis::new(50_000),
            fee: Satoshis::new(1_000),
            change: change.then(|| {
                AddressDescriptor::new(AddressVersion::V4, NamedPath::root())
            }),
        }
    }

    fn verify(
        expectations: &SigningExpectations,
        tx: &Transaction,
        input_total: i64,
        change: Option<&ScriptBuf>,
    ) -> Result<(), SignatureValidationError> {
        let fee = transaction_fee(tx, Satoshis::new(input_total)).unwrap();
        expectations.verify(tx, fee, change)
    }

    #[test]
    fn accepts_payment_with_change() {
        let destination = address(1).script_pubkey();
        let change = address(2).script_pubkey();
        let tx = tx(&[(&destination, 50_000), (&change, 49_000)]);

        assert_eq!(
            verify(&expectations(true), &tx, 100_000, Some(&change)),
            Ok(())
        );
    }

    #[test]
    fn accepts_sweep_without_change() {
        let destination = address(1).script_pubkey();
        let tx = tx(&[(&destination, 50_000)]);
        assert_eq!(
            verify(&expectations(false), &tx, 51_000, None),
            Ok(())
        );
    }

    #[test]
    fn rejects_diverging_transactions() {
        let destination = address(1).script_pubkey();
        let change = address(2).script_pubkey();
        let attacker = address(3).script_pubkey();

        let cases = [
            (
                tx(&[(&attacker, 50_000), (&change, 49_000)]),
                SignatureValidationError::UnexpectedOutput(0),
            ),
            (
                tx(&[(&destination, 40_000), (&change, 59_000)]),
                SignatureValidationError::AmountMismatch {
                    expected: Satoshis::new(50_000),
                    found: Satoshis::new(40_000),
                },
            ),
            (
                tx(&[(&destination, 50_000), (&change, 40_000)]),
                SignatureValidationError::FeeMismatch {
                    expected: Satoshis::new(1_000),
                    found: Satoshis::new(10_000),
                },
            ),
            (
                tx(&[(&destination, 50_000), (&change, 48_000), (&attacker, 1_000)]),
                SignatureValidationError::UnexpectedOutput(2),
            ),
            (
                tx(&[(&destination, 50_000), (&destination, 49_000)]),
                SignatureValidationError::DuplicateDestination(address(1).to_string()),
            ),
            (
                tx(&[(&change, 99_000)]),
                SignatureValidationError::DestinationNotFound(address(1).to_string()),
            ),
            (
                tx(&[(&destination, 99_000)]),
                SignatureValidationError::AmountMismatch {
                    expected: Satoshis::new(50_000),
                    found: Satoshis::new(99_000),
                },
            ),
        ];

        for (tx, expected) in cases {
            assert_eq!(
                verify(&expectations(true), &tx, 100_000, Some(&change)),
                Err(expected)
            );
        }
    }

    #[test]
    fn missing_change_is_rejected() {
        let destination = address(1).script_pubkey();
        let change = address(2).script_pubkey();
        let tx = tx(&[(&destination, 50_000)]);
        assert_eq!(
            verify(&expectations(true), &tx, 51_000, Some(&change)),
            Err(SignatureValidationError::ChangeMismatch)
        );
    }

    #[test]
    fn totals_out_of_range_are_malformed() {
        let destination = address(1).script_pubkey();
        let change = address(2).script_pubkey();

        let huge_change = tx(&[(&destination, 90_000), (&change, u64::MAX)]);
        assert_eq!(
            transaction_fee(&huge_change, Satoshis::new(100_000)),
            Err(MalformedTransactionError::ValueOverflow("output"))
        );

        let tiny = tx(&[(&destination, 1)]);
        assert_eq!(
            transaction_fee(&tiny, Satoshis::new(i64::MIN)),
            Err(MalformedTransactionError::ValueOverflow("fee"))
        );
    }
}
