//! Errors raised while building, checking and signing transactions.

use thiserror::Error;
use wallet_key_deriv::DerivationError;
use wallet_primitives::Satoshis;

/// The transaction handed over for signing cannot be understood.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedTransactionError {
    /// The transaction is not valid hex.
    #[error("transaction is not valid hex: {0}")]
    Hex(String),

    /// The bytes do not decode into a transaction.
    #[error("transaction does not decode: {0}")]
    Decode(String),

    /// The number of described inputs differs from the transaction's.
    #[error("transaction has {found} inputs but {expected} were described")]
    InputCount {
        /// Inputs described alongside the transaction.
        expected: usize,

        /// Inputs in the transaction.
        found: usize,
    },

    /// An input spends a different outpoint than described.
    #[error("input {0} spends a different outpoint than described")]
    OutpointMismatch(usize),

    /// A signature blob is not in the expected encoding.
    #[error("input {input} carries a malformed signature: {reason}")]
    Signature {
        /// Input index.
        input: usize,

        /// What is wrong with it.
        reason: String,
    },

    /// A script grew beyond what can be pushed.
    #[error("script too large to push")]
    ScriptTooLarge,

    /// Amounts in the transaction do not add up within range.
    #[error("{0} total is out of range")]
    ValueOverflow(&'static str),
}

/// The transaction does not do what the caller expects. Nothing is signed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureValidationError {
    /// No output pays the expected destination.
    #[error("no output pays the expected destination {0}")]
    DestinationNotFound(String),

    /// More than one output pays the expected destination.
    #[error("destination {0} is paid more than once")]
    DuplicateDestination(String),

    /// The destination is paid a different amount.
    #[error("destination receives {found} instead of {expected}")]
    AmountMismatch {
        /// Amount the user approved.
        expected: Satoshis,

        /// Amount in the transaction.
        found: Satoshis,
    },

    /// The expected change output is missing or goes elsewhere.
    #[error("change output does not pay back to the wallet")]
    ChangeMismatch,

    /// An output is neither the destination nor our change.
    #[error("output {0} is neither the destination nor expected change")]
    UnexpectedOutput(usize),

    /// The implied fee differs from the approved fee.
    #[error("transaction pays {found} in fees instead of {expected}")]
    FeeMismatch {
        /// Fee the user approved.
        expected: Satoshis,

        /// Inputs minus outputs.
        found: Satoshis,
    },

    /// An input's declared address is not derivable from our keys.
    #[error("input {input} address {declared} does not match derived {derived}")]
    AddressMismatch {
        /// Input index.
        input: usize,

        /// Address the server declared.
        declared: String,

        /// Address derived locally.
        derived: String,
    },

    /// A swap refund would not go to an address of ours.
    #[error("input {0} refunds to an address the wallet does not control")]
    RefundAddressNotOurs(usize),
}

/// Error type for [`PartiallySignedTransaction::sign`](crate::PartiallySignedTransaction::sign).
#[derive(Debug, Clone, Error)]
pub enum SignError {
    /// The transaction cannot be understood.
    #[error(transparent)]
    Malformed(#[from] MalformedTransactionError),

    /// The transaction does not match expectations.
    #[error(transparent)]
    Validation(#[from] SignatureValidationError),

    /// A signing key could not be derived.
    #[error(transparent)]
    Key(#[from] DerivationError),

    /// The address version needs a cosigner signature that was not provided.
    #[error("input {input} needs a cosigner signature")]
    NoMuunSignature {
        /// Input index.
        input: usize,
    },

    /// The cosigner signature does not verify.
    #[error("cosigner signature for input {input} is invalid")]
    InvalidMuunSignature {
        /// Input index.
        input: usize,
    },

    /// A taproot input has no secret nonce left.
    #[error("no musig nonce available for input {input}")]
    MissingNonce {
        /// Input index.
        input: usize,
    },

    /// A unilateral refund is attempted before the swap timelock.
    #[error("input {input} refund is locked until {locktime}")]
    LocktimeNotReached {
        /// Input index.
        input: usize,

        /// Swap locktime.
        locktime: u32,
    },

    /// MuSig2 key aggregation or signing failed.
    #[error("musig2 failure: {0}")]
    Musig(String),

    /// A signature hash could not be computed.
    #[error("sighash computation failed: {0}")]
    Sighash(String),

    /// An address could not be built from a script.
    #[error("cannot build address: {0}")]
    Address(String),
}

impl SignError {
    /// Whether the failure is a security control rejecting the transaction.
    pub const fn is_security_failure(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InvalidMuunSignature { .. } | Self::NoMuunSignature { .. }
        )
    }
}

/// Error type for incoming swap fulfillment.
#[derive(Debug, Clone, Error)]
pub enum FulfillmentError {
    /// No invoice secret is stored for the payment hash.
    #[error("no invoice secret for payment hash {0}")]
    UnknownInvoice(String),

    /// The HTLC transaction has no output at the announced index.
    #[error("HTLC output {0} does not exist")]
    HtlcOutputMissing(u32),

    /// The HTLC output does not lock to the expected script.
    #[error("HTLC output script does not match the expected contract")]
    HtlcScriptMismatch,

    /// The HTLC value does not cover the payment.
    #[error("HTLC holds {found} but at least {expected} is owed")]
    AmountMismatch {
        /// Amount owed to the wallet after debt collection.
        expected: Satoshis,

        /// Value locked in the HTLC.
        found: Satoshis,
    },

    /// The server subsidizes more fees than the HTLC holds.
    #[error("fee subsidy {subsidy} exceeds HTLC value {value}")]
    FeeSubsidyTooLarge {
        /// Subsidy announced.
        subsidy: Satoshis,

        /// HTLC value.
        value: Satoshis,
    },

    /// The HTLC expires too soon to claim safely.
    #[error("HTLC expires at {expiration} but the chain is at {current}")]
    ExpiresTooSoon {
        /// Expiration height.
        expiration: u32,

        /// Current height.
        current: u32,
    },

    /// A swap without HTLC was fulfilled on chain, or the reverse.
    #[error("swap fulfillment path does not match its kind")]
    WrongPath,

    /// The fulfillment template does not claim the HTLC to the wallet.
    #[error("fulfillment transaction does not claim the HTLC to the wallet")]
    UnexpectedTemplate,

    /// The fulfillment template pays more fees than the server subsidizes.
    #[error("fulfillment pays {fee} in fees but only {subsidy} is subsidized")]
    FeeAboveSubsidy {
        /// Fee the template pays.
        fee: Satoshis,

        /// Subsidy announced with the HTLC.
        subsidy: Satoshis,
    },

    /// The fulfillment transaction cannot be understood.
    #[error(transparent)]
    Malformed(#[from] MalformedTransactionError),

    /// A key could not be derived.
    #[error(transparent)]
    Key(#[from] DerivationError),

    /// The cosigner signature does not verify.
    #[error("cosigner signature for the HTLC is invalid")]
    InvalidMuunSignature,

    /// A signing step shared with transaction signing failed.
    #[error(transparent)]
    Sign(#[from] SignError),
}
