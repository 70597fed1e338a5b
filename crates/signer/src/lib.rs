//! Transaction signing for the 2-of-2 wallet.
//!
//! Every spend needs the user key and, for multisig addresses, the cosigner's signature. Nothing
//! here trusts the server: input scripts are recomputed from our own keys, the cosigner's
//! signatures are verified before use and outputs are checked against [`SigningExpectations`]
//! before a single signature is produced.

mod address;
mod errors;
mod expectations;
mod incoming_swap;
mod musig;
mod psbt;
pub mod scripts;

pub use address::{
    AddressDescriptor, AddressKeys, AddressVersion, MuunAddress, UnknownAddressVersion,
};
pub use errors::{
    FulfillmentError, MalformedTransactionError, SignError, SignatureValidationError,
};
pub use expectations::SigningExpectations;
pub use incoming_swap::{
    Fulfillment, FulfillmentData, IncomingSwap, IncomingSwapHtlc, InvoiceSecret,
    EXPIRATION_SAFETY_MARGIN,
};
pub use musig::{
    MusigNonces, MuunMusigContribution, MUUN_MUSIG_BLOB_LEN, PARTIAL_SIGNATURE_LEN, PUB_NONCE_LEN,
};
pub use psbt::{
    MuunInput, PartiallySignedTransaction, SignedTransaction, SubmarineSwap, SubmarineSwapV1,
    SubmarineSwapV2,
};
pub use scripts::PREIMAGE_LEN;
