//! Contracts between the wallet core and the outside world.
//!
//! The core never does I/O itself. It talks to secure storage and to the coordination service
//! through the traits defined here, and exchanges the records in [`wire`] with them.

mod errors;
mod models;
mod traits;
pub mod wire;

pub use errors::{DeveloperError, ExactDeveloperError, KeyStorageError, ServiceError};
pub use models::{
    ChallengeSetup, ExternalAddressesRecord, KeySet, PublicKeySet, SetupChallengeResponse,
};
pub use traits::{IncomingSwapService, InvoiceSecretStore, KeyCoordinationService, KeyStorage};
