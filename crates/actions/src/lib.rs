//! Wallet workflows that combine keys, storage and the coordination service.
//!
//! Each action owns its collaborators behind the traits of `wallet-service-proto`, so the same
//! code runs against the app's keychain and network stack or against in-memory fakes. Actions that
//! a screen may trigger repeatedly run behind a [`SingleFlight`] and publish their progress as an
//! [`ActionState`].

mod addresses;
mod challenge;
mod emergency_kit;
mod errors;
mod incoming_swap;
mod retry;
mod single_flight;
mod sync;

pub use addresses::{next_external_index, AddressActions, ExternalAddresses};
pub use challenge::ChallengeSetupAction;
pub use emergency_kit::{EmergencyKitData, EmergencyKitDataSelector};
pub use errors::{
    AddressError, ChallengeSetupError, EmergencyKitExportError, FulfillActionError, SyncError,
};
pub use incoming_swap::{FulfillIncomingSwapAction, FulfillOutcome};
pub use retry::{ErrorHandler, RetryAction, RetryPolicy};
pub use single_flight::{ActionState, SingleFlight};
pub use sync::SyncPublicKeySetAction;
