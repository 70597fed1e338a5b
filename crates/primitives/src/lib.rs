//! General types and pure functions shared by every wallet crate: derivation paths, amounts,
//! addresses and the runtime [`Environment`](environment::Environment).
//!
//! This crate lies at the bottom of the crate hierarchy in this workspace i.e., it does not
//! depend on any other crate in this workspace.

pub mod amount;
pub mod bitcoin;
pub mod derivation;
pub mod environment;

pub use amount::{AmountError, BtcAmount, FeeRate, Satoshis};
pub use derivation::{DerivationSchema, NamedPath, PathComponent, PathError};
pub use environment::{ConfigError, Environment, SyncRetryConfig};
