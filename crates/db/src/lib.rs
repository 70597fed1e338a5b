//! Storage backends for the wallet core.
//!
//! Only in-memory backends live here. Platform keychains implement
//! [`KeyStorage`](wallet_service_proto::KeyStorage) on their side of the boundary.

pub mod errors;
pub mod inmemory;
