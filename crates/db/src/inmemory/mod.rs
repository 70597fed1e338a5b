//! In-memory storage backends, used by tests and by hosts without a keychain.

pub mod errors;
pub mod invoices;
pub mod keys;

/// Common imports for in-memory backends.
pub mod prelude {
    pub use super::{
        errors::InMemoryError as Error, invoices::InvoiceSecretStoreInMemory,
        keys::KeyStorageInMemory,
    };
}
