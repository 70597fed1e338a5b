//! Errors raised by the storage backends.

use thiserror::Error;
use wallet_service_proto::KeyStorageError;

use crate::inmemory;

/// Error type for the storage backends.
#[derive(Debug, Error)]
pub enum DbError {
    /// Error in an in-memory backend.
    #[error("memory: {0}")]
    InMemory(#[from] inmemory::prelude::Error),
}

/// Result of a storage operation.
pub type DbResult<T> = Result<T, DbError>;

impl From<DbError> for KeyStorageError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::InMemory(inmemory::prelude::Error::NotFound(entry)) => {
                Self::MissingKey(entry.to_string())
            }
            other => Self::Storage(other.to_string()),
        }
    }
}
