//! Errors raised by the in-memory backends.

use thiserror::Error;

/// Error type for the in-memory backends.
#[derive(Debug, Error)]
pub enum InMemoryError {
    /// Nothing is stored under the entry.
    #[error("could not find entry {0}")]
    NotFound(&'static str),

    /// A stored value no longer parses.
    #[error("corrupted entry {entry}: {reason}")]
    Corrupted {
        /// The entry.
        entry: &'static str,

        /// Why it failed to parse.
        reason: String,
    },
}
