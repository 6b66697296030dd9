//! Error types for the isolated store.

use kluster_sim_core::ObjectKey;
use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("{0} not found")]
    NotFound(ObjectKey),

    /// An object with the same identity already exists.
    #[error("{0} already exists")]
    AlreadyExists(ObjectKey),

    /// The object has no name.
    #[error("{0} object has no name")]
    MissingName(kluster_sim_core::ObjectKind),
}

impl StoreError {
    /// Whether this error reports a missing object.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether this error reports an identity conflict.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}
