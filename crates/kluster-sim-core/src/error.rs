//! Common error types for kluster-sim.
//!
//! This module provides shared error types that are used across multiple crates.

use thiserror::Error;

use crate::kind::ObjectKind;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout the simulator.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An object is missing its `metadata.name`.
    #[error("{0} object has no name")]
    MissingName(ObjectKind),

    /// A lifecycle signal was closed a second time.
    #[error("signal {0} is already closed")]
    SignalAlreadyClosed(&'static str),

    /// An unknown group/version/kind was encountered.
    #[error("unknown kind: {0}")]
    UnknownKind(String),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}
