//! Error types for Turf
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! The variants fall into four families:
//! - value errors (`SerializationError`): returned to the caller of the one
//!   operation that failed, never poison the enclosing transaction
//! - store errors (`StorageError`, `IoError`, `Corruption`): abort the
//!   enclosing transaction
//! - cache consistency errors (`SnapshotGap`, `CacheInconsistent`): fatal for
//!   the affected connection until its caches are reset
//! - extension errors (`ExtensionError`): abort the enclosing transaction

use std::io;
use thiserror::Error;

/// Result type alias for Turf operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Turf database
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Value failed to encode or decode
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Underlying row operation failed
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Persisted data failed an integrity check
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A view was requested for a collection the database does not know
    #[error("Collection not registered: {0}")]
    CollectionNotRegistered(String),

    /// A collection name was reused with a different value type
    #[error("Collection {0} was first used with a different value type")]
    CollectionTypeMismatch(String),

    /// Two extensions were registered under the same name
    #[error("Extension already registered: {0}")]
    DuplicateExtension(String),

    /// An extension hook failed
    #[error("Extension {extension} failed: {reason}")]
    ExtensionError {
        /// Name of the failing extension
        extension: String,
        /// Human readable cause
        reason: String,
    },

    /// Catch-up asked for cache updates the registry no longer holds
    #[error("Snapshot gap: updates after {requested_after} requested, oldest retained is after {retained_after}")]
    SnapshotGap {
        /// Lower (exclusive) bound requested
        requested_after: u64,
        /// Lower (exclusive) bound still available
        retained_after: u64,
    },

    /// Connection caches are unusable until `reset_caches` is called
    #[error("Connection cache is inconsistent; reset required")]
    CacheInconsistent,

    /// Transaction was rolled back
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration could not be read or is invalid
    #[error("Config error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Build an extension failure
    pub fn extension(extension: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ExtensionError {
            extension: extension.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that concern a single value's encoding
    pub fn is_serialization(&self) -> bool {
        matches!(self, Error::SerializationError(_))
    }

    /// True for errors that leave a connection's caches unusable
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, Error::SnapshotGap { .. } | Error::CacheInconsistent)
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}
