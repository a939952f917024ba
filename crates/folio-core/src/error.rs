//! Error types and result aliases for Folio.
//!
//! This module defines the shared error types used across all Folio components.
//! Errors are structured for programmatic handling and include context for debugging.

use chrono::{DateTime, Utc};

/// The result type used throughout Folio.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Folio operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An access descriptor was presented after its expiry.
    ///
    /// This is a permanent failure: retrying the same descriptor can never
    /// succeed, so callers must not treat it as transient.
    #[error("access descriptor expired at {expired_at}")]
    DescriptorExpired {
        /// When the descriptor stopped being valid.
        expired_at: DateTime<Utc>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A path or object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if retrying the failed operation can never succeed.
    ///
    /// Workers use this to decide between acknowledging a message (permanent
    /// failure, retry is futile) and leaving it for redelivery (transient).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::DescriptorExpired { .. }
                | Self::NotFound(_)
                | Self::InvalidInput(_)
                | Self::InvalidId { .. }
        )
    }
}
