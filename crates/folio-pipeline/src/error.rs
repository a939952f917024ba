//! Error types for the pipeline domain.
//!
//! Three layers of failure live here:
//!
//! - [`SchemaError`]: permanent wire-contract violations, never retried
//! - [`SubmissionError`]: what a `submit` caller sees, typed by failed phase
//! - [`Error`]: crate-internal plumbing failures (bus, registry, encoding)
//!
//! Worker-side failure classes that travel inside completion envelopes are
//! [`FailureKind`] values, not error types: they are wire data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use folio_core::RequestId;

/// The result type used throughout folio-pipeline.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pipeline plumbing operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A control bus operation failed.
    #[error("bus error: {message}")]
    Bus {
        /// Description of the bus failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A correlation registry operation failed.
    #[error("registry error: {message}")]
    Registry {
        /// Description of the registry failure.
        message: String,
    },

    /// Invalid configuration was provided.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// An error from folio-core.
    #[error("core error: {0}")]
    Core(#[from] folio_core::Error),
}

impl Error {
    /// Creates a new bus error.
    #[must_use]
    pub fn bus(message: impl Into<String>) -> Self {
        Self::Bus {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new bus error with a source cause.
    #[must_use]
    pub fn bus_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Bus {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new registry error.
    #[must_use]
    pub fn registry(message: impl Into<String>) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Wire-contract violations in a job envelope.
///
/// Schema errors are permanent: a malformed envelope will never become valid,
/// so workers report them as failed completions and acknowledge the message
/// instead of letting the bus redeliver it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// A required field is absent or empty.
    #[error("missing required field: {field}")]
    MissingField {
        /// The field that was absent.
        field: &'static str,
    },

    /// The artifact location is empty or malformed.
    #[error("invalid artifact reference: {reason}")]
    InvalidReference {
        /// Why the reference was rejected.
        reason: String,
    },

    /// The access descriptor's expiry is already in the past.
    #[error("access descriptor expired at {expired_at}")]
    ExpiredDescriptor {
        /// When the descriptor stopped being valid.
        expired_at: DateTime<Utc>,
    },

    /// The opaque options payload exceeds the configured byte budget.
    #[error("options payload is {size} bytes, budget is {limit}")]
    OversizedOptions {
        /// Serialized size of the options payload.
        size: usize,
        /// The configured budget.
        limit: usize,
    },
}

/// Failure classes reported in completion envelopes.
///
/// Serialized verbatim as the `error.kind` wire string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The job envelope failed schema validation.
    InvalidJob,
    /// The input artifact could not be fetched.
    FetchError,
    /// The document transform rejected or crashed on the input.
    ProcessingError,
    /// The transform exceeded the job's processing timeout.
    Timeout,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidJob => write!(f, "InvalidJob"),
            Self::FetchError => write!(f, "FetchError"),
            Self::ProcessingError => write!(f, "ProcessingError"),
            Self::Timeout => write!(f, "Timeout"),
        }
    }
}

/// What a `submit` caller sees when a job does not produce a result.
///
/// Each variant names the phase that failed: upload, publish, waiting, or
/// remote processing.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// The artifact store rejected the upload or presign request.
    #[error("artifact store unavailable: {message}")]
    StoreUnavailable {
        /// Description of the store failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The control bus rejected the job publish.
    #[error("control bus unavailable: {message}")]
    BusUnavailable {
        /// Description of the bus failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The job envelope failed validation before publish.
    #[error("job envelope rejected: {0}")]
    InvalidJob(#[from] SchemaError),

    /// No completion arrived before the caller's deadline.
    ///
    /// The worker may still finish the job after this error; its late
    /// completion is absorbed silently.
    #[error("job {request_id} timed out after {waited:?}")]
    Timeout {
        /// The abandoned job's correlation id.
        request_id: RequestId,
        /// How long the coordinator waited.
        waited: Duration,
    },

    /// A worker reported the job as failed.
    #[error("job {request_id} failed ({kind}): {message}")]
    JobFailed {
        /// The failed job's correlation id.
        request_id: RequestId,
        /// The remote failure class.
        kind: FailureKind,
        /// The remote failure message.
        message: String,
    },

    /// The coordinator shut down before the job completed.
    #[error("coordinator shut down before completion")]
    Shutdown,

    /// An invariant was violated inside the coordinator.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl SubmissionError {
    /// Creates a store-unavailable error from a storage failure.
    #[must_use]
    pub fn store_unavailable(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a bus-unavailable error from a publish failure.
    #[must_use]
    pub fn bus_unavailable(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::BusUnavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_display() {
        let err = SchemaError::MissingField {
            field: "artifact_location",
        };
        assert!(err.to_string().contains("artifact_location"));

        let err = SchemaError::OversizedOptions {
            size: 100,
            limit: 10,
        };
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("10"));
    }

    #[test]
    fn failure_kind_serializes_as_wire_string() {
        assert_eq!(
            serde_json::to_string(&FailureKind::InvalidJob).unwrap(),
            "\"InvalidJob\""
        );
        assert_eq!(
            serde_json::to_string(&FailureKind::FetchError).unwrap(),
            "\"FetchError\""
        );
        let parsed: FailureKind = serde_json::from_str("\"Timeout\"").unwrap();
        assert_eq!(parsed, FailureKind::Timeout);
    }

    #[test]
    fn failure_kind_display_matches_wire_string() {
        for kind in [
            FailureKind::InvalidJob,
            FailureKind::FetchError,
            FailureKind::ProcessingError,
            FailureKind::Timeout,
        ] {
            let wire = serde_json::to_string(&kind).unwrap();
            assert_eq!(wire, format!("\"{kind}\""));
        }
    }

    #[test]
    fn submission_error_from_schema_error() {
        let err: SubmissionError = SchemaError::MissingField {
            field: "access_descriptor",
        }
        .into();
        assert!(matches!(err, SubmissionError::InvalidJob(_)));
    }

    #[test]
    fn bus_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err = Error::bus_with_source("publish failed", source);
        assert!(std::error::Error::source(&err).is_some());
    }
}
