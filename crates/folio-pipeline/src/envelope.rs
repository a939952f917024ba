//! Wire envelopes for the control bus.
//!
//! Two message shapes travel between coordinator and workers:
//!
//! - [`JobEnvelope`]: describes one unit of work — where the input artifact
//!   lives, how to read it, and how long processing may take
//! - [`CompletionEnvelope`]: reports one job's outcome, correlated back to
//!   the submitter by request id
//!
//! ## Forward Compatibility
//!
//! The `options` payload is opaque: the pipeline validates only that it is
//! well-formed and within budget, and forwards it verbatim to the transform.
//! Unknown fields inside it survive re-serialization, so newer callers can
//! add options that older workers pass through untouched.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use folio_core::{AccessDescriptor, ArtifactLocation, RequestId};

use crate::error::{FailureKind, SchemaError};

/// The message describing a unit of work to be processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Correlation key for the entire job lifecycle. Never reused.
    pub request_id: RequestId,
    /// Where the uploaded input artifact lives.
    ///
    /// Absent fields decode to empty values so that validation can report
    /// `MissingField` against a correlatable request id instead of the
    /// whole message being undecodable.
    #[serde(default)]
    pub artifact_location: ArtifactLocation,
    /// Time-bounded read credential for the input artifact.
    ///
    /// The issuer guarantees the expiry is at least as far out as the
    /// processing timeout.
    #[serde(default = "missing_descriptor")]
    pub access_descriptor: AccessDescriptor,
    /// When the coordinator created this envelope.
    pub submitted_at: DateTime<Utc>,
    /// Declared input size, for worker-side capacity heuristics.
    #[serde(default)]
    pub size_bytes: u64,
    /// Maximum processing duration before the job is considered abandoned.
    #[serde(default)]
    pub processing_timeout_secs: u64,
    /// Opaque caller-supplied payload, forwarded verbatim to the transform.
    #[serde(default)]
    pub options: Value,
}

/// Decode placeholder for an absent access descriptor; rejected by
/// validation as a missing field.
fn missing_descriptor() -> AccessDescriptor {
    AccessDescriptor {
        url: String::new(),
        expires_at: DateTime::<Utc>::UNIX_EPOCH,
    }
}

impl JobEnvelope {
    /// Creates a new job envelope stamped with the current time.
    #[must_use]
    pub fn new(
        request_id: RequestId,
        artifact_location: ArtifactLocation,
        access_descriptor: AccessDescriptor,
        size_bytes: u64,
        processing_timeout: Duration,
        options: Value,
    ) -> Self {
        Self {
            request_id,
            artifact_location,
            access_descriptor,
            submitted_at: Utc::now(),
            size_bytes,
            processing_timeout_secs: processing_timeout.as_secs(),
            options,
        }
    }

    /// Returns the processing timeout as a duration.
    #[must_use]
    pub const fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    /// Validates the envelope against the wire contract.
    ///
    /// # Errors
    ///
    /// - [`SchemaError::MissingField`] if a required field is empty
    /// - [`SchemaError::InvalidReference`] if the artifact location is malformed
    /// - [`SchemaError::ExpiredDescriptor`] if the descriptor expiry is ≤ `now`
    /// - [`SchemaError::OversizedOptions`] if `options` exceeds `max_options_bytes`
    pub fn validate(&self, now: DateTime<Utc>, max_options_bytes: usize) -> Result<(), SchemaError> {
        if self.artifact_location.bucket.is_empty() && self.artifact_location.key.is_empty() {
            return Err(SchemaError::MissingField {
                field: "artifact_location",
            });
        }
        if self.artifact_location.bucket.is_empty() {
            return Err(SchemaError::InvalidReference {
                reason: "empty bucket".into(),
            });
        }
        if self.artifact_location.key.is_empty() {
            return Err(SchemaError::InvalidReference {
                reason: "empty key".into(),
            });
        }
        if self.artifact_location.key.starts_with('/')
            || self.artifact_location.key.split('/').any(|s| s == "..")
        {
            return Err(SchemaError::InvalidReference {
                reason: format!("malformed key: {}", self.artifact_location.key),
            });
        }
        if self.access_descriptor.url.is_empty() {
            return Err(SchemaError::MissingField {
                field: "access_descriptor",
            });
        }
        if self.access_descriptor.is_expired(now) {
            return Err(SchemaError::ExpiredDescriptor {
                expired_at: self.access_descriptor.expires_at,
            });
        }
        if self.processing_timeout_secs == 0 {
            return Err(SchemaError::MissingField {
                field: "processing_timeout",
            });
        }
        let size = serde_json::to_vec(&self.options).map_or(usize::MAX, |v| v.len());
        if size > max_options_bytes {
            return Err(SchemaError::OversizedOptions {
                size,
                limit: max_options_bytes,
            });
        }
        Ok(())
    }

    /// Serializes the envelope to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the envelope from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Deserializes the envelope from raw bus payload bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Encodes the envelope as a bus payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_payload(&self) -> Result<Bytes, serde_json::Error> {
        self.to_json().map(Bytes::from)
    }
}

/// Outcome reported in a completion envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    /// The job produced a result artifact.
    Succeeded,
    /// The job failed; the error field says how.
    Failed,
}

/// Structured failure reason carried by failed completions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Failure class, stable across worker versions.
    pub kind: FailureKind,
    /// Human-readable description.
    pub message: String,
}

/// The message reporting a job's outcome.
///
/// `status` and its companion fields are mutually exclusive and exhaustive:
/// `succeeded` carries a result location and no error, `failed` the reverse.
/// The constructors enforce this; [`CompletionEnvelope::validate`] re-checks
/// it on receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEnvelope {
    /// Correlation key; equals the originating job envelope's id.
    pub request_id: RequestId,
    /// Whether the job succeeded or failed.
    pub status: CompletionStatus,
    /// Where the result artifact lives. Present iff succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_location: Option<ArtifactLocation>,
    /// Why the job failed. Present iff failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    /// When the worker finished the job.
    pub completed_at: DateTime<Utc>,
}

impl CompletionEnvelope {
    /// Creates a successful completion.
    #[must_use]
    pub fn succeeded(request_id: RequestId, result_location: ArtifactLocation) -> Self {
        Self {
            request_id,
            status: CompletionStatus::Succeeded,
            result_location: Some(result_location),
            error: None,
            completed_at: Utc::now(),
        }
    }

    /// Creates a failed completion.
    #[must_use]
    pub fn failed(request_id: RequestId, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status: CompletionStatus::Failed,
            result_location: None,
            error: Some(JobError {
                kind,
                message: message.into(),
            }),
            completed_at: Utc::now(),
        }
    }

    /// Validates the status/field exclusivity invariant.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::MissingField`] when the field required by the
    /// status is absent, and [`SchemaError::InvalidReference`] when a field
    /// forbidden by the status is present.
    pub fn validate(&self) -> Result<(), SchemaError> {
        match self.status {
            CompletionStatus::Succeeded => {
                if self.result_location.is_none() {
                    return Err(SchemaError::MissingField {
                        field: "result_location",
                    });
                }
                if self.error.is_some() {
                    return Err(SchemaError::InvalidReference {
                        reason: "error present on succeeded completion".into(),
                    });
                }
            }
            CompletionStatus::Failed => {
                if self.error.is_none() {
                    return Err(SchemaError::MissingField { field: "error" });
                }
                if self.result_location.is_some() {
                    return Err(SchemaError::InvalidReference {
                        reason: "result_location present on failed completion".into(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Serializes the envelope to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the envelope from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Deserializes the envelope from raw bus payload bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Encodes the envelope as a bus payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_payload(&self) -> Result<Bytes, serde_json::Error> {
        self.to_json().map(Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_envelope() -> JobEnvelope {
        let location = ArtifactLocation::new("documents", "raw/abc");
        JobEnvelope::new(
            RequestId::generate(),
            location,
            AccessDescriptor {
                url: "memory://documents/raw/abc".into(),
                expires_at: Utc::now() + chrono::Duration::minutes(10),
            },
            10,
            Duration::from_secs(300),
            json!({"mode": "fast"}),
        )
    }

    #[test]
    fn valid_envelope_passes() {
        let envelope = test_envelope();
        assert_eq!(envelope.validate(Utc::now(), 1024), Ok(()));
    }

    #[test]
    fn empty_location_is_missing_field() {
        let mut envelope = test_envelope();
        envelope.artifact_location = ArtifactLocation::new("", "");
        assert_eq!(
            envelope.validate(Utc::now(), 1024),
            Err(SchemaError::MissingField {
                field: "artifact_location"
            })
        );
    }

    #[test]
    fn empty_key_is_invalid_reference() {
        let mut envelope = test_envelope();
        envelope.artifact_location.key = String::new();
        assert!(matches!(
            envelope.validate(Utc::now(), 1024),
            Err(SchemaError::InvalidReference { .. })
        ));
    }

    #[test]
    fn traversal_key_is_invalid_reference() {
        let mut envelope = test_envelope();
        envelope.artifact_location.key = "raw/../secrets".into();
        assert!(matches!(
            envelope.validate(Utc::now(), 1024),
            Err(SchemaError::InvalidReference { .. })
        ));
    }

    #[test]
    fn expired_descriptor_is_rejected() {
        let mut envelope = test_envelope();
        envelope.access_descriptor.expires_at = Utc::now() - chrono::Duration::seconds(1);
        assert!(matches!(
            envelope.validate(Utc::now(), 1024),
            Err(SchemaError::ExpiredDescriptor { .. })
        ));
    }

    #[test]
    fn oversized_options_are_rejected() {
        let mut envelope = test_envelope();
        envelope.options = json!({"blob": "x".repeat(2048)});
        let err = envelope.validate(Utc::now(), 1024).unwrap_err();
        assert!(matches!(err, SchemaError::OversizedOptions { limit: 1024, .. }));
    }

    #[test]
    fn options_pass_through_unknown_fields() {
        let mut envelope = test_envelope();
        envelope.options = json!({
            "mode": "fast",
            "future_field": {"nested": [1, 2, 3]},
            "another": null
        });

        let json = envelope.to_json().unwrap();
        let parsed = JobEnvelope::from_json(&json).unwrap();
        assert_eq!(parsed.options, envelope.options);

        // Re-serializing preserves the unknown fields verbatim.
        let rejson = parsed.to_json().unwrap();
        let reparsed = JobEnvelope::from_json(&rejson).unwrap();
        assert_eq!(reparsed.options["future_field"]["nested"], json!([1, 2, 3]));
    }

    #[test]
    fn job_envelope_roundtrip() {
        let envelope = test_envelope();
        let payload = envelope.to_payload().unwrap();
        let parsed = JobEnvelope::from_slice(&payload).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn missing_artifact_location_decodes_and_fails_validation() {
        let envelope = test_envelope();
        let mut value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        value.as_object_mut().unwrap().remove("artifact_location");

        let parsed = JobEnvelope::from_json(&value.to_string()).unwrap();
        assert_eq!(parsed.request_id, envelope.request_id);
        assert_eq!(
            parsed.validate(Utc::now(), 1024),
            Err(SchemaError::MissingField {
                field: "artifact_location"
            })
        );
    }

    #[test]
    fn missing_descriptor_decodes_and_fails_validation() {
        let envelope = test_envelope();
        let mut value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        value.as_object_mut().unwrap().remove("access_descriptor");

        let parsed = JobEnvelope::from_json(&value.to_string()).unwrap();
        assert_eq!(
            parsed.validate(Utc::now(), 1024),
            Err(SchemaError::MissingField {
                field: "access_descriptor"
            })
        );
    }

    #[test]
    fn missing_options_defaults_to_null() {
        let envelope = test_envelope();
        let mut value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        value.as_object_mut().unwrap().remove("options");
        let parsed = JobEnvelope::from_json(&value.to_string()).unwrap();
        assert_eq!(parsed.options, Value::Null);
    }

    #[test]
    fn succeeded_completion_is_exclusive() {
        let completion = CompletionEnvelope::succeeded(
            RequestId::generate(),
            ArtifactLocation::new("documents", "results/abc"),
        );
        assert_eq!(completion.validate(), Ok(()));
        assert!(completion.error.is_none());

        let json = completion.to_json().unwrap();
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn failed_completion_is_exclusive() {
        let completion = CompletionEnvelope::failed(
            RequestId::generate(),
            FailureKind::ProcessingError,
            "transform crashed",
        );
        assert_eq!(completion.validate(), Ok(()));
        assert!(completion.result_location.is_none());

        let json = completion.to_json().unwrap();
        assert!(!json.contains("result_location"));
        assert!(json.contains("\"ProcessingError\""));
    }

    #[test]
    fn completion_with_both_fields_fails_validation() {
        let mut completion = CompletionEnvelope::succeeded(
            RequestId::generate(),
            ArtifactLocation::new("documents", "results/abc"),
        );
        completion.error = Some(JobError {
            kind: FailureKind::Timeout,
            message: "late".into(),
        });
        assert!(completion.validate().is_err());
    }

    #[test]
    fn completion_status_serializes_lowercase() {
        let completion = CompletionEnvelope::succeeded(
            RequestId::generate(),
            ArtifactLocation::new("documents", "results/abc"),
        );
        let json = completion.to_json().unwrap();
        assert!(json.contains("\"succeeded\""));
    }

    #[test]
    fn completion_roundtrip() {
        let completion =
            CompletionEnvelope::failed(RequestId::generate(), FailureKind::FetchError, "gone");
        let payload = completion.to_payload().unwrap();
        let parsed = CompletionEnvelope::from_slice(&payload).unwrap();
        assert_eq!(parsed, completion);
    }
}
