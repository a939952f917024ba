//! Document transform trait and test implementations.
//!
//! The transform is an external collaborator: an opaque `bytes -> bytes`
//! function (OCR, table extraction, format conversion). The pipeline never
//! interprets the caller-supplied options; it forwards them verbatim and
//! enforces the processing deadline around the call.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

/// Error raised by a document transform.
#[derive(Debug, Clone, thiserror::Error)]
#[error("transform failed: {message}")]
pub struct TransformError {
    /// Description of the transform failure.
    pub message: String,
}

impl TransformError {
    /// Creates a new transform error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Trait for document processing.
///
/// Implementations can call a local library, shell out to a conversion
/// service, or anything else that turns input bytes into output bytes.
/// The worker enforces the job's processing timeout around this call, so
/// implementations do not need their own deadline handling.
#[async_trait]
pub trait DocumentTransform: Send + Sync {
    /// Processes one document.
    ///
    /// `options` is the caller-supplied payload from the job envelope,
    /// passed through verbatim.
    async fn process(&self, input: Bytes, options: &Value) -> Result<Bytes, TransformError>;
}

/// A transform for testing that returns a fixed output.
#[derive(Debug, Clone)]
pub struct StubTransform {
    output: Bytes,
}

impl StubTransform {
    /// Creates a stub returning the given output for every input.
    #[must_use]
    pub fn new(output: impl Into<Bytes>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

impl Default for StubTransform {
    fn default() -> Self {
        Self::new(Bytes::from_static(b"{\"content\":\"processed\",\"pages\":1}"))
    }
}

#[async_trait]
impl DocumentTransform for StubTransform {
    async fn process(&self, _input: Bytes, _options: &Value) -> Result<Bytes, TransformError> {
        Ok(self.output.clone())
    }
}

/// A transform that always fails with a configurable message.
#[derive(Debug, Clone)]
pub struct FailingTransform {
    message: String,
}

impl FailingTransform {
    /// Creates a new failing transform.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl DocumentTransform for FailingTransform {
    async fn process(&self, _input: Bytes, _options: &Value) -> Result<Bytes, TransformError> {
        Err(TransformError::new(self.message.clone()))
    }
}

/// A transform that sleeps before answering, for deadline tests.
#[derive(Debug, Clone)]
pub struct SleepyTransform {
    delay: std::time::Duration,
    output: Bytes,
}

impl SleepyTransform {
    /// Creates a transform that waits `delay` before returning `output`.
    #[must_use]
    pub fn new(delay: std::time::Duration, output: impl Into<Bytes>) -> Self {
        Self {
            delay,
            output: output.into(),
        }
    }
}

#[async_trait]
impl DocumentTransform for SleepyTransform {
    async fn process(&self, _input: Bytes, _options: &Value) -> Result<Bytes, TransformError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn stub_transform_returns_fixed_output() {
        let transform = StubTransform::new("result");
        let output = transform
            .process(Bytes::from("input"), &json!({}))
            .await
            .unwrap();
        assert_eq!(output, Bytes::from("result"));
    }

    #[tokio::test]
    async fn failing_transform_fails() {
        let transform = FailingTransform::new("unsupported format");
        let err = transform
            .process(Bytes::from("input"), &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported format"));
    }

    #[tokio::test]
    async fn sleepy_transform_eventually_answers() {
        let transform = SleepyTransform::new(std::time::Duration::from_millis(5), "late");
        let output = transform
            .process(Bytes::from("input"), &json!({}))
            .await
            .unwrap();
        assert_eq!(output, Bytes::from("late"));
    }
}
