//! Typed key helpers for pipeline artifacts.
//!
//! One job owns exactly two keys, both derived from its request id:
//! `raw/{request_id}` for the uploaded input and `results/{request_id}` for
//! the processed output. Keying the result by request id (not appending) is
//! what makes reprocessing after redelivery an idempotent overwrite.

use crate::id::RequestId;

/// Key prefix for uploaded input artifacts.
pub const RAW_PREFIX: &str = "raw/";

/// Key prefix for processed result artifacts.
pub const RESULT_PREFIX: &str = "results/";

/// Returns the input artifact key for a request.
#[must_use]
pub fn raw_artifact_key(request_id: &RequestId) -> String {
    format!("{RAW_PREFIX}{request_id}")
}

/// Returns the result artifact key for a request.
#[must_use]
pub fn result_artifact_key(request_id: &RequestId) -> String {
    format!("{RESULT_PREFIX}{request_id}")
}
