//! Observability metrics for the pipeline.
//!
//! This module provides Prometheus-compatible metrics for monitoring
//! coordinator and worker health. Metrics are exposed via the `metrics`
//! crate facade; install an exporter (e.g. `metrics-exporter-prometheus`)
//! in the hosting process to publish them.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `folio_pipeline_jobs_submitted_total` | Counter | - | Jobs published by coordinators |
//! | `folio_pipeline_completions_total` | Counter | `status` | Completion envelopes received |
//! | `folio_pipeline_worker_messages_total` | Counter | `disposition` | Worker message handling outcomes |
//! | `folio_pipeline_sweeper_timeouts_total` | Counter | - | Pending requests expired by the sweeper |
//! | `folio_pipeline_job_duration_seconds` | Histogram | - | Submit-to-completion latency |
//! | `folio_pipeline_pending_requests` | Gauge | - | In-flight pending requests |

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Jobs published by coordinators.
    pub const JOBS_SUBMITTED_TOTAL: &str = "folio_pipeline_jobs_submitted_total";
    /// Counter: Completion envelopes received, by status.
    pub const COMPLETIONS_TOTAL: &str = "folio_pipeline_completions_total";
    /// Counter: Worker message handling outcomes, by disposition.
    pub const WORKER_MESSAGES_TOTAL: &str = "folio_pipeline_worker_messages_total";
    /// Counter: Pending requests expired by the sweeper.
    pub const SWEEPER_TIMEOUTS_TOTAL: &str = "folio_pipeline_sweeper_timeouts_total";
    /// Histogram: Submit-to-completion latency in seconds.
    pub const JOB_DURATION_SECONDS: &str = "folio_pipeline_job_duration_seconds";
    /// Gauge: In-flight pending requests.
    pub const PENDING_REQUESTS: &str = "folio_pipeline_pending_requests";
}

/// Label keys used across metrics.
pub mod labels {
    /// Completion status (succeeded, failed).
    pub const STATUS: &str = "status";
    /// Message handling disposition (acknowledged, requeued).
    pub const DISPOSITION: &str = "disposition";
}

/// High-level interface for recording pipeline metrics.
///
/// Cheap to clone and share across tasks.
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics;

impl PipelineMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records one published job.
    pub fn record_submitted(&self) {
        counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
    }

    /// Records one received completion envelope.
    pub fn record_completion(&self, status: &str) {
        counter!(
            names::COMPLETIONS_TOTAL,
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }

    /// Records one handled worker message.
    pub fn record_worker_message(&self, disposition: &str) {
        counter!(
            names::WORKER_MESSAGES_TOTAL,
            labels::DISPOSITION => disposition.to_string(),
        )
        .increment(1);
    }

    /// Records pending requests expired by one sweeper pass.
    pub fn record_sweeper_timeouts(&self, count: usize) {
        if count > 0 {
            counter!(names::SWEEPER_TIMEOUTS_TOTAL).increment(count as u64);
        }
    }

    /// Records one job's submit-to-completion latency.
    pub fn observe_job_duration(&self, duration_secs: f64) {
        histogram!(names::JOB_DURATION_SECONDS).record(duration_secs);
    }

    /// Sets the in-flight pending request gauge.
    #[allow(clippy::cast_precision_loss)] // Gauge values are typically small
    pub fn set_pending_requests(&self, count: usize) {
        gauge!(names::PENDING_REQUESTS).set(count as f64);
    }
}
