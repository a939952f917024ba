//! Submission coordinator.
//!
//! The coordinator owns the client side of the pipeline: it uploads the
//! input artifact, publishes the job envelope, and suspends the caller until
//! the matching completion arrives or the deadline passes. Two background
//! tasks support it:
//!
//! - the **resolver loop** consumes the completions subject and wakes the
//!   matching pending request; completions for unknown ids (duplicates, late
//!   arrivals after timeout) are acknowledged and dropped
//! - the **sweeper** periodically expires overdue pending requests
//!
//! ## Cleanup-on-error
//!
//! Whenever submission fails after the input artifact was uploaded — presign
//! failure, validation failure, publish failure, timeout, or remote failure —
//! the coordinator best-effort deletes what it wrote. Workers never delete
//! the raw input: redelivery of the job envelope must still find it.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use folio_core::paths::{raw_artifact_key, result_artifact_key};
use folio_core::{ArtifactLocation, ArtifactStore, MessageId, RequestId};

use crate::bus::ControlBus;
use crate::config::PipelineConfig;
use crate::envelope::{CompletionEnvelope, CompletionStatus, JobEnvelope, JobError};
use crate::error::{FailureKind, Result, SubmissionError};
use crate::metrics::PipelineMetrics;
use crate::registry::{CompletionOutcome, PendingRegistry};

/// A successfully processed job, as seen by the submitter.
#[derive(Debug, Clone)]
pub struct ProcessingOutcome {
    /// The job's correlation id.
    pub request_id: RequestId,
    /// Where the result artifact lives. Its lifecycle now belongs to the
    /// caller.
    pub result_location: ArtifactLocation,
    /// When the worker finished the job.
    pub completed_at: DateTime<Utc>,
}

/// Client-side pipeline coordinator.
///
/// Cheap to share behind an `Arc`; any number of `submit` calls may be in
/// flight concurrently, each independently timed.
pub struct Coordinator {
    store: Arc<dyn ArtifactStore>,
    bus: Arc<dyn ControlBus>,
    registry: Arc<PendingRegistry>,
    config: PipelineConfig,
    metrics: PipelineMetrics,
    resolver: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl Coordinator {
    /// Starts a coordinator: subscribes the completions subject and spawns
    /// the resolver and sweeper tasks.
    ///
    /// Each coordinator instance subscribes under its own consumer group so
    /// that every instance sees every completion; unmatched ids resolve to
    /// no-ops.
    ///
    /// # Errors
    ///
    /// Returns an error if the completions subscription cannot be created.
    pub async fn start(
        store: Arc<dyn ArtifactStore>,
        bus: Arc<dyn ControlBus>,
        config: PipelineConfig,
    ) -> Result<Self> {
        let registry = Arc::new(PendingRegistry::new());
        let metrics = PipelineMetrics::new();

        let group = format!("coordinator-{}", MessageId::generate());
        let mut subscription = bus.subscribe(&config.completions_subject(), &group).await?;

        let resolver = {
            let registry = Arc::clone(&registry);
            let metrics = metrics.clone();
            tokio::spawn(async move {
                while let Some(delivery) = subscription.next().await {
                    let completion = match CompletionEnvelope::from_slice(&delivery.payload) {
                        Ok(completion) => completion,
                        Err(error) => {
                            tracing::warn!(
                                message_id = %delivery.message_id,
                                %error,
                                "discarding undecodable completion message"
                            );
                            delivery.ack();
                            continue;
                        }
                    };
                    if let Err(error) = completion.validate() {
                        tracing::warn!(
                            request_id = %completion.request_id,
                            %error,
                            "discarding completion violating the status invariant"
                        );
                        delivery.ack();
                        continue;
                    }

                    let status = match completion.status {
                        CompletionStatus::Succeeded => "succeeded",
                        CompletionStatus::Failed => "failed",
                    };
                    metrics.record_completion(status);

                    let request_id = completion.request_id;
                    if registry.resolve(&request_id, completion) {
                        tracing::debug!(%request_id, status, "completion resolved");
                    } else {
                        // Duplicate delivery, or the submitter already timed
                        // out or cancelled. Harmless either way.
                        tracing::debug!(%request_id, "completion for unknown request ignored");
                    }
                    metrics.set_pending_requests(registry.len());
                    delivery.ack();
                }
            })
        };

        let sweeper = {
            let registry = Arc::clone(&registry);
            let metrics = metrics.clone();
            let interval = config.sweep_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    let expired = registry.sweep(Utc::now());
                    if expired > 0 {
                        tracing::debug!(expired, "expired overdue pending requests");
                    }
                    metrics.record_sweeper_timeouts(expired);
                    metrics.set_pending_requests(registry.len());
                }
            })
        };

        Ok(Self {
            store,
            bus,
            registry,
            config,
            metrics,
            resolver,
            sweeper,
        })
    }

    /// Returns the number of in-flight pending requests.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.registry.len()
    }

    /// Submits one document for processing and waits for its outcome.
    ///
    /// Submission is not deduplicated by content: two calls with identical
    /// bytes are two independent jobs.
    ///
    /// # Errors
    ///
    /// - [`SubmissionError::StoreUnavailable`]: upload or presign failed
    /// - [`SubmissionError::BusUnavailable`]: job publish failed (the
    ///   uploaded artifact is deleted best-effort)
    /// - [`SubmissionError::InvalidJob`]: the envelope failed validation
    /// - [`SubmissionError::Timeout`]: no completion arrived within `timeout`
    /// - [`SubmissionError::JobFailed`]: a worker reported failure
    /// - [`SubmissionError::Shutdown`]: the coordinator shut down first
    #[tracing::instrument(
        skip(self, data, options),
        fields(request_id = tracing::field::Empty, size_bytes = data.len())
    )]
    pub async fn submit(
        &self,
        data: Bytes,
        options: Value,
        timeout: Duration,
    ) -> std::result::Result<ProcessingOutcome, SubmissionError> {
        let request_id = RequestId::generate();
        tracing::Span::current().record("request_id", tracing::field::display(request_id));

        let size_bytes = data.len() as u64;
        let raw_location = self
            .store
            .put(&raw_artifact_key(&request_id), data)
            .await
            .map_err(|e| SubmissionError::store_unavailable("failed to upload input artifact", e))?;

        // The descriptor must outlive the job: timeout plus slack.
        let descriptor = match self
            .store
            .presign(&raw_location, timeout + self.config.presign_slack)
            .await
        {
            Ok(descriptor) => descriptor,
            Err(e) => {
                self.delete_best_effort(&raw_location).await;
                return Err(SubmissionError::store_unavailable(
                    "failed to presign input artifact",
                    e,
                ));
            }
        };

        let envelope = JobEnvelope::new(
            request_id,
            raw_location.clone(),
            descriptor,
            size_bytes,
            timeout,
            options,
        );
        if let Err(schema) = envelope.validate(Utc::now(), self.config.max_options_bytes) {
            self.delete_best_effort(&raw_location).await;
            return Err(SubmissionError::InvalidJob(schema));
        }
        let payload = envelope.to_payload().map_err(|e| SubmissionError::Internal {
            message: format!("failed to encode job envelope: {e}"),
        })?;

        let deadline = Utc::now()
            + chrono::Duration::from_std(timeout).map_err(|e| SubmissionError::Internal {
                message: format!("timeout out of range: {e}"),
            })?;
        let waiter = self
            .registry
            .register(request_id, deadline)
            .map_err(|e| SubmissionError::Internal {
                message: e.to_string(),
            })?;
        // Caller cancellation: drop the bookkeeping and the uploaded input.
        let waiter = waiter.with_cancel_cleanup({
            let store = Arc::clone(&self.store);
            let location = raw_location.clone();
            move || {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(error) = store.delete(&location).await {
                            tracing::warn!(%location, %error, "artifact cleanup after cancel failed");
                        }
                    });
                }
            }
        });

        if let Err(e) = self.bus.publish(&self.config.jobs_subject(), payload).await {
            // Cleanup-on-error: no pending request survives a synchronous
            // publish failure, and the uploaded artifact is removed.
            self.registry.remove(&request_id);
            self.delete_best_effort(&raw_location).await;
            return Err(SubmissionError::bus_unavailable(
                "failed to publish job envelope",
                e,
            ));
        }

        self.metrics.record_submitted();
        self.metrics.set_pending_requests(self.registry.len());
        tracing::debug!(%request_id, "job published; awaiting completion");

        let started = Instant::now();
        match waiter.wait().await {
            Ok(CompletionOutcome::Resolved(completion)) => {
                self.metrics.observe_job_duration(started.elapsed().as_secs_f64());
                self.finish(request_id, &raw_location, completion).await
            }
            Ok(CompletionOutcome::TimedOut) => {
                // The worker may still be running; it keeps the bus message
                // and its late completion will be absorbed. Only this
                // coordinator's artifacts are reclaimed.
                let result_location = ArtifactLocation::new(
                    self.config.bucket.clone(),
                    result_artifact_key(&request_id),
                );
                futures::future::join(
                    self.delete_best_effort(&raw_location),
                    self.delete_best_effort(&result_location),
                )
                .await;
                Err(SubmissionError::Timeout {
                    request_id,
                    waited: started.elapsed(),
                })
            }
            Err(_) => Err(SubmissionError::Shutdown),
        }
    }

    /// Maps a resolved completion to the caller-visible outcome and reclaims
    /// the raw input.
    async fn finish(
        &self,
        request_id: RequestId,
        raw_location: &ArtifactLocation,
        completion: CompletionEnvelope,
    ) -> std::result::Result<ProcessingOutcome, SubmissionError> {
        match completion.status {
            CompletionStatus::Succeeded => {
                let result_location =
                    completion
                        .result_location
                        .ok_or_else(|| SubmissionError::Internal {
                            message: "succeeded completion without result location".into(),
                        })?;
                if !self.config.retain_raw {
                    self.delete_best_effort(raw_location).await;
                }
                tracing::info!(%request_id, %result_location, "job succeeded");
                Ok(ProcessingOutcome {
                    request_id,
                    result_location,
                    completed_at: completion.completed_at,
                })
            }
            CompletionStatus::Failed => {
                self.delete_best_effort(raw_location).await;
                let JobError { kind, message } = completion.error.unwrap_or(JobError {
                    kind: FailureKind::ProcessingError,
                    message: "unspecified worker failure".into(),
                });
                tracing::info!(%request_id, %kind, reason = %message, "job failed remotely");
                Err(SubmissionError::JobFailed {
                    request_id,
                    kind,
                    message,
                })
            }
        }
    }

    async fn delete_best_effort(&self, location: &ArtifactLocation) {
        if let Err(error) = self.store.delete(location).await {
            tracing::warn!(%location, %error, "best-effort artifact cleanup failed");
        }
    }

    /// Stops the background tasks and fails all pending submissions with
    /// [`SubmissionError::Shutdown`].
    pub fn shutdown(&self) {
        self.resolver.abort();
        self.sweeper.abort();
        self.registry.close();
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.resolver.abort();
        self.sweeper.abort();
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("pending", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
