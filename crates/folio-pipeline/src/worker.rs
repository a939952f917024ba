//! Worker loop: durable consumption and processing of job envelopes.
//!
//! Each message runs the state machine
//! `Received -> Validated -> Downloaded -> Processed -> Uploaded ->
//! Published -> Acknowledged`, with a failed branch reachable from every
//! state after `Received`. Acknowledgment is always the **last** action of
//! the happy path: a message is only removed from the bus's redelivery set
//! once the result artifact is durably stored and the completion envelope is
//! published.
//!
//! ## Failure classes
//!
//! - Schema violations and transform failures are permanent: the same input
//!   would fail identically, so the worker reports a failed completion and
//!   acknowledges.
//! - Transient fetch failures, result-upload failures, and completion-publish
//!   failures leave the message un-acked so the bus redelivers it.
//!   Reprocessing is safe because the result key is derived from the request
//!   id and overwritten in place.
//!
//! One worker instance handles one message at a time; deployments run many
//! instances against the shared consumer group for throughput. A failing
//! message never takes the worker loop down with it.

use chrono::Utc;
use std::sync::Arc;

use folio_core::paths::result_artifact_key;
use folio_core::ArtifactStore;

use crate::bus::{ControlBus, Delivery};
use crate::config::PipelineConfig;
use crate::envelope::{CompletionEnvelope, JobEnvelope};
use crate::error::{Error, FailureKind, Result};
use crate::metrics::PipelineMetrics;
use crate::transform::DocumentTransform;

/// What the worker did with one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The message was acknowledged and will not be redelivered.
    Acknowledged,
    /// The message was left for redelivery.
    Requeued,
}

impl Disposition {
    /// Returns true if the message was acknowledged.
    #[must_use]
    pub const fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged)
    }

    /// Returns the disposition as a metric label value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Acknowledged => "acknowledged",
            Self::Requeued => "requeued",
        }
    }
}

/// One worker instance.
pub struct Worker {
    store: Arc<dyn ArtifactStore>,
    bus: Arc<dyn ControlBus>,
    transform: Arc<dyn DocumentTransform>,
    config: PipelineConfig,
    metrics: PipelineMetrics,
}

impl Worker {
    /// Creates a worker over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        bus: Arc<dyn ControlBus>,
        transform: Arc<dyn DocumentTransform>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            bus,
            transform,
            config,
            metrics: PipelineMetrics::new(),
        }
    }

    /// Consumes the jobs subject until the bus closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the jobs subscription cannot be created. Failures
    /// of individual messages are isolated and never surface here.
    pub async fn run(&self) -> Result<()> {
        let mut subscription = self
            .bus
            .subscribe(&self.config.jobs_subject(), &self.config.worker_group)
            .await?;
        tracing::info!(
            subject = %self.config.jobs_subject(),
            group = %self.config.worker_group,
            "worker started"
        );

        while let Some(delivery) = subscription.next().await {
            let disposition = self.handle_delivery(delivery).await;
            self.metrics.record_worker_message(disposition.as_str());
        }
        tracing::info!("worker stopped: bus closed");
        Ok(())
    }

    /// Runs the per-message state machine.
    ///
    /// Public so tests can drive a worker one delivery at a time.
    #[tracing::instrument(
        skip(self, delivery),
        fields(
            message_id = %delivery.message_id,
            attempt = delivery.attempt,
            request_id = tracing::field::Empty
        )
    )]
    pub async fn handle_delivery(&self, delivery: Delivery) -> Disposition {
        // Received -> Validated
        let envelope = match JobEnvelope::from_slice(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(error) => {
                // No request id to report against, and undecodable input
                // never becomes decodable on redelivery.
                tracing::warn!(%error, "discarding undecodable job message");
                delivery.ack();
                return Disposition::Acknowledged;
            }
        };
        tracing::Span::current().record(
            "request_id",
            tracing::field::display(envelope.request_id),
        );

        if let Err(schema) = envelope.validate(Utc::now(), self.config.max_options_bytes) {
            return self
                .fail(delivery, &envelope, FailureKind::InvalidJob, schema.to_string())
                .await;
        }

        // Validated -> Downloaded
        let input = match self.store.fetch(&envelope.access_descriptor).await {
            Ok(input) => input,
            Err(error) if error.is_permanent() => {
                return self
                    .fail(delivery, &envelope, FailureKind::FetchError, error.to_string())
                    .await;
            }
            Err(error) => {
                // Transient fetch failure: report it, but keep the message on
                // the bus — the next delivery may find the store reachable.
                tracing::warn!(%error, "transient fetch failure; leaving message for redelivery");
                self.publish_failure_best_effort(
                    &envelope,
                    FailureKind::FetchError,
                    error.to_string(),
                )
                .await;
                delivery.nack();
                return Disposition::Requeued;
            }
        };

        // Downloaded -> Processed
        let deadline = envelope.processing_timeout();
        let transformed =
            tokio::time::timeout(deadline, self.transform.process(input, &envelope.options)).await;
        let output = match transformed {
            Err(_) => {
                return self
                    .fail(
                        delivery,
                        &envelope,
                        FailureKind::Timeout,
                        format!("transform exceeded {}s deadline", deadline.as_secs()),
                    )
                    .await;
            }
            Ok(Err(error)) => {
                return self
                    .fail(
                        delivery,
                        &envelope,
                        FailureKind::ProcessingError,
                        error.to_string(),
                    )
                    .await;
            }
            Ok(Ok(output)) => output,
        };

        // Processed -> Uploaded. This is the durability point: acknowledging
        // before the result is stored could lose the job with no failure
        // visible to the coordinator.
        let result_location = match self
            .store
            .put(&result_artifact_key(&envelope.request_id), output)
            .await
        {
            Ok(location) => location,
            Err(error) => {
                tracing::warn!(%error, "result upload failed; leaving message for redelivery");
                delivery.nack();
                return Disposition::Requeued;
            }
        };

        // Uploaded -> Published
        let completion = CompletionEnvelope::succeeded(envelope.request_id, result_location);
        if let Err(error) = self.publish_completion(&completion).await {
            tracing::warn!(%error, "completion publish failed; leaving message for redelivery");
            delivery.nack();
            return Disposition::Requeued;
        }

        // Published -> Acknowledged. Always last.
        tracing::info!("job processed");
        delivery.ack();
        Disposition::Acknowledged
    }

    /// Reports a permanent failure and acknowledges the message.
    ///
    /// If even the failure completion cannot be published, the message stays
    /// on the bus: redelivery will fail the same way and retry the publish.
    async fn fail(
        &self,
        delivery: Delivery,
        envelope: &JobEnvelope,
        kind: FailureKind,
        message: String,
    ) -> Disposition {
        tracing::info!(%kind, reason = %message, "job failed");
        let completion = CompletionEnvelope::failed(envelope.request_id, kind, message);
        match self.publish_completion(&completion).await {
            Ok(()) => {
                delivery.ack();
                Disposition::Acknowledged
            }
            Err(error) => {
                tracing::warn!(%error, "failure publish failed; leaving message for redelivery");
                delivery.nack();
                Disposition::Requeued
            }
        }
    }

    async fn publish_completion(&self, completion: &CompletionEnvelope) -> Result<()> {
        let payload = completion
            .to_payload()
            .map_err(|e| Error::serialization(format!("failed to encode completion: {e}")))?;
        self.bus
            .publish(&self.config.completions_subject(), payload)
            .await
    }

    async fn publish_failure_best_effort(
        &self,
        envelope: &JobEnvelope,
        kind: FailureKind,
        message: String,
    ) {
        let completion = CompletionEnvelope::failed(envelope.request_id, kind, message);
        if let Err(error) = self.publish_completion(&completion).await {
            tracing::warn!(%error, "best-effort failure publish failed");
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
