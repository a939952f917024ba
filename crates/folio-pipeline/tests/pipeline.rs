//! End-to-end pipeline tests over the in-memory store and bus.
//!
//! These tests run a real coordinator and real workers against the in-memory
//! backends and exercise the delivery guarantees the pipeline promises:
//! correlation under concurrency, at-least-once tolerance, acknowledgment
//! after durable effects, timeout behavior, and cleanup on error.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use folio_core::paths::{raw_artifact_key, result_artifact_key, RAW_PREFIX, RESULT_PREFIX};
use folio_core::{ArtifactLocation, ArtifactStore, MemoryArtifactStore};
use folio_pipeline::bus::memory::InMemoryControlBus;
use folio_pipeline::bus::{ControlBus, Subscription};
use folio_pipeline::config::PipelineConfig;
use folio_pipeline::coordinator::Coordinator;
use folio_pipeline::envelope::{CompletionEnvelope, JobEnvelope};
use folio_pipeline::error::{FailureKind, SubmissionError};
use folio_pipeline::transform::{DocumentTransform, StubTransform, TransformError};
use folio_pipeline::worker::Worker;

/// Transform whose output depends on its input, so results can be traced
/// back to the submission that produced them.
struct EchoTransform;

#[async_trait]
impl DocumentTransform for EchoTransform {
    async fn process(&self, input: Bytes, _options: &Value) -> Result<Bytes, TransformError> {
        let text = String::from_utf8_lossy(&input);
        Ok(Bytes::from(format!("processed:{text}")))
    }
}

/// Bus wrapper with failure injection for publish paths.
struct FlakyBus {
    inner: Arc<InMemoryControlBus>,
    fail_job_publishes: AtomicBool,
    completion_failures_remaining: AtomicU32,
}

impl FlakyBus {
    fn new(inner: Arc<InMemoryControlBus>) -> Self {
        Self {
            inner,
            fail_job_publishes: AtomicBool::new(false),
            completion_failures_remaining: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ControlBus for FlakyBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> folio_pipeline::error::Result<()> {
        if subject.ends_with(".jobs") && self.fail_job_publishes.load(Ordering::SeqCst) {
            return Err(folio_pipeline::error::Error::bus("injected publish outage"));
        }
        if subject.ends_with(".completions") {
            let remaining = self.completion_failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.completion_failures_remaining
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(folio_pipeline::error::Error::bus("injected publish outage"));
            }
        }
        self.inner.publish(subject, payload).await
    }

    async fn subscribe(
        &self,
        subject: &str,
        group: &str,
    ) -> folio_pipeline::error::Result<Subscription> {
        self.inner.subscribe(subject, group).await
    }
}

struct Pipeline {
    store: Arc<MemoryArtifactStore>,
    bus: Arc<InMemoryControlBus>,
    coordinator: Coordinator,
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        sweep_interval: Duration::from_millis(50),
        ..PipelineConfig::default()
    }
}

/// Starts a coordinator plus `workers` worker instances sharing one group.
async fn start_pipeline(workers: usize, transform: Arc<dyn DocumentTransform>) -> Pipeline {
    let store = Arc::new(MemoryArtifactStore::new("documents"));
    let bus = Arc::new(InMemoryControlBus::new());
    let config = fast_config();

    for _ in 0..workers {
        let worker = Worker::new(
            Arc::clone(&store) as Arc<dyn ArtifactStore>,
            Arc::clone(&bus) as Arc<dyn ControlBus>,
            Arc::clone(&transform),
            config.clone(),
        );
        tokio::spawn(async move { worker.run().await });
    }

    let coordinator = Coordinator::start(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&bus) as Arc<dyn ControlBus>,
        config,
    )
    .await
    .expect("coordinator should start");

    Pipeline {
        store,
        bus,
        coordinator,
    }
}

#[tokio::test]
async fn scenario_small_document_completes_well_under_deadline() {
    let pipeline = start_pipeline(1, Arc::new(EchoTransform)).await;

    let started = Instant::now();
    let outcome = pipeline
        .coordinator
        .submit(
            Bytes::from("0123456789"),
            json!({"mode": "fast"}),
            Duration::from_secs(5),
        )
        .await
        .expect("job should succeed");

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(
        outcome.result_location.key,
        result_artifact_key(&outcome.request_id)
    );
    let result = pipeline.store.get(&outcome.result_location).await.unwrap();
    assert_eq!(result, Bytes::from("processed:0123456789"));
    // The job message was acknowledged, not left for redelivery.
    assert_eq!(
        pipeline.bus.queue_depth("docs.jobs", "workers").unwrap(),
        0
    );
}

#[tokio::test]
async fn concurrent_submissions_never_cross_correlate() {
    let pipeline = start_pipeline(4, Arc::new(EchoTransform)).await;
    let coordinator = Arc::new(pipeline.coordinator);

    let mut handles = Vec::new();
    for i in 0..12 {
        let coordinator = Arc::clone(&coordinator);
        handles.push(tokio::spawn(async move {
            let payload = format!("doc-{i}");
            let outcome = coordinator
                .submit(
                    Bytes::from(payload.clone()),
                    json!({"index": i}),
                    Duration::from_secs(10),
                )
                .await
                .expect("job should succeed");
            (payload, outcome)
        }));
    }

    let mut request_ids = Vec::new();
    for joined in futures::future::join_all(handles).await {
        let (payload, outcome) = joined.unwrap();
        // Each caller gets the result derived from its own payload.
        let result = pipeline.store.get(&outcome.result_location).await.unwrap();
        assert_eq!(result, Bytes::from(format!("processed:{payload}")));
        request_ids.push(outcome.request_id);
    }

    request_ids.sort_by_key(|id| id.to_string());
    request_ids.dedup();
    assert_eq!(request_ids.len(), 12, "request ids must be unique");
    assert_eq!(coordinator.pending(), 0);
}

#[tokio::test]
async fn duplicate_completion_delivery_is_absorbed() {
    let store = Arc::new(MemoryArtifactStore::new("documents"));
    let bus = Arc::new(InMemoryControlBus::new());
    let config = fast_config();

    // Observe completions the way a second, duplicated delivery would look.
    let mut observer = bus.subscribe("docs.completions", "observer").await.unwrap();

    let worker = Worker::new(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&bus) as Arc<dyn ControlBus>,
        Arc::new(StubTransform::new("result")),
        config.clone(),
    );
    tokio::spawn(async move { worker.run().await });

    let coordinator = Coordinator::start(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&bus) as Arc<dyn ControlBus>,
        config,
    )
    .await
    .unwrap();

    let outcome = coordinator
        .submit(Bytes::from("doc"), Value::Null, Duration::from_secs(5))
        .await
        .expect("job should succeed");

    // Replay the completion envelope, as an at-least-once bus may.
    let delivery = tokio::time::timeout(Duration::from_secs(2), observer.next())
        .await
        .unwrap()
        .unwrap();
    bus.publish("docs.completions", delivery.payload.clone())
        .await
        .unwrap();
    delivery.ack();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The duplicate resolves nothing and corrupts nothing.
    assert_eq!(coordinator.pending(), 0);
    let result = store.get(&outcome.result_location).await.unwrap();
    assert_eq!(result, Bytes::from("result"));

    // The coordinator still works afterwards.
    let again = coordinator
        .submit(Bytes::from("doc2"), Value::Null, Duration::from_secs(5))
        .await
        .expect("second job should succeed");
    assert_ne!(again.request_id, outcome.request_id);
}

#[tokio::test]
async fn completion_publish_crash_recovers_via_redelivery() {
    let store = Arc::new(MemoryArtifactStore::new("documents"));
    let inner_bus = Arc::new(InMemoryControlBus::new());
    let flaky = Arc::new(FlakyBus::new(Arc::clone(&inner_bus)));
    let config = fast_config();

    // The first completion publish fails: the worker has uploaded the result
    // but cannot report it, so the message must survive for redelivery.
    flaky.completion_failures_remaining.store(1, Ordering::SeqCst);

    let worker = Worker::new(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&flaky) as Arc<dyn ControlBus>,
        Arc::new(StubTransform::new("result")),
        config.clone(),
    );
    tokio::spawn(async move { worker.run().await });

    let coordinator = Coordinator::start(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&flaky) as Arc<dyn ControlBus>,
        config,
    )
    .await
    .unwrap();

    let outcome = coordinator
        .submit(Bytes::from("doc"), Value::Null, Duration::from_secs(10))
        .await
        .expect("job should succeed after redelivery");

    let result = store.get(&outcome.result_location).await.unwrap();
    assert_eq!(result, Bytes::from("result"));
    // Exactly one durable result despite the reprocessing.
    assert_eq!(store.list(RESULT_PREFIX).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unserved_job_times_out_after_the_deadline() {
    // No workers: the job is published and nobody answers.
    let pipeline = start_pipeline(0, Arc::new(StubTransform::default())).await;

    let timeout = Duration::from_secs(1);
    let started = Instant::now();
    let err = pipeline
        .coordinator
        .submit(Bytes::from("doc"), Value::Null, timeout)
        .await
        .unwrap_err();
    let waited = started.elapsed();

    match err {
        SubmissionError::Timeout { .. } => {}
        other => panic!("expected timeout, got {other}"),
    }
    // Not before the deadline, and within bounded scheduling slack.
    assert!(waited >= timeout);
    assert!(waited < timeout + Duration::from_millis(500));

    // Bookkeeping and artifacts are reclaimed.
    assert_eq!(pipeline.coordinator.pending(), 0);
    assert!(pipeline.store.list(RAW_PREFIX).await.unwrap().is_empty());
    assert!(pipeline.store.list(RESULT_PREFIX).await.unwrap().is_empty());
}

#[tokio::test]
async fn job_publish_failure_cleans_up_the_uploaded_artifact() {
    let store = Arc::new(MemoryArtifactStore::new("documents"));
    let inner_bus = Arc::new(InMemoryControlBus::new());
    let flaky = Arc::new(FlakyBus::new(Arc::clone(&inner_bus)));

    let coordinator = Coordinator::start(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&flaky) as Arc<dyn ControlBus>,
        fast_config(),
    )
    .await
    .unwrap();

    flaky.fail_job_publishes.store(true, Ordering::SeqCst);
    let err = coordinator
        .submit(Bytes::from("doc"), Value::Null, Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err, SubmissionError::BusUnavailable { .. }));
    // The upload succeeded before the publish failed, and was rolled back.
    assert!(store.list(RAW_PREFIX).await.unwrap().is_empty());
    assert_eq!(coordinator.pending(), 0);
}

#[tokio::test]
async fn invalid_job_envelope_fails_remotely_with_invalid_job_kind() {
    let store = Arc::new(MemoryArtifactStore::new("documents"));
    let bus = Arc::new(InMemoryControlBus::new());
    let config = fast_config();

    let worker = Worker::new(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&bus) as Arc<dyn ControlBus>,
        Arc::new(StubTransform::default()),
        config.clone(),
    );
    tokio::spawn(async move { worker.run().await });

    let coordinator = Coordinator::start(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&bus) as Arc<dyn ControlBus>,
        config,
    )
    .await
    .unwrap();

    // Bypass the coordinator's own validation and publish an envelope with
    // no artifact reference, as a buggy or newer client might.
    let submitter = {
        let bus = Arc::clone(&bus);
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let envelope = {
                let request_id = folio_core::RequestId::generate();
                let location = store
                    .put(&raw_artifact_key(&request_id), Bytes::from("doc"))
                    .await
                    .unwrap();
                let descriptor = store.presign(&location, Duration::from_secs(60)).await.unwrap();
                let mut envelope = JobEnvelope::new(
                    request_id,
                    location,
                    descriptor,
                    3,
                    Duration::from_secs(5),
                    Value::Null,
                );
                envelope.artifact_location = ArtifactLocation::default();
                envelope
            };
            let mut value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
            value.as_object_mut().unwrap().remove("artifact_location");
            bus.publish("docs.jobs", Bytes::from(value.to_string()))
                .await
                .unwrap();
            envelope.request_id
        })
    };
    let request_id = submitter.await.unwrap();

    // The worker rejects it exactly once: failed completion, then ack.
    let mut observer = bus.subscribe("docs.completions", "observer").await.unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(2), observer.next())
        .await
        .expect("completion should be published")
        .unwrap();
    let completion = CompletionEnvelope::from_slice(&delivery.payload).unwrap();
    delivery.ack();

    assert_eq!(completion.request_id, request_id);
    assert_eq!(completion.error.unwrap().kind, FailureKind::InvalidJob);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        bus.queue_depth("docs.jobs", "workers").unwrap(),
        0,
        "the malformed job must not loop through redelivery"
    );
    let _ = coordinator;
}

#[tokio::test]
async fn remote_processing_failure_is_typed_for_the_caller() {
    let pipeline = start_pipeline(
        1,
        Arc::new(folio_pipeline::transform::FailingTransform::new(
            "cannot parse document",
        )),
    )
    .await;

    let err = pipeline
        .coordinator
        .submit(Bytes::from("doc"), Value::Null, Duration::from_secs(5))
        .await
        .unwrap_err();

    match err {
        SubmissionError::JobFailed { kind, message, .. } => {
            assert_eq!(kind, FailureKind::ProcessingError);
            assert!(message.contains("cannot parse document"));
        }
        other => panic!("expected remote failure, got {other}"),
    }
    // Failed jobs leave no artifacts behind.
    assert!(pipeline.store.list(RAW_PREFIX).await.unwrap().is_empty());
}

#[tokio::test]
async fn caller_cancellation_stops_waiting_and_reclaims_the_input() {
    let pipeline = start_pipeline(0, Arc::new(StubTransform::default())).await;
    let coordinator = Arc::new(pipeline.coordinator);

    let submit = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            coordinator
                .submit(Bytes::from("doc"), Value::Null, Duration::from_secs(60))
                .await
        })
    };

    // Wait until the job is registered, then cancel the caller.
    tokio::time::timeout(Duration::from_secs(2), async {
        while coordinator.pending() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("submission should register");
    submit.abort();
    let _ = submit.await;

    // Bookkeeping is gone and the raw input is reclaimed best-effort.
    assert_eq!(coordinator.pending(), 0);
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if pipeline.store.list(RAW_PREFIX).await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("cancelled submission should clean up its artifact");
}
