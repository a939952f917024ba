//! # folio-pipeline
//!
//! Control-bus protocol and delivery semantics for the Folio
//! document-processing pipeline.
//!
//! This crate implements the state machine that ties an object-storage
//! artifact to a bus message to a worker execution and back:
//!
//! - **Job Envelopes**: The validated wire contract between coordinator and
//!   workers, with an opaque pass-through options payload
//! - **Submission Coordinator**: Uploads, publishes, correlates completions
//!   by request id, enforces timeouts, and cleans up on every failure path
//! - **Worker Loop**: At-least-once consumption with
//!   acknowledgment-after-durable-effects and idempotent result overwrite
//! - **Correlation Registry**: Concurrent pending-request tracking where
//!   exactly one of resolve/timeout wins per request
//!
//! ## Guarantees
//!
//! - **At-least-once tolerant**: Redelivered jobs overwrite the same result
//!   location; duplicate completions resolve to no-ops
//! - **No lost results**: A message is acknowledged only after its result is
//!   durably stored and its completion published
//! - **Isolated failures**: One bad message never takes a worker down
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use bytes::Bytes;
//! use folio_core::MemoryArtifactStore;
//! use folio_pipeline::bus::memory::InMemoryControlBus;
//! use folio_pipeline::config::PipelineConfig;
//! use folio_pipeline::coordinator::Coordinator;
//! use folio_pipeline::transform::StubTransform;
//! use folio_pipeline::worker::Worker;
//!
//! # async fn example() -> folio_pipeline::error::Result<()> {
//! let store = Arc::new(MemoryArtifactStore::new("documents"));
//! let bus = Arc::new(InMemoryControlBus::new());
//! let config = PipelineConfig::default();
//!
//! let worker = Worker::new(
//!     store.clone(),
//!     bus.clone(),
//!     Arc::new(StubTransform::default()),
//!     config.clone(),
//! );
//! tokio::spawn(async move { worker.run().await });
//!
//! let coordinator = Coordinator::start(store, bus, config).await?;
//! let outcome = coordinator
//!     .submit(
//!         Bytes::from("%PDF-1.4 ..."),
//!         serde_json::json!({"mode": "fast"}),
//!         Duration::from_secs(600),
//!     )
//!     .await;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod envelope;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod transform;
pub mod worker;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::bus::{AckHandle, ControlBus, Delivery, Subscription};
    pub use crate::bus::memory::InMemoryControlBus;
    pub use crate::config::PipelineConfig;
    pub use crate::coordinator::{Coordinator, ProcessingOutcome};
    pub use crate::envelope::{
        CompletionEnvelope, CompletionStatus, JobEnvelope, JobError,
    };
    pub use crate::error::{Error, FailureKind, Result, SchemaError, SubmissionError};
    pub use crate::metrics::PipelineMetrics;
    pub use crate::registry::{CompletionOutcome, PendingRegistry, Waiter};
    pub use crate::transform::{DocumentTransform, StubTransform, TransformError};
    pub use crate::worker::{Disposition, Worker};
}
