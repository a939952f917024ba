//! # folio-core
//!
//! Core abstractions for the Folio document-processing pipeline.
//!
//! This crate provides the foundational types and traits used across all
//! Folio components:
//!
//! - **Identifiers**: Strongly-typed IDs for requests and bus messages
//! - **Artifact Store**: Abstract object-storage interface with presigned
//!   read access, plus an in-memory backend for tests
//! - **Key Layout**: The `raw/{id}` / `results/{id}` artifact keyspace
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `folio-core` is the only crate allowed to define shared primitives. The
//! pipeline crate builds the protocol on top of these contracts and never
//! reaches around them.
//!
//! ## Example
//!
//! ```rust
//! use folio_core::prelude::*;
//!
//! let request_id = RequestId::generate();
//! let key = raw_artifact_key(&request_id);
//! assert!(key.starts_with("raw/"));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod paths;
pub mod storage;

pub use error::{Error, Result};
pub use id::{MessageId, RequestId};
pub use storage::{AccessDescriptor, ArtifactLocation, ArtifactStore, MemoryArtifactStore, ObjectMeta};

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use folio_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{MessageId, RequestId};
    pub use crate::paths::{raw_artifact_key, result_artifact_key};
    pub use crate::storage::{
        AccessDescriptor, ArtifactLocation, ArtifactStore, MemoryArtifactStore, ObjectMeta,
    };
}
