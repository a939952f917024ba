//! Artifact store abstraction for object storage (S3, GCS, local).
//!
//! This module defines the storage contract the pipeline consumes. The store
//! is an external collaborator: backends provide durable blob storage keyed
//! by `bucket/key` plus presigned-URL issuance for credential-free worker
//! reads.
//!
//! ## Design Principles
//!
//! - **Backend agnostic**: Same interface for S3, GCS, and the in-memory
//!   backend used in tests
//! - **Idempotent overwrite**: `put` unconditionally replaces; the pipeline's
//!   durability rule is that reprocessing a job rewrites the same key
//! - **Idempotent delete**: deleting an absent object succeeds

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::error::{Error, Result};

/// A reference to a stored artifact: bucket/container plus object key.
///
/// The `Default` value is empty and fails envelope validation; it exists so
/// wire decoding can surface an absent location as a missing field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactLocation {
    /// Bucket or container name.
    pub bucket: String,
    /// Object key within the bucket.
    pub key: String,
}

impl ArtifactLocation {
    /// Creates a new artifact location.
    #[must_use]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// A time-bounded, scope-limited credential for reading one artifact.
///
/// Workers fetch the input artifact through this descriptor instead of
/// holding bus-wide storage credentials. The issuer must set the expiry
/// at least as far out as the job's processing timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDescriptor {
    /// Presigned URL granting read access to exactly one object.
    pub url: String,
    /// Instant after which the URL stops working.
    pub expires_at: DateTime<Utc>,
}

impl AccessDescriptor {
    /// Returns true if the descriptor is no longer valid at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Metadata about a stored artifact.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Where the artifact lives.
    pub location: ArtifactLocation,
    /// Artifact size in bytes.
    pub size: u64,
    /// Last modification timestamp.
    pub last_modified: DateTime<Utc>,
}

/// Artifact store trait for object storage.
///
/// All backends (S3, GCS, memory) implement this trait. The contract is
/// designed for cloud object storage semantics; the store never provides
/// cross-process locking beyond what the backend itself guarantees.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Writes an artifact under `key`, replacing any existing object.
    async fn put(&self, key: &str, data: Bytes) -> Result<ArtifactLocation>;

    /// Reads an entire artifact.
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    async fn get(&self, location: &ArtifactLocation) -> Result<Bytes>;

    /// Reads an artifact through a presigned access descriptor.
    ///
    /// Returns `Error::DescriptorExpired` if the descriptor's expiry has
    /// passed (permanent failure), `Error::NotFound` if the URL resolves to
    /// no object, and `Error::Storage` for transport failures (transient).
    async fn fetch(&self, descriptor: &AccessDescriptor) -> Result<Bytes>;

    /// Issues a presigned read credential for one artifact.
    async fn presign(&self, location: &ArtifactLocation, ttl: Duration) -> Result<AccessDescriptor>;

    /// Deletes an artifact.
    ///
    /// Succeeds even if the object doesn't exist (idempotent).
    async fn delete(&self, location: &ArtifactLocation) -> Result<()>;

    /// Gets artifact metadata without reading content.
    ///
    /// Returns `None` if the object doesn't exist.
    async fn head(&self, location: &ArtifactLocation) -> Result<Option<ObjectMeta>>;

    /// Lists artifacts whose key starts with the given prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;
}

/// In-memory artifact store for testing.
///
/// Thread-safe via `RwLock`. Not suitable for production. Presigned URLs use
/// a `memory://` scheme that only this backend's `fetch` can resolve.
#[derive(Debug)]
pub struct MemoryArtifactStore {
    bucket: String,
    objects: RwLock<HashMap<String, StoredObject>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

/// Converts a lock poison error to an internal error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::Internal {
        message: "artifact store lock poisoned".into(),
    }
}

impl MemoryArtifactStore {
    /// Creates a new empty in-memory store for the given bucket.
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the bucket this store serves.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn check_bucket(&self, location: &ArtifactLocation) -> Result<()> {
        if location.bucket == self.bucket {
            Ok(())
        } else {
            Err(Error::NotFound(format!(
                "bucket not served by this store: {}",
                location.bucket
            )))
        }
    }

    /// Parses a `memory://bucket/key?expires=...` URL back into a location.
    fn parse_url(url: &str) -> Result<ArtifactLocation> {
        let rest = url
            .strip_prefix("memory://")
            .ok_or_else(|| Error::InvalidInput(format!("unsupported URL scheme: {url}")))?;
        let rest = rest.split('?').next().unwrap_or(rest);
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| Error::InvalidInput(format!("malformed artifact URL: {url}")))?;
        if bucket.is_empty() || key.is_empty() {
            return Err(Error::InvalidInput(format!("malformed artifact URL: {url}")));
        }
        Ok(ArtifactLocation::new(bucket, key))
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<ArtifactLocation> {
        if key.is_empty() {
            return Err(Error::InvalidInput("artifact key cannot be empty".into()));
        }
        let mut objects = self.objects.write().map_err(poison_err)?;
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now(),
            },
        );
        drop(objects);
        Ok(ArtifactLocation::new(self.bucket.clone(), key))
    }

    async fn get(&self, location: &ArtifactLocation) -> Result<Bytes> {
        self.check_bucket(location)?;
        let objects = self.objects.read().map_err(poison_err)?;
        objects
            .get(&location.key)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {location}")))
    }

    async fn fetch(&self, descriptor: &AccessDescriptor) -> Result<Bytes> {
        if descriptor.is_expired(Utc::now()) {
            return Err(Error::DescriptorExpired {
                expired_at: descriptor.expires_at,
            });
        }
        let location = Self::parse_url(&descriptor.url)?;
        self.get(&location).await
    }

    async fn presign(&self, location: &ArtifactLocation, ttl: Duration) -> Result<AccessDescriptor> {
        self.check_bucket(location)?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::InvalidInput(format!("presign ttl out of range: {e}")))?;
        let expires_at = Utc::now() + ttl;
        Ok(AccessDescriptor {
            url: format!(
                "memory://{}/{}?expires={}",
                location.bucket,
                location.key,
                expires_at.to_rfc3339()
            ),
            expires_at,
        })
    }

    async fn delete(&self, location: &ArtifactLocation) -> Result<()> {
        self.check_bucket(location)?;
        self.objects
            .write()
            .map_err(poison_err)?
            .remove(&location.key);
        Ok(())
    }

    async fn head(&self, location: &ArtifactLocation) -> Result<Option<ObjectMeta>> {
        self.check_bucket(location)?;
        let objects = self.objects.read().map_err(poison_err)?;
        Ok(objects.get(&location.key).map(|o| ObjectMeta {
            location: location.clone(),
            size: o.data.len() as u64,
            last_modified: o.last_modified,
        }))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(poison_err)?;
        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(key, o)| ObjectMeta {
                location: ArtifactLocation::new(self.bucket.clone(), key.clone()),
                size: o.data.len() as u64,
                last_modified: o.last_modified,
            })
            .collect())
    }
}
