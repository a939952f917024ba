//! Strongly-typed identifiers for Folio entities.
//!
//! All identifiers in Folio are:
//! - **Strongly typed**: Prevents mixing up different ID types at compile time
//! - **Globally unique**: No coordination required for generation
//!
//! `RequestId` is a UUID because it is part of the wire contract: it travels
//! through job and completion envelopes and correlates the entire job
//! lifecycle. `MessageId` identifies a single bus delivery and uses a ULID so
//! message ids sort by enqueue time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;
use uuid::Uuid;

use crate::error::{Error, Result};

/// The correlation key for one job, end to end.
///
/// Generated by the coordinator at submission time and never reused. Every
/// job envelope, completion envelope, and artifact key derives from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a new unique request ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a request ID from a raw UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s).map(Self).map_err(|e| Error::InvalidId {
            message: format!("invalid request ID '{s}': {e}"),
        })
    }
}

/// A unique identifier for one message delivery on the control bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Ulid);

impl MessageId {
    /// Generates a new unique message ID.
    ///
    /// ULIDs are lexicographically sortable by creation time, so message ids
    /// order naturally by enqueue order.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates a message ID from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid message ID '{s}': {e}"),
            })
    }
}
