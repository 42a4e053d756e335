//! Deferred remote write model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{LocalId, Record, RemoteKey};
use crate::error::Error;
use crate::util::now_millis;

/// Kind of remote write that was deferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
}

impl OperationType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!(
                "unknown queue operation: {other}"
            ))),
        }
    }
}

/// A queued remote write, as persisted in the local store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Auto-assigned row id, tie-breaker for equal `created_at`
    pub id: i64,
    pub operation: OperationType,
    pub local_id: LocalId,
    /// Record state at enqueue time
    pub snapshot: Record,
    /// Enqueue time (Unix ms), the FIFO order key
    pub created_at: i64,
}

impl QueueEntry {
    /// Remote key captured in the snapshot, if the record had one at enqueue time
    #[must_use]
    pub const fn snapshot_remote_key(&self) -> Option<&RemoteKey> {
        self.snapshot.remote_key.as_ref()
    }
}

/// A queue entry that has not been persisted yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueEntry {
    pub operation: OperationType,
    pub local_id: LocalId,
    pub snapshot: Record,
    pub created_at: i64,
}

impl NewQueueEntry {
    /// Capture `record` for a deferred `operation`, stamped with the current time
    #[must_use]
    pub fn new(operation: OperationType, record: &Record) -> Self {
        Self {
            operation,
            local_id: record.local_id,
            snapshot: record.clone(),
            created_at: now_millis(),
        }
    }

    /// Override the enqueue time
    #[must_use]
    pub const fn at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }
}
