//! Per-account remote document store

mod http;
mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{RecordFields, RemoteDocument, RemoteKey};

pub use http::HttpRemoteStore;
pub use memory::{InMemoryRemoteStore, RemoteCalls};

/// Whether retrying a failed remote call may succeed
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing the payload
    Permanent,
    /// Retry may help (outage, timeout, throttling)
    Retryable,
}

impl Transience {
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
    #[error("Remote store request timed out")]
    Timeout,
    #[error("Remote store rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

impl RemoteError {
    pub const fn transience(&self) -> Transience {
        match self {
            Self::Unavailable(_) | Self::Timeout => Transience::Retryable,
            Self::Rejected { .. } | Self::InvalidPayload(_) => Transience::Permanent,
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Document collection scoped under an account identifier
///
/// Every call may fail; callers degrade failures to queued retries.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Every document in the account's collection
    async fn list_all(&self, account: &str) -> RemoteResult<Vec<RemoteDocument>>;

    async fn get(&self, account: &str, key: &RemoteKey) -> RemoteResult<Option<RemoteDocument>>;

    /// Write a new document under a freshly assigned key
    async fn create(&self, account: &str, fields: &RecordFields) -> RemoteResult<RemoteKey>;

    /// Write a document at a known key, creating it if absent
    async fn set(&self, account: &str, key: &RemoteKey, fields: &RecordFields) -> RemoteResult<()>;

    /// Remove a document; removing a missing document succeeds
    async fn delete(&self, account: &str, key: &RemoteKey) -> RemoteResult<()>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Remote store used when no backend is configured; every call is unavailable
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredRemote;

impl UnconfiguredRemote {
    fn unavailable<T>() -> RemoteResult<T> {
        Err(RemoteError::Unavailable(
            "no remote store configured".to_string(),
        ))
    }
}

#[async_trait]
impl RemoteStore for UnconfiguredRemote {
    async fn list_all(&self, _account: &str) -> RemoteResult<Vec<RemoteDocument>> {
        Self::unavailable()
    }

    async fn get(&self, _account: &str, _key: &RemoteKey) -> RemoteResult<Option<RemoteDocument>> {
        Self::unavailable()
    }

    async fn create(&self, _account: &str, _fields: &RecordFields) -> RemoteResult<RemoteKey> {
        Self::unavailable()
    }

    async fn set(&self, _account: &str, _key: &RemoteKey, _fields: &RecordFields) -> RemoteResult<()> {
        Self::unavailable()
    }

    async fn delete(&self, _account: &str, _key: &RemoteKey) -> RemoteResult<()> {
        Self::unavailable()
    }

    fn name(&self) -> &'static str {
        "unconfigured"
    }
}
