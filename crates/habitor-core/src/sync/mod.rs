//! Offline-first sync engine
//!
//! Local writes always land first. Remote writes are best effort: when they
//! cannot happen (offline) or fail, the operation goes into the durable
//! [`SyncQueue`] and the [`SyncCoordinator`] replays it later. The
//! [`ConflictResolver`] handles the one-off case of signing into an account
//! that already has data while the device holds records never uploaded.

mod coordinator;
mod queue;
mod repository;
mod resolver;

#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, TryLockError};

use crate::connectivity::ConnectivityMonitor;
use crate::db::LocalStore;
use crate::error::Result;
use crate::identity::AccountIdentity;
use crate::models::{Record, RemoteKey};
use crate::remote::RemoteStore;
use crate::util::now_millis;

pub use coordinator::SyncCoordinator;
pub use queue::{DrainReport, SyncQueue};
pub use repository::RecordRepository;
pub use resolver::{
    complete_sign_in, ConflictResolver, MergeAction, MergeCheck, MergeReport, MergeStepError,
    MergeStrategy, SignInOutcome,
};

/// Collaborators shared by every sync component
#[derive(Clone)]
pub struct SyncContext {
    pub local: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub connectivity: ConnectivityMonitor,
    pub identity: Arc<dyn AccountIdentity>,
}

impl SyncContext {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        connectivity: ConnectivityMonitor,
        identity: Arc<dyn AccountIdentity>,
    ) -> Self {
        Self {
            local,
            remote,
            connectivity,
            identity,
        }
    }

    /// Remote sync only happens for an authenticated identity
    pub fn sync_enabled(&self) -> bool {
        self.identity.is_authenticated()
    }

    /// Write the current state of `record` remotely and stamp it locally
    ///
    /// Creates a document when the record has no key yet, otherwise sets the
    /// document at its key. Remote failures come back as `Error::Remote`.
    pub(crate) async fn push_record(&self, account: &str, record: &Record) -> Result<RemoteKey> {
        let stamp = now_millis();
        let fields = record.to_fields(stamp);
        let key = match &record.remote_key {
            Some(key) => {
                self.remote.set(account, key, &fields).await?;
                key.clone()
            }
            None => self.remote.create(account, &fields).await?,
        };

        self.local.mark_synced(record.local_id, &key, stamp)?;
        tracing::debug!("Pushed record {} as {key}", record.local_id);
        Ok(key)
    }
}

/// Result of a sync session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub message: String,
    /// Queue entries replayed successfully
    pub drained: usize,
    /// Queue entries still pending after the session
    pub pending: usize,
    /// Remote documents inserted locally by the pull
    pub imported: usize,
    /// Local records overwritten by newer remote documents
    pub overwritten: usize,
}

impl SyncOutcome {
    pub fn not_required() -> Self {
        Self {
            success: true,
            message: "Sync not required".to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn coalesced() -> Self {
        Self {
            success: true,
            message: "Sync already running; changes will be picked up by a follow-up pass"
                .to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::default()
        }
    }
}

/// What the coordinator is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SyncPhase {
    #[default]
    Idle,
    DrainingQueue,
    Pulling,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::DrainingQueue => "draining queue",
            Self::Pulling => "pulling",
        };
        f.write_str(label)
    }
}

/// Serializes sync sessions and merges
#[derive(Clone, Default)]
pub struct SessionGate {
    inner: Arc<Mutex<()>>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().await
    }

    pub fn try_lock(&self) -> std::result::Result<MutexGuard<'_, ()>, TryLockError> {
        self.inner.try_lock()
    }
}
