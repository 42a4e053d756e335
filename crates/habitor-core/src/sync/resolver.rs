//! Sign-in conflict resolution
//!
//! When a device holding never-uploaded records signs into an account, the
//! user picks how the two sets combine. The merge runs under the session gate
//! and is not transactional: each failed step is recorded and the merge moves
//! on.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use super::{SessionGate, SyncContext, SyncCoordinator, SyncOutcome, SyncQueue};
use crate::error::{Error, Result};
use crate::identity::SessionIdentity;
use crate::models::{LocalId, OperationType, Record, RemoteDocument, RemoteKey};
use crate::util::now_millis;

/// How local and remote records combine at sign-in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MergeStrategy {
    /// Remote is replaced by the device's records
    KeepLocal,
    /// Device's unsynced records are dropped in favour of the remote
    KeepCloud,
    /// Records are matched by name and the newer side wins
    MergeBoth,
}

impl MergeStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepLocal => "keep-local",
            Self::KeepCloud => "keep-cloud",
            Self::MergeBoth => "merge-both",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "keep-local" => Ok(Self::KeepLocal),
            "keep-cloud" => Ok(Self::KeepCloud),
            "merge-both" => Ok(Self::MergeBoth),
            other => Err(Error::InvalidInput(format!("unknown merge strategy: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeCheck {
    pub needed: bool,
    /// Active local records without a remote key
    pub local_unsynced: usize,
    /// Documents currently stored remotely
    pub remote_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MergeAction {
    ListRemote,
    DeleteRemote,
    Upload,
    Import,
    DeleteLocal,
}

impl fmt::Display for MergeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ListRemote => "list remote habits",
            Self::DeleteRemote => "delete remote habit",
            Self::Upload => "upload habit",
            Self::Import => "import habit",
            Self::DeleteLocal => "delete local habit",
        };
        f.write_str(label)
    }
}

/// One failed step of a merge
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("{action} '{subject}': {reason}")]
pub struct MergeStepError {
    pub action: MergeAction,
    /// Habit name or remote key the step was about
    pub subject: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub strategy: MergeStrategy,
    pub success: bool,
    pub message: String,
    pub uploaded: usize,
    pub imported: usize,
    pub overwritten: usize,
    pub deleted_local: usize,
    pub deleted_remote: usize,
    pub failures: Vec<MergeStepError>,
}

impl MergeReport {
    fn new(strategy: MergeStrategy) -> Self {
        Self {
            strategy,
            success: true,
            message: String::new(),
            uploaded: 0,
            imported: 0,
            overwritten: 0,
            deleted_local: 0,
            deleted_remote: 0,
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, action: MergeAction, subject: impl Into<String>, reason: impl fmt::Display) {
        let failure = MergeStepError {
            action,
            subject: subject.into(),
            reason: reason.to_string(),
        };
        tracing::warn!("Merge step failed: {failure}");
        self.failures.push(failure);
    }

    fn finish(mut self) -> Self {
        self.success = self.failures.is_empty();
        let mut parts = Vec::new();
        if self.uploaded > 0 {
            parts.push(format!("uploaded {}", self.uploaded));
        }
        if self.imported > 0 {
            parts.push(format!("imported {}", self.imported));
        }
        if self.overwritten > 0 {
            parts.push(format!("updated {} from cloud", self.overwritten));
        }
        if self.deleted_local > 0 {
            parts.push(format!("removed {} local", self.deleted_local));
        }
        if self.deleted_remote > 0 {
            parts.push(format!("removed {} from cloud", self.deleted_remote));
        }
        let summary = if parts.is_empty() {
            "nothing to change".to_string()
        } else {
            parts.join(", ")
        };
        self.message = if self.success {
            format!("Merge ({}) complete: {summary}", self.strategy)
        } else {
            format!(
                "Merge ({}) finished with {} failed steps: {summary}",
                self.strategy,
                self.failures.len()
            )
        };
        tracing::info!("{}", self.message);
        self
    }

    fn aborted(mut self, action: MergeAction, subject: &str, reason: impl fmt::Display) -> Self {
        self.fail(action, subject, reason);
        self.success = false;
        self.message = format!(
            "Merge ({}) aborted before any change: failed to {action}",
            self.strategy
        );
        tracing::warn!("{}", self.message);
        self
    }
}

pub struct ConflictResolver {
    ctx: SyncContext,
    queue: SyncQueue,
    gate: SessionGate,
}

impl ConflictResolver {
    /// `gate` must be the coordinator's gate so merges never overlap a session
    pub fn new(ctx: SyncContext, gate: SessionGate) -> Self {
        let queue = SyncQueue::new(ctx.local.clone());
        Self { ctx, queue, gate }
    }

    fn unsynced_locals(&self) -> Result<Vec<Record>> {
        Ok(self
            .ctx
            .local
            .get_all()?
            .into_iter()
            .filter(|record| !record.deleted && !record.is_synced())
            .collect())
    }

    /// Whether signing into `account` needs a merge decision
    pub async fn check_merge_needed(&self, account: &str) -> Result<MergeCheck> {
        let local_unsynced = self.unsynced_locals()?.len();
        if local_unsynced == 0 {
            return Ok(MergeCheck::default());
        }

        let remote_count = match self.ctx.remote.list_all(account).await {
            Ok(documents) => documents.len(),
            Err(error) => {
                tracing::warn!("Could not list remote habits for merge check: {error}");
                0
            }
        };

        Ok(MergeCheck {
            needed: true,
            local_unsynced,
            remote_count,
        })
    }

    pub async fn execute_merge(&self, account: &str, strategy: MergeStrategy) -> MergeReport {
        let _guard = self.gate.lock().await;
        tracing::info!("Merging into {account} with strategy {strategy}");

        let report = MergeReport::new(strategy);
        match strategy {
            MergeStrategy::KeepLocal => self.keep_local(account, report).await,
            MergeStrategy::KeepCloud => self.keep_cloud(account, report).await,
            MergeStrategy::MergeBoth => self.merge_both(account, report).await,
        }
    }

    async fn keep_local(&self, account: &str, mut report: MergeReport) -> MergeReport {
        let documents = match self.ctx.remote.list_all(account).await {
            Ok(documents) => documents,
            Err(error) => return report.aborted(MergeAction::ListRemote, account, error),
        };
        let locals = match self.ctx.local.get_all() {
            Ok(records) => records,
            Err(error) => return report.aborted(MergeAction::Upload, "local habits", error),
        };

        for document in &documents {
            match self.ctx.remote.delete(account, &document.key).await {
                Ok(()) => report.deleted_remote += 1,
                Err(error) => report.fail(MergeAction::DeleteRemote, document.key.as_str(), error),
            }
        }

        for record in locals.into_iter().filter(|record| !record.deleted) {
            // Every upload gets a fresh key; old keys point at deleted documents
            let fresh = Record {
                remote_key: None,
                last_synced_at: 0,
                ..record
            };
            if let Err(error) = self.ctx.local.update(&fresh) {
                report.fail(MergeAction::Upload, &fresh.name, error);
                continue;
            }
            self.upload(account, &fresh, &mut report).await;
        }

        report.finish()
    }

    async fn keep_cloud(&self, account: &str, mut report: MergeReport) -> MergeReport {
        let documents = match self.ctx.remote.list_all(account).await {
            Ok(documents) => documents,
            Err(error) => return report.aborted(MergeAction::ListRemote, account, error),
        };
        let unsynced = match self.unsynced_locals() {
            Ok(records) => records,
            Err(error) => return report.aborted(MergeAction::DeleteLocal, "local habits", error),
        };

        for record in unsynced {
            match self.ctx.local.hard_delete(record.local_id) {
                Ok(_) => report.deleted_local += 1,
                Err(error) => report.fail(MergeAction::DeleteLocal, &record.name, error),
            }
        }

        let stamp = now_millis();
        for document in &documents {
            self.import(document, stamp, &mut report);
        }

        report.finish()
    }

    async fn merge_both(&self, account: &str, mut report: MergeReport) -> MergeReport {
        let unsynced = match self.unsynced_locals() {
            Ok(records) => records,
            Err(error) => return report.aborted(MergeAction::Upload, "local habits", error),
        };

        let documents = match self.ctx.remote.list_all(account).await {
            Ok(documents) => documents,
            Err(error) => {
                report.fail(MergeAction::ListRemote, account, error);
                for record in &unsynced {
                    self.upload(account, record, &mut report).await;
                }
                return report.finish();
            }
        };

        // Documents already linked to a local record are not candidates
        let linked: HashSet<RemoteKey> = match self.ctx.local.get_all() {
            Ok(records) => records.into_iter().filter_map(|r| r.remote_key).collect(),
            Err(error) => return report.aborted(MergeAction::Import, "local habits", error),
        };
        let candidates: Vec<&RemoteDocument> = documents
            .iter()
            .filter(|document| !linked.contains(&document.key))
            .collect();
        let mut consumed: HashSet<&RemoteKey> = HashSet::new();

        for record in &unsynced {
            let name_key = record.name_key();
            let matched = candidates.iter().copied().find(|document| {
                !consumed.contains(&document.key) && document.fields.name_key() == name_key
            });

            let Some(document) = matched else {
                self.upload(account, record, &mut report).await;
                continue;
            };
            consumed.insert(&document.key);

            if record.last_synced_at >= document.fields.last_synced_at {
                let linked = Record {
                    remote_key: Some(document.key.clone()),
                    ..record.clone()
                };
                self.upload(account, &linked, &mut report).await;
            } else {
                let merged = Record::from_remote(document, record.local_id, now_millis());
                match self
                    .ctx
                    .local
                    .overwrite_if_older(&merged, document.fields.last_synced_at)
                {
                    Ok(true) => report.overwritten += 1,
                    Ok(false) => {
                        tracing::debug!("Record {} changed during merge; keeping it", record.local_id);
                    }
                    Err(error) => report.fail(MergeAction::Import, &record.name, error),
                }
            }
        }

        let stamp = now_millis();
        for document in candidates
            .into_iter()
            .filter(|document| !consumed.contains(&document.key))
        {
            self.import(document, stamp, &mut report);
        }

        report.finish()
    }

    /// Write `record` remotely; on failure, queue it so a later sync uploads it
    async fn upload(&self, account: &str, record: &Record, report: &mut MergeReport) {
        match self.ctx.push_record(account, record).await {
            Ok(_) => report.uploaded += 1,
            Err(error) => {
                report.fail(MergeAction::Upload, &record.name, &error);
                if matches!(error, Error::Remote(_)) {
                    let operation = if record.is_synced() {
                        OperationType::Update
                    } else {
                        OperationType::Insert
                    };
                    if let Err(error) = self.queue.enqueue(operation, record) {
                        tracing::error!("Failed to queue record {}: {error}", record.local_id);
                    }
                }
            }
        }
    }

    /// Insert `document` locally, or overwrite the record already holding its key
    fn import(&self, document: &RemoteDocument, stamp: i64, report: &mut MergeReport) {
        let result = match self.ctx.local.find_by_remote_key(&document.key) {
            Ok(Some(existing)) => self
                .ctx
                .local
                .update(&Record::from_remote(document, existing.local_id, stamp)),
            Ok(None) => self
                .ctx
                .local
                .insert(&Record::from_remote(document, LocalId::UNASSIGNED, stamp))
                .map(|_| ()),
            Err(error) => Err(error),
        };

        match result {
            Ok(()) => report.imported += 1,
            Err(error) => report.fail(MergeAction::Import, &document.fields.name, error),
        }
    }
}

/// What happened during [`complete_sign_in`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignInOutcome {
    pub check: MergeCheck,
    /// `None` when no merge was needed or the user cancelled
    pub merge: Option<MergeReport>,
    pub sync: SyncOutcome,
}

/// Switch `identity` to `account`, resolve conflicts, then run a normal sync
///
/// `choose` is asked for a strategy only when a merge is needed; returning
/// `None` cancels the merge but keeps the sign-in, leaving unsynced records
/// local-only until a later upload. If the merge check fails, the identity is
/// returned to whatever account it held before the call.
pub async fn complete_sign_in<F>(
    identity: &SessionIdentity,
    resolver: &ConflictResolver,
    coordinator: &SyncCoordinator,
    account: &str,
    choose: F,
) -> Result<SignInOutcome>
where
    F: FnOnce(&MergeCheck) -> Option<MergeStrategy>,
{
    let account = account.trim();
    if account.is_empty() {
        return Err(Error::InvalidInput("account id must not be empty".to_string()));
    }

    let previous = identity.account();
    identity.sign_in(account);
    let check = match resolver.check_merge_needed(account).await {
        Ok(check) => check,
        Err(error) => {
            // Nothing was merged or synced; put the old session back
            match previous {
                Some(previous) => identity.sign_in(previous),
                None => identity.sign_out(),
            }
            return Err(error);
        }
    };

    let merge = if check.needed {
        match choose(&check) {
            Some(strategy) => Some(resolver.execute_merge(account, strategy).await),
            None => {
                tracing::info!("Merge cancelled; continuing without merge");
                None
            }
        }
    } else {
        None
    };

    let sync = coordinator.sync_now().await;
    Ok(SignInOutcome { check, merge, sync })
}
