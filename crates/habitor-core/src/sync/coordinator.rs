//! Background reconciliation: queue replay, then a full pull
//!
//! A session runs `Idle -> DrainingQueue -> Pulling -> Idle`. Only one
//! session runs at a time. A trigger that arrives while a session is running
//! does not start a second one; it asks the running session for exactly one
//! follow-up pass. A trigger that finds the gate held by a merge or a force
//! upload waits for it and then runs a full session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::{SessionGate, SyncContext, SyncOutcome, SyncPhase, SyncQueue};
use crate::error::{Error, Result};
use crate::models::{LocalId, OperationType, QueueEntry, Record};
use crate::util::now_millis;

#[derive(Debug, Default)]
struct PullReport {
    imported: usize,
    overwritten: usize,
    kept: usize,
    failed: usize,
}

pub struct SyncCoordinator {
    ctx: SyncContext,
    queue: SyncQueue,
    gate: SessionGate,
    /// Set while this coordinator's own session holds the gate
    session_active: AtomicBool,
    rerun: AtomicBool,
    phase: watch::Sender<SyncPhase>,
}

impl SyncCoordinator {
    pub fn new(ctx: SyncContext) -> Self {
        Self::with_gate(ctx, SessionGate::new())
    }

    /// Share `gate` with other components that must not overlap a session
    pub fn with_gate(ctx: SyncContext, gate: SessionGate) -> Self {
        let queue = SyncQueue::new(ctx.local.clone());
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            ctx,
            queue,
            gate,
            session_active: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            phase,
        }
    }

    pub fn gate(&self) -> SessionGate {
        self.gate.clone()
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub fn phase_updates(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.queue.pending_count()
    }

    /// Discard every queued operation
    pub fn clear_queue(&self) -> Result<usize> {
        self.queue.clear()
    }

    /// Session-start trigger
    pub async fn start(&self) -> SyncOutcome {
        tracing::info!("Starting sync session");
        self.sync_now().await
    }

    /// Replay the queue and pull remote changes
    ///
    /// Returns "Sync not required" without touching anything when offline or
    /// signed out.
    pub async fn sync_now(&self) -> SyncOutcome {
        if !self.ctx.connectivity.is_online() || !self.ctx.sync_enabled() {
            tracing::debug!("Sync not required (offline or signed out)");
            return SyncOutcome::not_required();
        }

        loop {
            let guard = match self.gate.try_lock() {
                Ok(guard) => guard,
                Err(_) if self.session_active.load(Ordering::SeqCst) => {
                    self.rerun.store(true, Ordering::SeqCst);
                    // The session may have finished before seeing the flag
                    if self.session_active.load(Ordering::SeqCst) {
                        tracing::debug!("Sync already running; coalescing trigger");
                        return SyncOutcome::coalesced();
                    }
                    continue;
                }
                Err(_) => {
                    tracing::debug!("Merge or force upload in progress; waiting to sync");
                    self.gate.lock().await
                }
            };
            self.session_active.store(true, Ordering::SeqCst);
            self.rerun.store(false, Ordering::SeqCst);

            let outcome = self.run_session().await;
            self.session_active.store(false, Ordering::SeqCst);
            drop(guard);

            if !self.rerun.swap(false, Ordering::SeqCst) {
                return outcome;
            }
            tracing::debug!("Running coalesced follow-up sync");
        }
    }

    /// Drive `sync_now` on every offline to online transition
    ///
    /// Each outcome is sent on `events` when given. The task stops when the
    /// receiver is dropped; otherwise abort the returned handle.
    pub fn spawn_reconnect_listener(
        self: &Arc<Self>,
        events: Option<mpsc::Sender<SyncOutcome>>,
    ) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let mut transitions = self.ctx.connectivity.transitions();

        tokio::spawn(async move {
            while transitions.next().await.is_some() {
                tracing::info!("Back online; syncing");
                let outcome = coordinator.sync_now().await;
                if let Some(events) = &events {
                    if events.send(outcome).await.is_err() {
                        break;
                    }
                }
            }
        })
    }

    /// Upload every active record regardless of its sync state
    ///
    /// Recovery path for a remote that lost data. Failures are queued.
    pub async fn force_upload_all(&self) -> SyncOutcome {
        if !self.ctx.connectivity.is_online() || !self.ctx.sync_enabled() {
            return SyncOutcome::not_required();
        }

        let _guard = self.gate.lock().await;
        let account = self.ctx.identity.current_id();
        let records = match self.ctx.local.get_all() {
            Ok(records) => records,
            Err(error) => return SyncOutcome::failed(format!("Failed to read local records: {error}")),
        };

        let mut uploaded = 0;
        let mut queued = 0;
        for record in records.into_iter().filter(|record| !record.deleted) {
            match self.ctx.push_record(&account, &record).await {
                Ok(_) => uploaded += 1,
                Err(error) => {
                    tracing::warn!("Force upload of record {} failed: {error}", record.local_id);
                    let operation = if record.is_synced() {
                        OperationType::Update
                    } else {
                        OperationType::Insert
                    };
                    if let Err(error) = self.queue.enqueue(operation, &record) {
                        tracing::error!("Failed to queue record {}: {error}", record.local_id);
                    }
                    queued += 1;
                }
            }
        }

        tracing::info!("Force upload finished: {uploaded} uploaded, {queued} queued");
        SyncOutcome {
            success: queued == 0,
            message: format!("Uploaded {uploaded} habits, {queued} queued for retry"),
            drained: uploaded,
            pending: self.queue.pending_count().unwrap_or_default(),
            ..SyncOutcome::default()
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.phase.send_replace(phase);
    }

    async fn run_session(&self) -> SyncOutcome {
        let account = self.ctx.identity.current_id();

        self.set_phase(SyncPhase::DrainingQueue);
        let this = self;
        let account_ref = account.as_str();
        let drain = self
            .queue
            .drain(move |entry| this.replay(account_ref, entry))
            .await;

        self.set_phase(SyncPhase::Pulling);
        let pull = self.pull(&account).await;
        self.set_phase(SyncPhase::Idle);

        let pending = self.queue.pending_count().unwrap_or_default();
        match (drain, pull) {
            (Ok(drain), Ok(pull)) => {
                let success = drain.failed == 0 && pull.failed == 0;
                let message = format!(
                    "Sync complete: {} uploaded, {pending} pending, {} imported, {} updated",
                    drain.processed, pull.imported, pull.overwritten
                );
                tracing::info!(
                    "{message} ({} kept local, {} failed)",
                    pull.kept,
                    drain.failed + pull.failed
                );
                SyncOutcome {
                    success,
                    message,
                    drained: drain.processed,
                    pending,
                    imported: pull.imported,
                    overwritten: pull.overwritten,
                }
            }
            (Ok(drain), Err(error)) => {
                tracing::warn!("Pull failed: {error}");
                SyncOutcome {
                    drained: drain.processed,
                    pending,
                    ..SyncOutcome::failed(format!("Failed to fetch remote habits: {error}"))
                }
            }
            (Err(error), _) => {
                tracing::error!("Queue replay failed: {error}");
                SyncOutcome {
                    pending,
                    ..SyncOutcome::failed(format!("Failed to replay queued changes: {error}"))
                }
            }
        }
    }

    /// Apply one queued operation to the remote store
    async fn replay(&self, account: &str, entry: QueueEntry) -> Result<()> {
        let local_id = entry.local_id;
        match entry.operation {
            OperationType::Insert | OperationType::Update => {
                let Some(current) = self.ctx.local.get_by_id(local_id)? else {
                    tracing::debug!("Record {local_id} is gone; dropping queued {}", entry.operation);
                    return Ok(());
                };
                self.ctx.push_record(account, &current).await?;
            }
            OperationType::Delete => {
                let key = self
                    .ctx
                    .local
                    .get_by_id(local_id)?
                    .and_then(|record| record.remote_key)
                    .or_else(|| entry.snapshot.remote_key.clone());
                let Some(key) = key else {
                    tracing::debug!("Record {local_id} was never uploaded; nothing to delete");
                    return Ok(());
                };
                self.ctx.remote.delete(account, &key).await?;
            }
        }
        Ok(())
    }

    /// Last-writer-wins import of every remote document
    async fn pull(&self, account: &str) -> Result<PullReport> {
        let documents = self.ctx.remote.list_all(account).await.map_err(Error::from)?;
        let stamp = now_millis();
        let mut report = PullReport::default();

        for document in documents {
            let applied = match self.ctx.local.find_by_remote_key(&document.key) {
                Ok(None) => self
                    .ctx
                    .local
                    .insert(&Record::from_remote(&document, LocalId::UNASSIGNED, stamp))
                    .map(|_| report.imported += 1),
                // Re-checked in the write itself; a push may stamp the row in between
                Ok(Some(existing)) if document.fields.last_synced_at > existing.last_synced_at => self
                    .ctx
                    .local
                    .overwrite_if_older(
                        &Record::from_remote(&document, existing.local_id, stamp),
                        document.fields.last_synced_at,
                    )
                    .map(|overwritten| {
                        if overwritten {
                            report.overwritten += 1;
                        } else {
                            report.kept += 1;
                        }
                    }),
                Ok(Some(_)) => {
                    report.kept += 1;
                    Ok(())
                }
                Err(error) => Err(error),
            };

            if let Err(error) = applied {
                tracing::error!("Failed to apply remote document {}: {error}", document.key);
                report.failed += 1;
            }
        }

        Ok(report)
    }
}
