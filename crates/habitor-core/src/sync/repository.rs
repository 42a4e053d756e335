//! Dual-write record repository
//!
//! Every mutation is written locally first and returned to the caller. The
//! remote half runs on a single background writer task, so remote writes for
//! the same record happen in the order the caller made them. When the device
//! is offline, or a remote write fails, the operation is queued instead.

use tokio::sync::{mpsc, oneshot};

use super::{SyncContext, SyncQueue};
use crate::error::{Error, Result};
use crate::models::{LocalId, OperationType, Record};

enum WriteJob {
    /// Upload the current local state of a record
    Push {
        account: String,
        operation: OperationType,
        local_id: LocalId,
    },
    /// Remove a record's remote document
    Remove { account: String, snapshot: Record },
    Flush(oneshot::Sender<()>),
}

pub struct RecordRepository {
    ctx: SyncContext,
    queue: SyncQueue,
    writer: mpsc::UnboundedSender<WriteJob>,
}

impl RecordRepository {
    /// Create the repository and start its background writer
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(ctx: SyncContext) -> Self {
        let queue = SyncQueue::new(ctx.local.clone());
        let (writer, jobs) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(ctx.clone(), queue.clone(), jobs));
        Self { ctx, queue, writer }
    }

    pub fn get(&self, local_id: LocalId) -> Result<Option<Record>> {
        self.ctx.local.get_by_id(local_id)
    }

    /// Records not in the trash
    pub fn list_active(&self) -> Result<Vec<Record>> {
        Ok(self
            .ctx
            .local
            .get_all()?
            .into_iter()
            .filter(|record| !record.deleted)
            .collect())
    }

    /// Soft-deleted records
    pub fn list_trash(&self) -> Result<Vec<Record>> {
        Ok(self
            .ctx
            .local
            .get_all()?
            .into_iter()
            .filter(|record| record.deleted)
            .collect())
    }

    /// Store a new record and schedule its upload
    ///
    /// Sync metadata on the input is ignored; a new record is never synced.
    pub fn insert(&self, record: Record) -> Result<LocalId> {
        let record = Record {
            local_id: LocalId::UNASSIGNED,
            remote_key: None,
            last_synced_at: 0,
            deleted: false,
            ..record
        };
        validate(&record)?;

        let inserted = self.ctx.local.insert(&record)?;
        tracing::debug!("Inserted record {} locally", inserted.local_id);
        self.dispatch_push(OperationType::Insert, &inserted)?;
        Ok(inserted.local_id)
    }

    /// Replace a record's content and schedule the remote update
    ///
    /// Only `name` and `details` are taken from the input. The key, sync
    /// stamp and trash flag are never written here; the background writer
    /// may be stamping the same row concurrently.
    pub fn update(&self, record: &Record) -> Result<()> {
        validate(record)?;
        let updated = self
            .ctx
            .local
            .update_content(record.local_id, &record.name, &record.details)?;
        self.dispatch_push(OperationType::Update, &updated)
    }

    /// Move a record to the trash and remove its remote document
    pub fn delete(&self, local_id: LocalId) -> Result<()> {
        let record = self.ctx.local.soft_delete(local_id)?;
        tracing::debug!("Moved record {local_id} to trash");
        self.dispatch_remove(record)
    }

    /// Take a record out of the trash and write it back remotely
    pub fn restore(&self, local_id: LocalId) -> Result<()> {
        let record = self.ctx.local.restore(local_id)?;
        tracing::debug!("Restored record {local_id}");
        self.dispatch_push(OperationType::Update, &record)
    }

    /// Delete a record everywhere, bypassing the trash
    pub fn purge(&self, local_id: LocalId) -> Result<()> {
        let record = self
            .ctx
            .local
            .get_by_id(local_id)?
            .ok_or_else(|| Error::NotFound(local_id.to_string()))?;
        self.ctx.local.hard_delete(local_id)?;
        tracing::debug!("Purged record {local_id}");
        self.dispatch_remove(record)
    }

    /// Wait until every remote write dispatched so far has finished
    pub async fn wait_for_remote_writes(&self) {
        let (done, finished) = oneshot::channel();
        if self.writer.send(WriteJob::Flush(done)).is_ok() {
            let _ = finished.await;
        }
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.queue.pending_count()
    }

    fn dispatch_push(&self, operation: OperationType, record: &Record) -> Result<()> {
        if !self.ctx.sync_enabled() {
            return Ok(());
        }
        if !self.ctx.connectivity.is_online() {
            self.queue.enqueue(operation, record)?;
            return Ok(());
        }

        let job = WriteJob::Push {
            account: self.ctx.identity.current_id(),
            operation,
            local_id: record.local_id,
        };
        if self.writer.send(job).is_err() {
            tracing::warn!("Remote writer stopped; queueing {operation} for record {}", record.local_id);
            self.queue.enqueue(operation, record)?;
        }
        Ok(())
    }

    fn dispatch_remove(&self, snapshot: Record) -> Result<()> {
        if !self.ctx.sync_enabled() {
            return Ok(());
        }
        if !self.ctx.connectivity.is_online() {
            self.queue.enqueue(OperationType::Delete, &snapshot)?;
            return Ok(());
        }

        let job = WriteJob::Remove {
            account: self.ctx.identity.current_id(),
            snapshot,
        };
        if let Err(mpsc::error::SendError(job)) = self.writer.send(job) {
            tracing::warn!("Remote writer stopped; queueing DELETE");
            if let WriteJob::Remove { snapshot, .. } = job {
                self.queue.enqueue(OperationType::Delete, &snapshot)?;
            }
        }
        Ok(())
    }
}

fn validate(record: &Record) -> Result<()> {
    if record.name.trim().is_empty() {
        return Err(Error::InvalidInput("habit name must not be empty".to_string()));
    }
    Ok(())
}

async fn run_writer(ctx: SyncContext, queue: SyncQueue, mut jobs: mpsc::UnboundedReceiver<WriteJob>) {
    while let Some(job) = jobs.recv().await {
        match job {
            WriteJob::Push {
                account,
                operation,
                local_id,
            } => push(&ctx, &queue, &account, operation, local_id).await,
            WriteJob::Remove { account, snapshot } => remove(&ctx, &queue, &account, snapshot).await,
            WriteJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Remote writer stopped");
}

async fn push(
    ctx: &SyncContext,
    queue: &SyncQueue,
    account: &str,
    operation: OperationType,
    local_id: LocalId,
) {
    let record = match ctx.local.get_by_id(local_id) {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::debug!("Record {local_id} is gone; skipping remote {operation}");
            return;
        }
        Err(error) => {
            tracing::error!("Failed to read record {local_id} for remote {operation}: {error}");
            return;
        }
    };

    match ctx.push_record(account, &record).await {
        Ok(_) => {}
        Err(Error::Remote(error)) => {
            log_remote_failure(operation, local_id, &error);
            if let Err(error) = queue.enqueue(operation, &record) {
                tracing::error!("Failed to queue {operation} for record {local_id}: {error}");
            }
        }
        Err(error) => {
            tracing::error!("Remote {operation} for record {local_id} could not be recorded: {error}");
        }
    }
}

async fn remove(ctx: &SyncContext, queue: &SyncQueue, account: &str, snapshot: Record) {
    let local_id = snapshot.local_id;
    // An earlier push may have assigned a key after the snapshot was taken
    let key = match ctx.local.get_by_id(local_id) {
        Ok(current) => current.and_then(|record| record.remote_key),
        Err(error) => {
            tracing::error!("Failed to read record {local_id} for remote DELETE: {error}");
            None
        }
    }
    .or_else(|| snapshot.remote_key.clone());

    let Some(key) = key else {
        // Never uploaded. A queued INSERT may still create the document, in
        // which case the delete has to wait behind it.
        let upload_pending = queue.entries().is_ok_and(|entries| {
            entries
                .iter()
                .any(|entry| entry.local_id == local_id && entry.operation != OperationType::Delete)
        });
        if upload_pending {
            if let Err(error) = queue.enqueue(OperationType::Delete, &snapshot) {
                tracing::error!("Failed to queue DELETE for record {local_id}: {error}");
            }
        }
        return;
    };

    if let Err(error) = ctx.remote.delete(account, &key).await {
        log_remote_failure(OperationType::Delete, local_id, &error);
        if let Err(error) = queue.enqueue(OperationType::Delete, &snapshot) {
            tracing::error!("Failed to queue DELETE for record {local_id}: {error}");
        }
    }
}

fn log_remote_failure(operation: OperationType, local_id: LocalId, error: &crate::remote::RemoteError) {
    if error.transience().is_retryable() {
        tracing::warn!("Remote {operation} for record {local_id} failed, queued for retry: {error}");
    } else {
        tracing::warn!("Remote rejected {operation} for record {local_id}, queued anyway: {error}");
    }
}
