//! Durable queue of deferred remote writes

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;

use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{NewQueueEntry, OperationType, QueueEntry, Record};

/// Counts from one pass over the queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub processed: usize,
    pub failed: usize,
    pub first_error: Option<String>,
}

#[derive(Clone)]
pub struct SyncQueue {
    local: Arc<dyn LocalStore>,
}

impl SyncQueue {
    pub fn new(local: Arc<dyn LocalStore>) -> Self {
        Self { local }
    }

    /// Persist a deferred write; never touches the network
    pub fn enqueue(&self, operation: OperationType, record: &Record) -> Result<QueueEntry> {
        let entry = self
            .local
            .enqueue(&NewQueueEntry::new(operation, record))?;
        tracing::debug!(
            "Queued {operation} for record {} (entry {})",
            record.local_id,
            entry.id
        );
        Ok(entry)
    }

    /// Run `processor` over every pending entry in `(created_at, id)` order
    ///
    /// Successful entries are removed. A failed entry stays queued and the
    /// pass continues with the next one, so a stuck entry never blocks the
    /// rest. Entries enqueued while the pass runs wait for the next pass.
    pub async fn drain<F, Fut>(&self, mut processor: F) -> Result<DrainReport>
    where
        F: FnMut(QueueEntry) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let entries = self.local.list_queue()?;
        let mut report = DrainReport::default();

        for entry in entries {
            let id = entry.id;
            let operation = entry.operation;
            let local_id = entry.local_id;

            match processor(entry).await {
                Ok(()) => {
                    self.local.dequeue(id)?;
                    report.processed += 1;
                }
                Err(error) => {
                    match &error {
                        Error::Remote(remote) if !remote.transience().is_retryable() => {
                            tracing::warn!(
                                "Remote rejected queued {operation} for record {local_id} (entry {id}): {remote}"
                            );
                        }
                        _ => {
                            tracing::debug!(
                                "Queued {operation} for record {local_id} (entry {id}) still pending: {error}"
                            );
                        }
                    }
                    report.failed += 1;
                    report.first_error.get_or_insert_with(|| error.to_string());
                }
            }
        }

        Ok(report)
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.local.queue_len()
    }

    pub fn entries(&self) -> Result<Vec<QueueEntry>> {
        self.local.list_queue()
    }

    /// Drop every pending entry
    pub fn clear(&self) -> Result<usize> {
        let removed = self.local.clear_queue()?;
        tracing::warn!("Cleared sync queue, discarded {removed} pending operations");
        Ok(removed)
    }
}
