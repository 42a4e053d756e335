//! In-memory remote store
//!
//! Backs tests and offline demos. Supports fault injection: an availability
//! switch, per-name write rejection, artificial latency, and call counting.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{RemoteError, RemoteResult, RemoteStore};
use crate::models::{RecordFields, RemoteDocument, RemoteKey};

/// Number of calls made per remote operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteCalls {
    pub list_all: u64,
    pub get: u64,
    pub create: u64,
    pub set: u64,
    pub delete: u64,
}

impl RemoteCalls {
    /// Calls that write or remove documents
    pub const fn writes(&self) -> u64 {
        self.create + self.set + self.delete
    }
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, BTreeMap<RemoteKey, RecordFields>>,
    rejected_names: HashSet<String>,
    calls: RemoteCalls,
    latency: Duration,
}

/// Remote store keeping every account's documents in process memory
#[derive(Clone)]
pub struct InMemoryRemoteStore {
    state: Arc<Mutex<State>>,
    available: Arc<AtomicBool>,
    next_key: Arc<AtomicU64>,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            available: Arc::new(AtomicBool::new(true)),
            next_key: Arc::new(AtomicU64::new(1)),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicked test thread must not hide the documents from the others
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make every subsequent call fail as unavailable (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Reject writes of documents with this exact name
    pub fn reject_writes_named(&self, name: impl Into<String>) {
        self.state().rejected_names.insert(name.into());
    }

    pub fn accept_all_writes(&self) {
        self.state().rejected_names.clear();
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    pub fn calls(&self) -> RemoteCalls {
        self.state().calls
    }

    /// Documents currently stored for `account`, ordered by key
    pub fn documents(&self, account: &str) -> Vec<RemoteDocument> {
        self.state()
            .accounts
            .get(account)
            .map(|docs| {
                docs.iter()
                    .map(|(key, fields)| RemoteDocument {
                        key: key.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn document(&self, account: &str, key: &RemoteKey) -> Option<RecordFields> {
        self.state()
            .accounts
            .get(account)
            .and_then(|docs| docs.get(key).cloned())
    }

    /// Store a document directly, bypassing availability and call counting
    pub fn seed(&self, account: &str, fields: RecordFields) -> RemoteKey {
        let key = self.allocate_key();
        self.state()
            .accounts
            .entry(account.to_string())
            .or_default()
            .insert(key.clone(), fields);
        key
    }

    fn allocate_key(&self) -> RemoteKey {
        let n = self.next_key.fetch_add(1, Ordering::SeqCst);
        RemoteKey::new(format!("doc-{n:06}"))
    }

    async fn enter(&self, count: impl FnOnce(&mut RemoteCalls)) -> RemoteResult<()> {
        let latency = {
            let mut state = self.state();
            count(&mut state.calls);
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.is_available() {
            Ok(())
        } else {
            Err(RemoteError::Unavailable("in-memory remote is offline".to_string()))
        }
    }

    fn check_write(&self, fields: &RecordFields) -> RemoteResult<()> {
        if self.state().rejected_names.contains(&fields.name) {
            return Err(RemoteError::Rejected {
                status: 400,
                message: format!("document '{}' rejected", fields.name),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn list_all(&self, account: &str) -> RemoteResult<Vec<RemoteDocument>> {
        self.enter(|calls| calls.list_all += 1).await?;
        Ok(self.documents(account))
    }

    async fn get(&self, account: &str, key: &RemoteKey) -> RemoteResult<Option<RemoteDocument>> {
        self.enter(|calls| calls.get += 1).await?;
        Ok(self.document(account, key).map(|fields| RemoteDocument {
            key: key.clone(),
            fields,
        }))
    }

    async fn create(&self, account: &str, fields: &RecordFields) -> RemoteResult<RemoteKey> {
        self.enter(|calls| calls.create += 1).await?;
        self.check_write(fields)?;
        let key = self.allocate_key();
        self.state()
            .accounts
            .entry(account.to_string())
            .or_default()
            .insert(key.clone(), fields.clone());
        Ok(key)
    }

    async fn set(&self, account: &str, key: &RemoteKey, fields: &RecordFields) -> RemoteResult<()> {
        self.enter(|calls| calls.set += 1).await?;
        self.check_write(fields)?;
        self.state()
            .accounts
            .entry(account.to_string())
            .or_default()
            .insert(key.clone(), fields.clone());
        Ok(())
    }

    async fn delete(&self, account: &str, key: &RemoteKey) -> RemoteResult<()> {
        self.enter(|calls| calls.delete += 1).await?;
        if let Some(docs) = self.state().accounts.get_mut(account) {
            docs.remove(key);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
