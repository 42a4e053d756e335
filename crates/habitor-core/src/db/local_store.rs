//! Local record store shared by the sync components

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use super::repository::SqliteHabitRepository;
use super::settings_repository::{SqliteSettingsRepository, ACCOUNT_ID_KEY};
use super::Database;
use crate::error::{Error, Result};
use crate::models::{HabitDetails, LocalId, NewQueueEntry, QueueEntry, Record, RemoteKey};

/// Durable local storage for records and the sync queue
///
/// Calls are synchronous and short. Implementations must be safe to share
/// between the caller and background sync tasks.
pub trait LocalStore: Send + Sync {
    /// Every record, tombstones included
    fn get_all(&self) -> Result<Vec<Record>>;

    fn get_by_id(&self, local_id: LocalId) -> Result<Option<Record>>;

    fn find_by_remote_key(&self, key: &RemoteKey) -> Result<Option<Record>>;

    /// Insert a record, returning it with its assigned `local_id`
    fn insert(&self, record: &Record) -> Result<Record>;

    /// Overwrite an existing record, sync metadata included
    ///
    /// Only for paths that own the whole row, such as clearing keys before a
    /// re-upload. Edits go through [`LocalStore::update_content`].
    fn update(&self, record: &Record) -> Result<()>;

    /// Replace name and details, leaving the key and sync stamp as stored
    fn update_content(
        &self,
        local_id: LocalId,
        name: &str,
        details: &HabitDetails,
    ) -> Result<Record>;

    /// Apply remote content only while the stored stamp is older than `remote_stamp`
    fn overwrite_if_older(&self, record: &Record, remote_stamp: i64) -> Result<bool>;

    /// Store the key and timestamp of a successful remote write
    fn mark_synced(&self, local_id: LocalId, key: &RemoteKey, synced_at: i64) -> Result<()>;

    fn soft_delete(&self, local_id: LocalId) -> Result<Record>;

    fn restore(&self, local_id: LocalId) -> Result<Record>;

    /// Remove a record entirely; returns whether it existed
    fn hard_delete(&self, local_id: LocalId) -> Result<bool>;

    fn enqueue(&self, entry: &NewQueueEntry) -> Result<QueueEntry>;

    fn dequeue(&self, id: i64) -> Result<bool>;

    /// Pending entries ordered by `(created_at, id)`
    fn list_queue(&self) -> Result<Vec<QueueEntry>>;

    fn clear_queue(&self) -> Result<usize>;

    fn queue_len(&self) -> Result<usize>;
}

/// `SQLite` backed [`LocalStore`]
///
/// The connection sits behind a mutex so the store can be shared through an
/// `Arc` with the background writer.
pub struct SqliteLocalStore {
    conn: Mutex<Connection>,
}

impl SqliteLocalStore {
    pub fn new(database: Database) -> Self {
        Self {
            conn: Mutex::new(database.into_connection()),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("local store lock poisoned".to_string()))
    }

    fn habits<T>(&self, f: impl FnOnce(&SqliteHabitRepository<'_>) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&SqliteHabitRepository::new(&conn))
    }

    fn settings<T>(&self, f: impl FnOnce(&SqliteSettingsRepository<'_>) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&SqliteSettingsRepository::new(&conn))
    }

    /// Persisted device id, created on first use
    pub fn device_id(&self) -> Result<String> {
        self.settings(|repo| repo.load_or_create_device_id())
    }

    /// Account remembered from the last sign-in
    pub fn stored_account(&self) -> Result<Option<String>> {
        self.settings(|repo| repo.get(ACCOUNT_ID_KEY))
    }

    pub fn set_stored_account(&self, account: Option<&str>) -> Result<()> {
        self.settings(|repo| match account {
            Some(account) => repo.set(ACCOUNT_ID_KEY, account),
            None => repo.remove(ACCOUNT_ID_KEY),
        })
    }
}

impl LocalStore for SqliteLocalStore {
    fn get_all(&self) -> Result<Vec<Record>> {
        self.habits(|repo| repo.get_all())
    }

    fn get_by_id(&self, local_id: LocalId) -> Result<Option<Record>> {
        self.habits(|repo| repo.get_by_id(local_id))
    }

    fn find_by_remote_key(&self, key: &RemoteKey) -> Result<Option<Record>> {
        self.habits(|repo| repo.find_by_remote_key(key))
    }

    fn insert(&self, record: &Record) -> Result<Record> {
        self.habits(|repo| repo.insert(record))
    }

    fn update(&self, record: &Record) -> Result<()> {
        self.habits(|repo| repo.update(record))
    }

    fn update_content(
        &self,
        local_id: LocalId,
        name: &str,
        details: &HabitDetails,
    ) -> Result<Record> {
        self.habits(|repo| repo.update_content(local_id, name, details))
    }

    fn overwrite_if_older(&self, record: &Record, remote_stamp: i64) -> Result<bool> {
        self.habits(|repo| repo.overwrite_if_older(record, remote_stamp))
    }

    fn mark_synced(&self, local_id: LocalId, key: &RemoteKey, synced_at: i64) -> Result<()> {
        self.habits(|repo| repo.mark_synced(local_id, key, synced_at))
    }

    fn soft_delete(&self, local_id: LocalId) -> Result<Record> {
        self.habits(|repo| repo.soft_delete(local_id))
    }

    fn restore(&self, local_id: LocalId) -> Result<Record> {
        self.habits(|repo| repo.restore(local_id))
    }

    fn hard_delete(&self, local_id: LocalId) -> Result<bool> {
        self.habits(|repo| repo.hard_delete(local_id))
    }

    fn enqueue(&self, entry: &NewQueueEntry) -> Result<QueueEntry> {
        self.habits(|repo| repo.enqueue(entry))
    }

    fn dequeue(&self, id: i64) -> Result<bool> {
        self.habits(|repo| repo.dequeue(id))
    }

    fn list_queue(&self) -> Result<Vec<QueueEntry>> {
        self.habits(|repo| repo.list_queue())
    }

    fn clear_queue(&self) -> Result<usize> {
        self.habits(|repo| repo.clear_queue())
    }

    fn queue_len(&self) -> Result<usize> {
        self.habits(|repo| repo.queue_len())
    }
}
