//! Habit and sync queue tables

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{HabitDetails, LocalId, NewQueueEntry, QueueEntry, Record, RemoteKey};
use crate::util::now_millis;

const RECORD_COLUMNS: &str = "local_id, remote_key, last_synced_at, name, is_deleted, details";

/// `SQLite` access to the `habits` and `sync_queue` tables
pub struct SqliteHabitRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteHabitRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        let remote_key: Option<String> = row.get(1)?;
        let details: String = row.get(5)?;
        Ok(Record {
            local_id: LocalId::new(row.get(0)?),
            remote_key: remote_key.map(RemoteKey::from),
            last_synced_at: row.get(2)?,
            name: row.get(3)?,
            deleted: row.get::<_, i32>(4)? != 0,
            details: serde_json::from_str(&details)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
        })
    }

    /// Parse a queue entry from a database row
    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueEntry> {
        let operation: String = row.get(1)?;
        let snapshot: String = row.get(3)?;
        Ok(QueueEntry {
            id: row.get(0)?,
            operation: operation
                .parse()
                .map_err(|e: Error| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?,
            local_id: LocalId::new(row.get(2)?),
            snapshot: serde_json::from_str(&snapshot)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?,
            created_at: row.get(4)?,
        })
    }

    /// All records, tombstones included, oldest first
    pub fn get_all(&self) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM habits ORDER BY local_id ASC"
        ))?;

        let records = stmt
            .query_map([], Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    pub fn get_by_id(&self, local_id: LocalId) -> Result<Option<Record>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM habits WHERE local_id = ?"),
                params![local_id.get()],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn find_by_remote_key(&self, key: &RemoteKey) -> Result<Option<Record>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM habits WHERE remote_key = ?"),
                params![key.as_str()],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Insert a record and return it with its assigned `local_id`
    ///
    /// The incoming `local_id` is ignored. Remote key and sync stamp are kept so
    /// imported documents land already linked.
    pub fn insert(&self, record: &Record) -> Result<Record> {
        let now = now_millis();
        self.conn.execute(
            "INSERT INTO habits (remote_key, last_synced_at, name, is_deleted, details, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                record.remote_key.as_ref().map(RemoteKey::as_str),
                record.last_synced_at,
                record.name,
                i32::from(record.deleted),
                serde_json::to_string(&record.details)?,
                now,
                now
            ],
        )?;

        let mut inserted = record.clone();
        inserted.local_id = LocalId::new(self.conn.last_insert_rowid());
        Ok(inserted)
    }

    /// Overwrite every column of an existing record
    pub fn update(&self, record: &Record) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE habits
             SET remote_key = ?, last_synced_at = ?, name = ?, is_deleted = ?, details = ?, updated_at = ?
             WHERE local_id = ?",
            params![
                record.remote_key.as_ref().map(RemoteKey::as_str),
                record.last_synced_at,
                record.name,
                i32::from(record.deleted),
                serde_json::to_string(&record.details)?,
                now_millis(),
                record.local_id.get()
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(record.local_id.to_string()));
        }
        Ok(())
    }

    /// Replace name and details only; sync columns and the trash flag stay as stored
    pub fn update_content(
        &self,
        local_id: LocalId,
        name: &str,
        details: &HabitDetails,
    ) -> Result<Record> {
        let rows = self.conn.execute(
            "UPDATE habits SET name = ?, details = ?, updated_at = ? WHERE local_id = ?",
            params![name, serde_json::to_string(details)?, now_millis(), local_id.get()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(local_id.to_string()));
        }
        self.get_by_id(local_id)?
            .ok_or_else(|| Error::NotFound(local_id.to_string()))
    }

    /// Overwrite a record with remote content if its stored stamp is older than `remote_stamp`
    ///
    /// The comparison and the write happen in one statement, so a push that
    /// stamps the row first wins. Returns whether the row was overwritten.
    pub fn overwrite_if_older(&self, record: &Record, remote_stamp: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE habits
             SET remote_key = ?, last_synced_at = ?, name = ?, is_deleted = ?, details = ?, updated_at = ?
             WHERE local_id = ? AND last_synced_at < ?",
            params![
                record.remote_key.as_ref().map(RemoteKey::as_str),
                record.last_synced_at,
                record.name,
                i32::from(record.deleted),
                serde_json::to_string(&record.details)?,
                now_millis(),
                record.local_id.get(),
                remote_stamp
            ],
        )?;
        Ok(rows > 0)
    }

    /// Record a successful remote write
    pub fn mark_synced(&self, local_id: LocalId, key: &RemoteKey, synced_at: i64) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE habits SET remote_key = ?, last_synced_at = ? WHERE local_id = ?",
            params![key.as_str(), synced_at, local_id.get()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(local_id.to_string()));
        }
        Ok(())
    }

    fn set_deleted(&self, local_id: LocalId, deleted: bool) -> Result<Record> {
        let rows = self.conn.execute(
            "UPDATE habits SET is_deleted = ?, updated_at = ? WHERE local_id = ?",
            params![i32::from(deleted), now_millis(), local_id.get()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(local_id.to_string()));
        }
        self.get_by_id(local_id)?
            .ok_or_else(|| Error::NotFound(local_id.to_string()))
    }

    pub fn soft_delete(&self, local_id: LocalId) -> Result<Record> {
        self.set_deleted(local_id, true)
    }

    pub fn restore(&self, local_id: LocalId) -> Result<Record> {
        self.set_deleted(local_id, false)
    }

    /// Remove a record row; returns whether a row existed
    pub fn hard_delete(&self, local_id: LocalId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM habits WHERE local_id = ?",
            params![local_id.get()],
        )?;
        Ok(rows > 0)
    }

    pub fn enqueue(&self, entry: &NewQueueEntry) -> Result<QueueEntry> {
        self.conn.execute(
            "INSERT INTO sync_queue (operation, local_id, snapshot, created_at) VALUES (?, ?, ?, ?)",
            params![
                entry.operation.as_str(),
                entry.local_id.get(),
                serde_json::to_string(&entry.snapshot)?,
                entry.created_at
            ],
        )?;

        Ok(QueueEntry {
            id: self.conn.last_insert_rowid(),
            operation: entry.operation,
            local_id: entry.local_id,
            snapshot: entry.snapshot.clone(),
            created_at: entry.created_at,
        })
    }

    /// Remove a processed entry; returns whether it existed
    pub fn dequeue(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?", params![id])?;
        Ok(rows > 0)
    }

    /// Pending entries in processing order
    pub fn list_queue(&self) -> Result<Vec<QueueEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, operation, local_id, snapshot, created_at
             FROM sync_queue
             ORDER BY created_at ASC, id ASC",
        )?;

        let entries = stmt
            .query_map([], Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    /// Discard every pending entry; returns how many were removed
    pub fn clear_queue(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM sync_queue", [])?)
    }

    pub fn queue_len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        usize::try_from(count).map_err(|e| Error::Database(e.to_string()))
    }
}
