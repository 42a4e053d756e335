//! Settings repository implementation
//!
//! Key/value storage for the few values sync needs to keep between runs.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// Settings key holding the device-scoped identity
pub const DEVICE_ID_KEY: &str = "device_id";
/// Settings key holding the signed-in account, if any
pub const ACCOUNT_ID_KEY: &str = "account_id";

/// `SQLite` implementation of the settings table
pub struct SqliteSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM settings WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM settings WHERE key = ?", [key])?;
        Ok(())
    }

    /// Load the persisted device id, generating `device_<uuid>` on first use
    pub fn load_or_create_device_id(&self) -> Result<String> {
        if let Some(existing) = self.get(DEVICE_ID_KEY)? {
            return Ok(existing);
        }

        let device_id = format!("device_{}", uuid::Uuid::now_v7());
        self.set(DEVICE_ID_KEY, &device_id)?;
        tracing::info!("Generated device id {device_id}");
        Ok(device_id)
    }
}
