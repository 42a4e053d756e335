//! Database layer for Habitor

mod connection;
mod local_store;
mod migrations;
mod repository;
mod settings_repository;

pub use connection::Database;
pub use local_store::{LocalStore, SqliteLocalStore};
pub use repository::SqliteHabitRepository;
pub use settings_repository::{SqliteSettingsRepository, ACCOUNT_ID_KEY, DEVICE_ID_KEY};
