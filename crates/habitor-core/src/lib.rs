//! habitor-core - Core library for Habitor
//!
//! Local-first habit storage with background synchronization to a remote
//! document store. Every write lands in SQLite first; remote writes happen
//! behind it and fall back to a durable queue that is replayed when the
//! device comes back online.

pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod identity;
pub mod models;
pub mod remote;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{LocalId, Record, RemoteKey};
