//! Record model - the synchronized habit entity

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::HabitDetails;
use crate::util::name_key;

/// Local row identifier, assigned by the local store on insert
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LocalId(i64);

impl LocalId {
    /// Placeholder carried by records that have not been inserted yet
    pub const UNASSIGNED: Self = Self(0);

    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn is_assigned(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocalId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Opaque document key assigned by the remote store on first write
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteKey(String);

impl RemoteKey {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RemoteKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RemoteKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A habit as stored locally, with its sync metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Local identity, stable for the record's local lifetime
    pub local_id: LocalId,
    /// Remote identity, absent until the first successful remote write
    pub remote_key: Option<RemoteKey>,
    /// Timestamp (Unix ms) of the last successful remote write, 0 if never synced
    pub last_synced_at: i64,
    /// Display name, also the conflict-matching key at sign-in
    pub name: String,
    /// Soft delete flag
    pub deleted: bool,
    /// Habit payload
    #[serde(default)]
    pub details: HabitDetails,
}

impl Record {
    /// Create a new, never-synced record with the given name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            local_id: LocalId::UNASSIGNED,
            remote_key: None,
            last_synced_at: 0,
            name: name.into(),
            deleted: false,
            details: HabitDetails::default(),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: HabitDetails) -> Self {
        self.details = details;
        self
    }

    /// Whether the record has been written remotely at least once
    #[must_use]
    pub const fn is_synced(&self) -> bool {
        self.remote_key.is_some()
    }

    /// Case-insensitive name used for sign-in matching
    #[must_use]
    pub fn name_key(&self) -> String {
        name_key(&self.name)
    }

    /// Build the remote document payload, stamped with the write time
    #[must_use]
    pub fn to_fields(&self, stamp: i64) -> RecordFields {
        RecordFields {
            name: self.name.clone(),
            deleted: self.deleted,
            last_synced_at: stamp,
            local_id: self.local_id.is_assigned().then_some(self.local_id.get()),
            details: self.details.clone(),
        }
    }

    /// Build a local record from a remote document
    ///
    /// `local_id` is kept so an existing row can be overwritten in place.
    #[must_use]
    pub fn from_remote(document: &RemoteDocument, local_id: LocalId, stamp: i64) -> Self {
        Self {
            local_id,
            remote_key: Some(document.key.clone()),
            last_synced_at: stamp,
            name: document.fields.name.clone(),
            deleted: document.fields.deleted,
            details: document.fields.details.clone(),
        }
    }

    /// Compare the user-visible content, ignoring sync metadata
    #[must_use]
    pub fn same_content(&self, fields: &RecordFields) -> bool {
        self.name == fields.name && self.deleted == fields.deleted && self.details == fields.details
    }
}

/// Remote document payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFields {
    pub name: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub last_synced_at: i64,
    /// Local id on the device that last wrote the document (informational)
    #[serde(default)]
    pub local_id: Option<i64>,
    #[serde(default)]
    pub details: HabitDetails,
}

impl RecordFields {
    #[must_use]
    pub fn name_key(&self) -> String {
        name_key(&self.name)
    }
}

/// A remote document together with its key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub key: RemoteKey,
    pub fields: RecordFields,
}
