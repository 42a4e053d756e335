//! Data models for Habitor

mod habit;
mod queue_entry;
mod record;

pub use habit::{
    HabitDetails, LocationTrigger, LocationTriggerKind, Priority, RepeatPattern,
    MAX_LOCATION_RADIUS_M, MIN_LOCATION_RADIUS_M,
};
pub use queue_entry::{NewQueueEntry, OperationType, QueueEntry};
pub use record::{LocalId, Record, RecordFields, RemoteDocument, RemoteKey};
