//! Unique identifiers for scheduler entities

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a task
///
/// Every task is assigned a fresh id at spawn time. The id stays valid for
/// the lifetime of the task and is never reused, which makes it a stable
/// handle for bookkeeping structures that must refer to a task without
/// owning it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new random task ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a task ID from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task:{}", self.0)
    }
}

/// Unique identifier for an event
///
/// A machine-word-sized handle allocated by the scheduler that created the
/// event. The id is valid until the event is deleted; operations on an
/// unknown id are benign no-ops.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EventId(u64);

impl EventId {
    /// Creates an event ID from a raw handle value
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw handle value
    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_creation() {
        let id1 = TaskId::new();
        let id2 = TaskId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_task_id_from_uuid() {
        let uuid = Uuid::new_v4();
        let id = TaskId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn test_task_id_display() {
        let id = TaskId::new();
        let display = format!("{}", id);
        assert!(display.starts_with("task:"));
    }

    #[test]
    fn test_event_id_roundtrip() {
        let id = EventId::from_raw(42);
        assert_eq!(id.as_raw(), 42);
    }

    #[test]
    fn test_event_id_display() {
        let id = EventId::from_raw(7);
        assert_eq!(format!("{}", id), "event:7");
    }

    #[test]
    fn test_event_id_ordering() {
        assert!(EventId::from_raw(1) < EventId::from_raw(2));
    }
}
