//! Identity types for TRIAGE entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Identifier of an installed app. Apps own problem records and are the
/// lock target for every mutation touching those records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub EntityId);

impl AppId {
    pub fn new() -> Self {
        Self(new_entity_id())
    }

    pub fn as_uuid(&self) -> EntityId {
        self.0
    }
}

impl Default for AppId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AppId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Identifier of a problem record.
///
/// Assigned by the store from a monotonically increasing sequence, so a
/// larger id always means a later insertion. Eviction uses it to break
/// `created_at` ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProblemId(pub i64);

impl ProblemId {
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ProblemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entity_id_is_v7() {
        let id = new_entity_id();
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn test_app_id_display_matches_uuid() {
        let app_id = AppId::new();
        assert_eq!(app_id.to_string(), app_id.as_uuid().to_string());
    }

    #[test]
    fn test_problem_id_ordering() {
        assert!(ProblemId(1) < ProblemId(2));
        assert_eq!(ProblemId(7).get(), 7);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&ProblemId(42)).unwrap();
        assert_eq!(json, "42");

        let app_id = AppId(Uuid::nil());
        let json = serde_json::to_string(&app_id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
    }
}
