//! The persisted shape of an instance — the serialisation half of the
//! "recreate from five strings" pattern. Nothing here holds a
//! live resource; `WorktreeHandleData` is recreated into a
//! `WorktreeHandle` and `{session_name, program}` into a
//! `MultiplexerSession` by `Instance::from_record`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::git::diff::DiffStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Ready,
    Loading,
    Paused,
}

impl Status {
    fn as_u8(self) -> u8 {
        match self {
            Status::Running => 0,
            Status::Ready => 1,
            Status::Loading => 2,
            Status::Paused => 3,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Status::Running),
            1 => Some(Status::Ready),
            2 => Some(Status::Loading),
            3 => Some(Status::Paused),
            _ => None,
        }
    }
}

impl Serialize for Status {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Status::from_u8(value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown status code {value}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeHandleData {
    pub repo_path: String,
    pub worktree_path: String,
    pub session_name: String,
    pub branch_name: String,
    pub base_commit_sha: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub title: String,
    pub path: String,
    pub branch: String,
    pub status: Status,
    pub height: u16,
    pub width: u16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub auto_yes: bool,
    pub program: String,
    pub worktree: WorktreeHandleData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_stats: Option<DiffStats>,
}

/// The envelope persisted in `instances.json`: `{"type": ..., "data": ...}`.
/// `type` is matched manually in `storage.rs` rather than through serde's
/// adjacently-tagged-enum derive, so that an unrecognised tag on one array
/// element can be skipped with a warning instead of failing the whole
/// array's decode.
pub const TYPE_TASK: &str = "task";
pub const TYPE_ORCHESTRATOR: &str = "orchestrator";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_numeric_encoding() {
        for status in [Status::Running, Status::Ready, Status::Loading, Status::Paused] {
            let encoded = serde_json::to_string(&status).unwrap();
            let decoded: Status = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, status);
        }
    }

    #[test]
    fn status_matches_documented_encoding() {
        assert_eq!(serde_json::to_string(&Status::Running).unwrap(), "0");
        assert_eq!(serde_json::to_string(&Status::Ready).unwrap(), "1");
        assert_eq!(serde_json::to_string(&Status::Loading).unwrap(), "2");
        assert_eq!(serde_json::to_string(&Status::Paused).unwrap(), "3");
    }

    #[test]
    fn unknown_status_code_is_a_decode_error_not_a_panic() {
        let result: Result<Status, _> = serde_json::from_str("9");
        assert!(result.is_err());
    }
}
