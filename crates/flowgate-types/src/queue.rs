//! Execution admission queue rows.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::output::TriggerContext;

/// Lifecycle: `Pending` → `Claimed` → `Dispatched` → `Completed` | `Failed`.
/// A `Claimed` row left too long is reset to `Pending` by the stale sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Claimed,
    Dispatched,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Dispatched => "dispatched",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "dispatched" => Ok(Self::Dispatched),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("invalid queue status: {other}")),
        }
    }
}

/// A run request waiting for (or holding) a dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionQueueEntry {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub definition_version_id: Uuid,
    /// Bound when the row becomes `Dispatched`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    pub status: QueueStatus,
    pub trigger: TriggerContext,
    /// Number of times the row has been claimed (reclaims included).
    pub claim_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ExecutionQueueEntry {
    /// A fresh `Pending` request.
    pub fn new(workspace_id: Uuid, definition_version_id: Uuid, trigger: TriggerContext) -> Self {
        Self {
            id: Uuid::now_v7(),
            workspace_id,
            definition_version_id,
            execution_id: None,
            status: QueueStatus::Pending,
            trigger,
            claim_count: 0,
            created_at: Utc::now(),
            claimed_at: None,
            completed_at: None,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_str_roundtrip() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Claimed,
            QueueStatus::Dispatched,
            QueueStatus::Completed,
            QueueStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<QueueStatus>().unwrap(), status);
        }
        assert!("lost".parse::<QueueStatus>().is_err());
    }

    #[test]
    fn test_new_entry_is_pending() {
        let entry = ExecutionQueueEntry::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            TriggerContext::manual(serde_json::Value::Null),
        );
        assert_eq!(entry.status, QueueStatus::Pending);
        assert_eq!(entry.claim_count, 0);
        assert!(entry.execution_id.is_none());
        assert!(!entry.status.is_terminal());
    }
}
