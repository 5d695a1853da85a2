//! Domain records for single-VM migrations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::domain::model::task::TaskHandle;

/// Lifecycle of a migration record.
///
/// `Pending` covers the gap between submission and the control plane
/// accepting the task; `Completed` and `Failed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl MigrationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationStatus::Completed | MigrationStatus::Failed)
    }
}

/// Whether the guest keeps running during the move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationType {
    Online,
    Offline,
}

/// Knobs forwarded to the control plane with a migration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MigrationOptions {
    /// Copy node-local disks along with the guest.
    #[serde(default)]
    pub with_local_disks: bool,
    /// Optional transfer bandwidth cap in MiB/s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_mbps: Option<u32>,
}

/// A single VM migration, created at submission and mutated only by
/// the polling logic until it reaches a terminal state. Terminal
/// records are retained for audit and history queries.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Migration {
    pub id: Uuid,
    pub vmid: u32,
    pub vm_name: String,
    pub source_node: String,
    pub target_node: String,
    pub migration_type: MigrationType,
    pub status: MigrationStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
    /// Remote task handle, absent when submission itself was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub initiated_by: String,
    pub options: MigrationOptions,
}

impl Migration {
    /// Marks the record terminal, stamping completion time and duration.
    pub fn finish(&mut self, status: MigrationStatus, error: Option<String>) {
        debug_assert!(status.is_terminal());
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.duration_seconds = Some((now - self.started_at).num_seconds());
        self.error_message = error;
    }
}

/// Immediate response to an accepted migration submission.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MigrationStarted {
    pub migration_id: Uuid,
    pub task: TaskHandle,
    /// Where the caller can poll for progress.
    pub status_url: String,
}

/// Read-only precondition report, used by drain before committing and
/// exposed to callers as a dry-run check.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MigrationCheck {
    pub vmid: u32,
    pub vm_name: String,
    pub source_node: String,
    pub target_node: String,
    /// The migration type that would be used.
    pub migration_type: MigrationType,
    /// Backends of node-local disks attached to the VM.
    pub local_disks: Vec<String>,
    /// True when a migration submitted with the checked options would
    /// pass all preconditions.
    pub feasible: bool,
    /// Human-readable reasons the migration would be rejected.
    pub blockers: Vec<String>,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_stamps_duration_and_detail() {
        let mut migration = Migration {
            id: Uuid::new_v4(),
            vmid: 101,
            vm_name: "web-1".to_string(),
            source_node: "pve1".to_string(),
            target_node: "pve2".to_string(),
            migration_type: MigrationType::Online,
            status: MigrationStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
            task: None,
            error_message: None,
            initiated_by: "api".to_string(),
            options: MigrationOptions::default(),
        };
        migration.finish(MigrationStatus::Failed, Some("task aborted".to_string()));
        assert_eq!(migration.status, MigrationStatus::Failed);
        assert!(migration.completed_at.is_some());
        assert_eq!(migration.error_message.as_deref(), Some("task aborted"));
    }

    #[test]
    fn terminal_statuses() {
        assert!(MigrationStatus::Completed.is_terminal());
        assert!(MigrationStatus::Failed.is_terminal());
        assert!(!MigrationStatus::Pending.is_terminal());
        assert!(!MigrationStatus::Running.is_terminal());
    }
}
