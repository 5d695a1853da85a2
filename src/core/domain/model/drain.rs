//! Aggregate records for node drain and undrain operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a bulk evacuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainKind {
    /// Move every targeted VM off the node.
    Drain,
    /// Move previously drained VMs back home.
    Undrain,
}

/// Overall lifecycle of a drain operation.
///
/// `Completed` means every targeted VM reached a terminal outcome,
/// failures included; `Failed` is reserved for operations that could
/// not proceed at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl DrainStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DrainStatus::Completed | DrainStatus::Failed)
    }
}

/// Per-VM progress inside a drain operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VmDrainOutcome {
    Pending,
    Migrating,
    Completed,
    Failed,
}

/// Status of one targeted VM within a drain.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VmDrainStatus {
    pub vmid: u32,
    pub name: String,
    pub status: VmDrainOutcome,
    /// Node the VM was (or will be) moved to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The underlying migration record, once one was submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_id: Option<Uuid>,
}

/// One trackable bulk evacuation of a node.
///
/// Counters are only ever advanced under the registry lock as component
/// migrations reach terminal states, so
/// `completed_vms + failed_vms <= total_vms` holds at every observable
/// instant and becomes an equality once the operation is terminal.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DrainOperation {
    pub id: Uuid,
    pub node: String,
    pub kind: DrainKind,
    pub status: DrainStatus,
    pub total_vms: u32,
    pub completed_vms: u32,
    pub failed_vms: u32,
    /// Per-VM breakdown for every targeted VM.
    pub vms: Vec<VmDrainStatus>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Why the operation failed as a whole, set when it never got
    /// going or when no guest had a feasible target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DrainOperation {
    pub fn new(node: impl Into<String>, kind: DrainKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            node: node.into(),
            kind,
            status: DrainStatus::Pending,
            total_vms: 0,
            completed_vms: 0,
            failed_vms: 0,
            vms: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// Completion percentage over targeted VMs; 100 for an empty drain.
    pub fn progress_percent(&self) -> f64 {
        if self.total_vms == 0 {
            return 100.0;
        }
        f64::from(self.completed_vms + self.failed_vms) / f64::from(self.total_vms) * 100.0
    }

    /// Records the terminal outcome of one targeted VM.
    pub fn settle_vm(&mut self, vmid: u32, outcome: VmDrainOutcome, error: Option<String>) {
        debug_assert!(matches!(
            outcome,
            VmDrainOutcome::Completed | VmDrainOutcome::Failed
        ));
        if let Some(vm) = self.vms.iter_mut().find(|vm| vm.vmid == vmid) {
            vm.status = outcome;
            vm.error = error;
            match outcome {
                VmDrainOutcome::Completed => self.completed_vms += 1,
                VmDrainOutcome::Failed => self.failed_vms += 1,
                _ => {}
            }
        }
    }

    /// Marks the whole operation terminal.
    pub fn finish(&mut self, status: DrainStatus, error: Option<String>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.error = error;
    }
}
