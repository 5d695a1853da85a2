//! Maintenance flag bookkeeping for cluster nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maintenance history of one node.
///
/// A node in maintenance is excluded from placement but its flag is
/// purely advisory to the control plane; the record also remembers the
/// last drain so a later exit can reverse it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MaintenanceRecord {
    pub node: String,
    pub in_maintenance: bool,
    /// Operator-supplied reason, kept verbatim for audit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Drain or undrain operation linked to this maintenance window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_drain_id: Option<Uuid>,
}

impl MaintenanceRecord {
    pub fn enter(node: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            node: node.into(),
            in_maintenance: true,
            reason,
            started_at: Utc::now(),
            ended_at: None,
            last_drain_id: None,
        }
    }

    pub fn exit(&mut self) {
        self.in_maintenance = false;
        self.ended_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_and_exit_stamp_the_window() {
        let mut record = MaintenanceRecord::enter("pve1", Some("kernel upgrade".to_string()));
        assert!(record.in_maintenance);
        assert!(record.ended_at.is_none());
        record.exit();
        assert!(!record.in_maintenance);
        assert!(record.ended_at.is_some());
    }
}
