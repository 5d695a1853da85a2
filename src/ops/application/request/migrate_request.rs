use serde::{Deserialize, Serialize};

use crate::core::domain::model::migration::MigrationOptions;

/// Caller's intent for a single-VM migration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MigrateRequest {
    /// Node the VM should move to.
    pub target_node: String,
    /// Permit migrating the VM while it is stopped. A running VM
    /// always migrates online and is never stopped implicitly.
    #[serde(default)]
    pub allow_offline_migration: bool,
    /// Who asked for this, recorded verbatim on the migration record.
    #[serde(default = "default_initiator")]
    pub initiated_by: String,
    /// Transfer options forwarded to the control plane.
    #[serde(default)]
    pub options: MigrationOptions,
}

fn default_initiator() -> String {
    "api".to_string()
}

impl MigrateRequest {
    pub fn to(target_node: impl Into<String>) -> Self {
        Self {
            target_node: target_node.into(),
            allow_offline_migration: false,
            initiated_by: default_initiator(),
            options: MigrationOptions::default(),
        }
    }
}
