use serde::{Deserialize, Serialize};

/// How aggressively a drain treats the node's guests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainMode {
    /// Leave maintenance-tolerant guests in place; local-disk guests
    /// fail their individual migration rather than being forced.
    Soft,
    /// Evacuate everything, copying local disks and migrating stopped
    /// guests offline.
    Hard,
}

/// Caller's intent for draining a node.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DrainRequest {
    pub mode: DrainMode,
    /// Run migrations concurrently instead of one after another.
    pub parallel: bool,
    /// Concurrency cap; falls back to the configured default.
    pub max_concurrent: Option<usize>,
    /// Permit offline migration of running guests in soft mode.
    pub allow_offline: bool,
    /// Send every guest to this node instead of asking placement.
    pub target_node: Option<String>,
}

impl Default for DrainRequest {
    fn default() -> Self {
        Self {
            mode: DrainMode::Soft,
            parallel: true,
            max_concurrent: None,
            allow_offline: false,
            target_node: None,
        }
    }
}

impl DrainRequest {
    pub fn hard() -> Self {
        Self {
            mode: DrainMode::Hard,
            ..Self::default()
        }
    }
}
