//! Domain model for cluster nodes as reported by the `/nodes` endpoint.

use serde::{Deserialize, Serialize};

/// A node as returned by the node listing endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NodeListItem {
    /// Node name (unique per cluster).
    pub node: String,
    /// Current status (e.g., "online", "offline").
    pub status: String,
    /// CPU usage fraction (0.0 to 1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    /// Physical core/thread count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxcpu: Option<u32>,
    /// Memory usage in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem: Option<u64>,
    /// Total memory in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxmem: Option<u64>,
    /// Local disk usage in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<u64>,
    /// Total local disk space in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxdisk: Option<u64>,
    /// Uptime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    /// Unique resource identifier (e.g., "node/pve1").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl NodeListItem {
    /// Whether the node is reachable and schedulable at the inventory level.
    pub fn is_online(&self) -> bool {
        self.status == "online"
    }

    /// Current CPU load fraction, defaulting to zero when unreported.
    pub fn load(&self) -> f64 {
        self.cpu.unwrap_or(0.0)
    }
}
