//! Capacity snapshots, placement requirements and largest-VM reports.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::config::OpsConfig;

/// One of the three capacity dimensions placement reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceDimension {
    Cpu,
    Memory,
    Storage,
}

impl fmt::Display for ResourceDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceDimension::Cpu => write!(f, "cpu"),
            ResourceDimension::Memory => write!(f, "memory"),
            ResourceDimension::Storage => write!(f, "storage"),
        }
    }
}

/// Point-in-time capacity view of one node.
///
/// Totals and allocations come straight from inventory; availability is
/// derived on demand through the configured overcommit policy and is
/// never persisted.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ResourceSnapshot {
    /// Node this snapshot describes.
    pub node: String,
    /// Physical core/thread count.
    pub total_cores: u64,
    /// Cores promised to guests on this node.
    pub allocated_cores: u64,
    /// Physical memory in bytes.
    pub total_memory_bytes: u64,
    /// Memory promised to guests in bytes.
    pub allocated_memory_bytes: u64,
    /// Memory actually in use on the host in bytes.
    pub actual_used_bytes: u64,
    /// Host CPU load fraction at snapshot time; breaks placement ties.
    #[serde(default)]
    pub cpu_load: f64,
    /// Total storage in bytes.
    pub total_storage_bytes: u64,
    /// Storage promised to guests in bytes.
    pub allocated_storage_bytes: u64,
}

impl ResourceSnapshot {
    /// Cores still available for new guests under the overcommit policy.
    pub fn available_cores(&self, config: &OpsConfig) -> u64 {
        config.cpu.headroom(self.total_cores, self.allocated_cores)
    }

    /// Memory bytes still available for new guests.
    pub fn available_memory_bytes(&self, config: &OpsConfig) -> u64 {
        config
            .memory
            .headroom(self.total_memory_bytes, self.allocated_memory_bytes)
    }

    /// Storage bytes still available for new guests.
    pub fn available_storage_bytes(&self, config: &OpsConfig) -> u64 {
        config
            .storage
            .headroom(self.total_storage_bytes, self.allocated_storage_bytes)
    }

    /// Availability for one dimension, used by the largest-VM report.
    pub fn available(&self, dimension: ResourceDimension, config: &OpsConfig) -> u64 {
        match dimension {
            ResourceDimension::Cpu => self.available_cores(config),
            ResourceDimension::Memory => self.available_memory_bytes(config),
            ResourceDimension::Storage => self.available_storage_bytes(config),
        }
    }
}

/// Cluster-wide aggregate of per-node snapshots.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ClusterCapacity {
    pub nodes: u32,
    pub online_nodes: u32,
    pub total_cores: u64,
    pub allocated_cores: u64,
    pub available_cores: u64,
    pub total_memory_bytes: u64,
    pub allocated_memory_bytes: u64,
    pub available_memory_bytes: u64,
    pub actual_used_bytes: u64,
    pub total_storage_bytes: u64,
    pub allocated_storage_bytes: u64,
    pub available_storage_bytes: u64,
}

impl ClusterCapacity {
    /// Folds one node snapshot into the aggregate.
    pub fn absorb(&mut self, snapshot: &ResourceSnapshot, config: &OpsConfig) {
        self.online_nodes += 1;
        self.total_cores += snapshot.total_cores;
        self.allocated_cores += snapshot.allocated_cores;
        self.available_cores += snapshot.available_cores(config);
        self.total_memory_bytes += snapshot.total_memory_bytes;
        self.allocated_memory_bytes += snapshot.allocated_memory_bytes;
        self.available_memory_bytes += snapshot.available_memory_bytes(config);
        self.actual_used_bytes += snapshot.actual_used_bytes;
        self.total_storage_bytes += snapshot.total_storage_bytes;
        self.allocated_storage_bytes += snapshot.allocated_storage_bytes;
        self.available_storage_bytes += snapshot.available_storage_bytes(config);
    }
}

/// Immutable description of what a workload needs from a node.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ResourceRequirements {
    pub cpu_cores: u32,
    pub memory_bytes: u64,
    pub storage_bytes: u64,
    /// Required storage plugin type, if the workload cares.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<String>,
    /// Whether the workload wants a fallback host to remain available.
    #[serde(default)]
    pub high_availability: bool,
    /// Restrict placement to these nodes when any of them qualifies.
    #[serde(default)]
    pub preferred_nodes: HashSet<String>,
    /// Never place on these nodes.
    #[serde(default)]
    pub excluded_nodes: HashSet<String>,
}

/// What one node could offer the largest possible VM.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NodeCapacity {
    pub node: String,
    pub max_cpu_cores: u64,
    pub max_memory_bytes: u64,
    pub max_storage_bytes: u64,
}

/// Report of the biggest VM the cluster could still host.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VmCapacity {
    /// Most cores obtainable on any single node.
    pub max_cpu_cores: u64,
    /// Most memory obtainable on any single node.
    pub max_memory_bytes: u64,
    /// Most storage obtainable on any single node.
    pub max_storage_bytes: u64,
    /// The dimension that constrains the request hardest.
    pub limiting_factor: ResourceDimension,
    /// Per-node offers, best first.
    pub alternatives: Vec<NodeCapacity>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ResourceSnapshot {
        ResourceSnapshot {
            node: "pve1".to_string(),
            total_cores: 16,
            allocated_cores: 10,
            total_memory_bytes: 64 << 30,
            allocated_memory_bytes: 48 << 30,
            actual_used_bytes: 30 << 30,
            cpu_load: 0.4,
            total_storage_bytes: 1 << 40,
            allocated_storage_bytes: 1 << 39,
        }
    }

    #[test]
    fn availability_follows_the_overcommit_formula() {
        let config = OpsConfig::strict();
        let snap = snapshot();
        assert_eq!(snap.available_cores(&config), 6);
        assert_eq!(snap.available_memory_bytes(&config), 16 << 30);
        assert_eq!(snap.available_storage_bytes(&config), 1 << 39);
    }

    #[test]
    fn availability_is_floored_at_zero() {
        let config = OpsConfig::strict();
        let mut snap = snapshot();
        snap.allocated_cores = 32;
        assert_eq!(snap.available_cores(&config), 0);
    }

    #[test]
    fn overcommit_raises_the_cpu_ceiling() {
        let mut config = OpsConfig::strict();
        config.cpu.ratio = 2.0;
        let snap = snapshot();
        // 16 * 2.0 - 10 allocated
        assert_eq!(snap.available_cores(&config), 22);
    }

    #[test]
    fn cluster_capacity_absorbs_snapshots() {
        let config = OpsConfig::strict();
        let mut cluster = ClusterCapacity::default();
        cluster.absorb(&snapshot(), &config);
        cluster.absorb(&snapshot(), &config);
        assert_eq!(cluster.online_nodes, 2);
        assert_eq!(cluster.total_cores, 32);
        assert_eq!(cluster.available_cores, 12);
    }

    #[test]
    fn dimension_names_are_lowercase() {
        assert_eq!(ResourceDimension::Cpu.to_string(), "cpu");
        assert_eq!(
            serde_json::to_string(&ResourceDimension::Storage).unwrap(),
            "\"storage\""
        );
    }
}
