//! Capacity provider: per-node and cluster-wide resource snapshots.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::OpsConfig;
use crate::core::domain::error::{OpsError, OpsResult};
use crate::core::domain::model::node::NodeListItem;
use crate::core::domain::model::resources::{ClusterCapacity, ResourceSnapshot};
use crate::core::infrastructure::cluster_api::Inventory;

/// Computes capacity snapshots from raw inventory.
///
/// Totals come from the node listing; allocations are the sum of what
/// resident guests have been promised, running or not. Snapshots are
/// cached for a short TTL because a drain hits capacity once per guest.
pub struct CapacityService {
    inventory: Arc<dyn Inventory>,
    config: OpsConfig,
    cache: RwLock<HashMap<String, (Instant, ResourceSnapshot)>>,
}

impl CapacityService {
    pub fn new(inventory: Arc<dyn Inventory>, config: OpsConfig) -> Self {
        Self {
            inventory,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of one node.
    ///
    /// With `allow_stale` a cached snapshot within the TTL is returned
    /// without touching the cluster.
    ///
    /// # Errors
    /// Returns `OpsError::NotFound` for unknown nodes and propagates
    /// provider failures.
    pub async fn node_snapshot(&self, node: &str, allow_stale: bool) -> OpsResult<ResourceSnapshot> {
        if allow_stale {
            if let Some(snapshot) = self.cached(node).await {
                return Ok(snapshot);
            }
        }

        let nodes = self.inventory.list_nodes().await?;
        let item = nodes
            .iter()
            .find(|n| n.node == node)
            .ok_or_else(|| OpsError::NotFound(format!("Node '{}' not found", node)))?;
        self.snapshot_of(item).await
    }

    /// Snapshots of every online node, plus warnings for nodes that
    /// had to be skipped because their guest listing failed.
    pub async fn online_snapshots(
        &self,
        allow_stale: bool,
    ) -> OpsResult<(Vec<ResourceSnapshot>, Vec<String>)> {
        let nodes = self.inventory.list_nodes().await?;
        let mut snapshots = Vec::new();
        let mut warnings = Vec::new();

        for item in nodes.iter().filter(|n| n.is_online()) {
            if allow_stale {
                if let Some(snapshot) = self.cached(&item.node).await {
                    snapshots.push(snapshot);
                    continue;
                }
            }
            match self.snapshot_of(item).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    warn!(node = %item.node, error = %e, "skipping node in capacity scan");
                    warnings.push(format!("node '{}' skipped: {}", item.node, e));
                }
            }
        }
        Ok((snapshots, warnings))
    }

    /// Cluster-wide aggregate over all nodes.
    ///
    /// Offline nodes count toward `nodes` but contribute no capacity.
    pub async fn cluster_capacity(&self, allow_stale: bool) -> OpsResult<ClusterCapacity> {
        let total_nodes = self.inventory.list_nodes().await?.len() as u32;
        let (snapshots, _warnings) = self.online_snapshots(allow_stale).await?;

        let mut capacity = ClusterCapacity {
            nodes: total_nodes,
            ..ClusterCapacity::default()
        };
        for snapshot in &snapshots {
            capacity.absorb(snapshot, &self.config);
        }
        Ok(capacity)
    }

    pub fn config(&self) -> &OpsConfig {
        &self.config
    }

    async fn cached(&self, node: &str) -> Option<ResourceSnapshot> {
        let cache = self.cache.read().await;
        cache.get(node).and_then(|(fetched, snapshot)| {
            (fetched.elapsed() < self.config.capacity_cache_ttl()).then(|| snapshot.clone())
        })
    }

    async fn snapshot_of(&self, item: &NodeListItem) -> OpsResult<ResourceSnapshot> {
        let vms = self.inventory.list_vms(&item.node).await?;
        let allocated_cores: u64 = vms.iter().map(|vm| u64::from(vm.maxcpu.unwrap_or(0))).sum();
        let allocated_memory: u64 = vms.iter().map(|vm| vm.maxmem.unwrap_or(0)).sum();
        let allocated_storage: u64 = vms.iter().map(|vm| vm.maxdisk.unwrap_or(0)).sum();

        let snapshot = ResourceSnapshot {
            node: item.node.clone(),
            total_cores: u64::from(item.maxcpu.unwrap_or(0)),
            allocated_cores,
            total_memory_bytes: item.maxmem.unwrap_or(0),
            allocated_memory_bytes: allocated_memory,
            actual_used_bytes: item.mem.unwrap_or(0),
            cpu_load: item.load(),
            total_storage_bytes: item.maxdisk.unwrap_or(0),
            allocated_storage_bytes: allocated_storage,
        };

        self.cache
            .write()
            .await
            .insert(item.node.clone(), (Instant::now(), snapshot.clone()));
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::model::node::NodeListItem;
    use crate::core::domain::model::vm::VmListItem;
    use crate::core::infrastructure::cluster_api::MockInventory;

    fn node(name: &str, status: &str, maxcpu: u32, maxmem: u64, maxdisk: u64) -> NodeListItem {
        NodeListItem {
            node: name.to_string(),
            status: status.to_string(),
            cpu: None,
            maxcpu: Some(maxcpu),
            mem: Some(maxmem / 2),
            maxmem: Some(maxmem),
            disk: None,
            maxdisk: Some(maxdisk),
            uptime: None,
            id: None,
        }
    }

    fn vm(vmid: u32, node: &str, maxcpu: u32, maxmem: u64, maxdisk: u64) -> VmListItem {
        VmListItem {
            vmid,
            name: format!("vm-{vmid}"),
            status: "running".to_string(),
            node: node.to_string(),
            maxcpu: Some(maxcpu),
            maxmem: Some(maxmem),
            maxdisk: Some(maxdisk),
            cpu: None,
            mem: None,
            tags: None,
        }
    }

    #[tokio::test]
    async fn test_node_snapshot_sums_guest_allocations() {
        let mut inventory = MockInventory::new();
        inventory
            .expect_list_nodes()
            .returning(|| Ok(vec![node("pve1", "online", 16, 64 << 30, 1 << 40)]));
        inventory
            .expect_list_vms()
            .returning(|_| Ok(vec![vm(101, "pve1", 2, 4 << 30, 32 << 30), vm(102, "pve1", 4, 8 << 30, 64 << 30)]));

        let service = CapacityService::new(Arc::new(inventory), OpsConfig::strict());
        let snapshot = service.node_snapshot("pve1", false).await.unwrap();
        assert_eq!(snapshot.allocated_cores, 6);
        assert_eq!(snapshot.allocated_memory_bytes, 12 << 30);
        assert_eq!(snapshot.allocated_storage_bytes, 96 << 30);
    }

    #[tokio::test]
    async fn test_unknown_node_is_not_found() {
        let mut inventory = MockInventory::new();
        inventory.expect_list_nodes().returning(|| Ok(vec![]));

        let service = CapacityService::new(Arc::new(inventory), OpsConfig::strict());
        let result = service.node_snapshot("ghost", false).await;
        assert!(matches!(result, Err(OpsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cached_snapshot_skips_the_cluster() {
        let mut inventory = MockInventory::new();
        // One listing pass only; the second snapshot is served from the
        // cache without touching the inventory at all.
        inventory
            .expect_list_nodes()
            .times(1)
            .returning(|| Ok(vec![node("pve1", "online", 16, 64 << 30, 1 << 40)]));
        inventory
            .expect_list_vms()
            .times(1)
            .returning(|_| Ok(vec![]));

        let service = CapacityService::new(Arc::new(inventory), OpsConfig::strict());
        service.node_snapshot("pve1", false).await.unwrap();
        let cached = service.node_snapshot("pve1", true).await.unwrap();
        assert_eq!(cached.node, "pve1");
    }

    #[tokio::test]
    async fn test_failed_nodes_are_skipped_with_a_warning() {
        let mut inventory = MockInventory::new();
        inventory.expect_list_nodes().returning(|| {
            Ok(vec![
                node("pve1", "online", 16, 64 << 30, 1 << 40),
                node("pve2", "online", 16, 64 << 30, 1 << 40),
                node("pve3", "offline", 16, 64 << 30, 1 << 40),
            ])
        });
        inventory.expect_list_vms().returning(|node| {
            if node == "pve2" {
                Err(OpsError::ProviderUnavailable("connection reset".to_string()))
            } else {
                Ok(vec![])
            }
        });

        let service = CapacityService::new(Arc::new(inventory), OpsConfig::strict());
        let (snapshots, warnings) = service.online_snapshots(false).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("pve2"));
    }

    #[tokio::test]
    async fn test_cluster_capacity_counts_offline_nodes_without_capacity() {
        let mut inventory = MockInventory::new();
        inventory.expect_list_nodes().returning(|| {
            Ok(vec![
                node("pve1", "online", 16, 64 << 30, 1 << 40),
                node("pve2", "offline", 16, 64 << 30, 1 << 40),
            ])
        });
        inventory.expect_list_vms().returning(|_| Ok(vec![]));

        let service = CapacityService::new(Arc::new(inventory), OpsConfig::strict());
        let capacity = service.cluster_capacity(false).await.unwrap();
        assert_eq!(capacity.nodes, 2);
        assert_eq!(capacity.online_nodes, 1);
        assert_eq!(capacity.total_cores, 16);
    }
}
