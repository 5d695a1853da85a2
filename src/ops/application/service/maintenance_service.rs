//! Maintenance tracker: per-node maintenance state and its drain link.

use std::sync::Arc;
use tracing::{info, warn};

use crate::core::domain::error::{OpsError, OpsResult};
use crate::core::domain::model::maintenance::MaintenanceRecord;
use crate::core::domain::value_object::NodeName;
use crate::core::infrastructure::cluster_api::Inventory;
use crate::core::infrastructure::registry::OperationRegistry;
use crate::ops::application::request::maintenance_request::{
    EnterMaintenanceRequest, ExitMaintenanceRequest,
};
use crate::ops::application::service::drain_service::DrainService;

/// Flags nodes for maintenance and wires the optional drain/undrain.
///
/// The flag itself is authoritative for placement: a flagged node never
/// receives new guests. Maintenance is entered even when the triggered
/// drain leaves failed guests behind; those failures stay visible on
/// the linked drain operation only.
pub struct MaintenanceService {
    inventory: Arc<dyn Inventory>,
    drain: Arc<DrainService>,
    registry: Arc<OperationRegistry>,
}

impl MaintenanceService {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        drain: Arc<DrainService>,
        registry: Arc<OperationRegistry>,
    ) -> Self {
        Self {
            inventory,
            drain,
            registry,
        }
    }

    /// Puts a node into maintenance, optionally draining it first.
    ///
    /// # Errors
    /// Returns `OpsError::NotFound` for unknown nodes and
    /// `OpsError::Conflict` when the node is already in maintenance.
    pub async fn enter(
        &self,
        node: &str,
        request: EnterMaintenanceRequest,
    ) -> OpsResult<MaintenanceRecord> {
        NodeName::new(node.to_string()).await?;
        let nodes = self.inventory.list_nodes().await?;
        if !nodes.iter().any(|n| n.node == node) {
            return Err(OpsError::NotFound(format!("Node '{}' not found", node)));
        }
        if self.registry.in_maintenance(node).await {
            return Err(OpsError::Conflict(format!(
                "Node '{}' is already in maintenance",
                node
            )));
        }

        let mut record = MaintenanceRecord::enter(node, request.reason);

        if request.drain {
            match self.drain.begin_drain(node, request.drain_request).await {
                Ok(operation) => record.last_drain_id = Some(operation.id),
                // The flag is set regardless; a drain that could not
                // start leaves its trace in the log only.
                Err(e) => warn!(%node, error = %e, "maintenance drain could not start"),
            }
        }

        self.registry.set_maintenance(record.clone()).await;
        info!(%node, drain = ?record.last_drain_id, "maintenance enabled");
        Ok(record)
    }

    /// Takes a node out of maintenance, optionally moving its former
    /// guests back.
    ///
    /// # Errors
    /// Returns `OpsError::Conflict` when the node is not in maintenance.
    pub async fn exit(
        &self,
        node: &str,
        request: ExitMaintenanceRequest,
    ) -> OpsResult<MaintenanceRecord> {
        if !self.registry.in_maintenance(node).await {
            return Err(OpsError::Conflict(format!(
                "Node '{}' is not in maintenance",
                node
            )));
        }

        let mut record = self
            .registry
            .update_maintenance(node, |record| record.exit())
            .await
            .ok_or_else(|| OpsError::Internal(format!("maintenance record for '{}' vanished", node)))?;

        if request.undrain {
            match self.drain.undrain(node).await {
                Ok(operation) => {
                    record = self
                        .registry
                        .update_maintenance(node, |r| r.last_drain_id = Some(operation.id))
                        .await
                        .unwrap_or(record);
                }
                Err(e) => warn!(%node, error = %e, "undrain could not start"),
            }
        }

        info!(%node, "maintenance disabled");
        Ok(record)
    }

    /// Maintenance state of one node; `None` means it was never flagged.
    pub async fn status(&self, node: &str) -> Option<MaintenanceRecord> {
        self.registry.maintenance(node).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpsConfig;
    use crate::core::domain::model::node::NodeListItem;
    use crate::core::infrastructure::cluster_api::{MockInventory, MockMigrationExecutor};
    use crate::ops::application::service::capacity_service::CapacityService;
    use crate::ops::application::service::migration_service::MigrationService;
    use crate::ops::application::service::placement_service::PlacementService;

    fn node(name: &str) -> NodeListItem {
        NodeListItem {
            node: name.to_string(),
            status: "online".to_string(),
            cpu: None,
            maxcpu: Some(16),
            mem: None,
            maxmem: Some(64 << 30),
            disk: None,
            maxdisk: Some(1 << 40),
            uptime: None,
            id: None,
        }
    }

    fn empty_inventory() -> MockInventory {
        let mut inventory = MockInventory::new();
        inventory
            .expect_list_nodes()
            .returning(|| Ok(vec![node("pve1"), node("pve2")]));
        inventory.expect_list_vms().returning(|_| Ok(vec![]));
        inventory.expect_vm_disks().returning(|_, _| Ok(vec![]));
        inventory
    }

    fn service() -> (MaintenanceService, Arc<OperationRegistry>) {
        let registry = Arc::new(OperationRegistry::new());
        let inventory: Arc<dyn Inventory> = Arc::new(empty_inventory());
        let config = OpsConfig {
            poll_interval_ms: 5,
            ..OpsConfig::strict()
        };
        let capacity = Arc::new(CapacityService::new(Arc::clone(&inventory), config.clone()));
        let placement = Arc::new(PlacementService::new(
            capacity,
            Arc::clone(&registry),
            config.clone(),
        ));
        let migration = Arc::new(MigrationService::new(
            Arc::clone(&inventory),
            Arc::new(MockMigrationExecutor::new()),
            Arc::clone(&registry),
            config.clone(),
        ));
        let drain = Arc::new(DrainService::new(
            Arc::clone(&inventory),
            placement,
            migration,
            Arc::clone(&registry),
            config,
        ));
        (
            MaintenanceService::new(inventory, drain, Arc::clone(&registry)),
            registry,
        )
    }

    #[tokio::test]
    async fn test_enter_without_drain_sets_the_flag() {
        let (service, registry) = service();
        let record = service
            .enter("pve1", EnterMaintenanceRequest::default())
            .await
            .unwrap();
        assert!(record.in_maintenance);
        assert!(record.last_drain_id.is_none());
        assert!(registry.in_maintenance("pve1").await);
    }

    #[tokio::test]
    async fn test_enter_twice_conflicts() {
        let (service, _) = service();
        service
            .enter("pve1", EnterMaintenanceRequest::default())
            .await
            .unwrap();
        let second = service.enter("pve1", EnterMaintenanceRequest::default()).await;
        assert!(matches!(second, Err(OpsError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_enter_unknown_node_is_not_found() {
        let (service, _) = service();
        let result = service.enter("ghost", EnterMaintenanceRequest::default()).await;
        assert!(matches!(result, Err(OpsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_enter_with_drain_links_the_operation() {
        let (service, registry) = service();
        let record = service
            .enter(
                "pve1",
                EnterMaintenanceRequest {
                    drain: true,
                    ..EnterMaintenanceRequest::default()
                },
            )
            .await
            .unwrap();
        let drain_id = record.last_drain_id.expect("drain should be linked");
        assert!(registry.drain(drain_id).await.is_some());
        assert!(registry.in_maintenance("pve1").await);
    }

    #[tokio::test]
    async fn test_exit_clears_the_flag() {
        let (service, registry) = service();
        service
            .enter("pve1", EnterMaintenanceRequest::default())
            .await
            .unwrap();
        let record = service
            .exit("pve1", ExitMaintenanceRequest::default())
            .await
            .unwrap();
        assert!(!record.in_maintenance);
        assert!(record.ended_at.is_some());
        assert!(!registry.in_maintenance("pve1").await);
    }

    #[tokio::test]
    async fn test_exit_without_maintenance_conflicts() {
        let (service, _) = service();
        let result = service.exit("pve1", ExitMaintenanceRequest::default()).await;
        assert!(matches!(result, Err(OpsError::Conflict(_))));
    }
}
