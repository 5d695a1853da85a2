//! Migration orchestrator: precondition checks, async submission and
//! task polling for single-VM migrations.

use std::sync::Arc;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::OpsConfig;
use crate::core::domain::error::{OpsError, OpsResult, ValidationError};
use crate::core::domain::model::migration::{
    Migration, MigrationCheck, MigrationStarted, MigrationStatus, MigrationType,
};
use crate::core::domain::model::task::{TaskHandle, TaskState};
use crate::core::domain::model::vm::VmListItem;
use crate::core::domain::value_object::{StorageClass, VmId};
use crate::core::infrastructure::cluster_api::{Inventory, MigrationExecutor};
use crate::core::infrastructure::registry::OperationRegistry;
use crate::ops::application::request::migrate_request::MigrateRequest;

/// Consecutive poll failures tolerated before a migration is written
/// off as lost.
const MAX_POLL_FAILURES: u32 = 5;

/// Outcome of the synchronous precondition pass.
struct Evaluation {
    migration_type: MigrationType,
    local_disks: Vec<String>,
    blockers: Vec<OpsError>,
    warnings: Vec<String>,
}

/// Runs single-VM migrations end to end.
///
/// `start` returns as soon as the control plane accepts the task; a
/// spawned poll loop drives the record to its terminal state. Records
/// are kept for audit, including submissions the control plane
/// rejected.
pub struct MigrationService {
    inventory: Arc<dyn Inventory>,
    executor: Arc<dyn MigrationExecutor>,
    registry: Arc<OperationRegistry>,
    config: OpsConfig,
}

impl MigrationService {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        executor: Arc<dyn MigrationExecutor>,
        registry: Arc<OperationRegistry>,
        config: OpsConfig,
    ) -> Self {
        Self {
            inventory,
            executor,
            registry,
            config,
        }
    }

    /// Locates a guest anywhere on the cluster.
    ///
    /// # Errors
    /// Returns `OpsError::Validation` for ids outside the accepted
    /// range and `OpsError::NotFound` when no online node hosts the VM.
    pub async fn find_vm(&self, vmid: u32) -> OpsResult<VmListItem> {
        let vmid = VmId::new(vmid)?.get();
        let nodes = self.inventory.list_nodes().await?;
        for node in nodes.iter().filter(|n| n.is_online()) {
            match self.inventory.list_vms(&node.node).await {
                Ok(vms) => {
                    if let Some(vm) = vms.into_iter().find(|vm| vm.vmid == vmid) {
                        return Ok(vm);
                    }
                }
                Err(e) => warn!(node = %node.node, error = %e, "skipping node in VM lookup"),
            }
        }
        Err(OpsError::NotFound(format!("VM {} not found", vmid)))
    }

    /// Read-only precondition report for a prospective migration.
    ///
    /// Never creates a record; drain uses this before committing and
    /// callers can expose it as a dry run.
    pub async fn check(&self, vmid: u32, request: &MigrateRequest) -> OpsResult<MigrationCheck> {
        let vm = self.find_vm(vmid).await?;
        let evaluation = self.evaluate(&vm, request).await?;
        Ok(MigrationCheck {
            vmid,
            vm_name: vm.name,
            source_node: vm.node,
            target_node: request.target_node.clone(),
            migration_type: evaluation.migration_type,
            local_disks: evaluation.local_disks,
            feasible: evaluation.blockers.is_empty(),
            blockers: evaluation
                .blockers
                .iter()
                .map(|e| e.to_string())
                .collect(),
            warnings: evaluation.warnings,
        })
    }

    /// Starts a migration and returns immediately once the control
    /// plane has accepted it.
    ///
    /// # Errors
    /// All precondition failures reject synchronously before any record
    /// exists. A submission the control plane refuses is the one
    /// exception: it leaves a failed record behind for audit.
    pub async fn start(&self, vmid: u32, request: MigrateRequest) -> OpsResult<MigrationStarted> {
        let vm = self.find_vm(vmid).await?;
        let evaluation = self.evaluate(&vm, &request).await?;
        if let Some(blocker) = evaluation.blockers.into_iter().next() {
            return Err(blocker);
        }

        if !self.registry.try_claim_vm(vmid).await {
            return Err(OpsError::Conflict(format!(
                "VM {} is already being migrated",
                vmid
            )));
        }

        let migration = Migration {
            id: Uuid::new_v4(),
            vmid,
            vm_name: vm.name.clone(),
            source_node: vm.node.clone(),
            target_node: request.target_node.clone(),
            migration_type: evaluation.migration_type,
            status: MigrationStatus::Pending,
            started_at: chrono::Utc::now(),
            completed_at: None,
            duration_seconds: None,
            task: None,
            error_message: None,
            initiated_by: request.initiated_by.clone(),
            options: request.options.clone(),
        };
        let id = migration.id;
        self.registry.insert_migration(migration).await;

        let online = evaluation.migration_type == MigrationType::Online;
        match self
            .executor
            .submit_migration(vmid, &vm.node, &request.target_node, online, &request.options)
            .await
        {
            Ok(task) => {
                info!(%vmid, source = %vm.node, target = %request.target_node, upid = %task.upid, "migration accepted");
                let handle = task.clone();
                self.registry
                    .update_migration(id, |m| m.task = Some(handle))
                    .await;
                self.registry.mark_migration_running(id).await;
                self.spawn_poll_loop(id, task.clone());
                Ok(MigrationStarted {
                    migration_id: id,
                    task,
                    status_url: format!("/vms/{}/migrate/status/{}", vmid, id),
                })
            }
            Err(e) => {
                // Keep the rejected submission as a failed audit record.
                self.registry
                    .finish_migration(id, MigrationStatus::Failed, Some(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    /// Current state of one migration record.
    pub async fn status(&self, id: Uuid) -> OpsResult<Migration> {
        self.registry
            .migration(id)
            .await
            .ok_or_else(|| OpsError::NotFound(format!("Migration {} not found", id)))
    }

    /// Migration history of one guest, newest first.
    pub async fn history(&self, vmid: u32) -> Vec<Migration> {
        self.registry
            .list_migrations()
            .await
            .into_iter()
            .filter(|m| m.vmid == vmid)
            .collect()
    }

    /// Blocks until the migration reaches a terminal state.
    pub async fn wait_for_terminal(&self, id: Uuid) -> OpsResult<Migration> {
        let mut rx = self
            .registry
            .subscribe_migration(id)
            .await
            .ok_or_else(|| OpsError::NotFound(format!("Migration {} not found", id)))?;
        while !rx.borrow_and_update().is_terminal() {
            rx.changed()
                .await
                .map_err(|_| OpsError::Internal("migration status channel closed".to_string()))?;
        }
        self.status(id).await
    }

    /// Starts a migration and blocks until it is terminal.
    ///
    /// Kept for compatibility with callers that cannot poll. Long
    /// migrations will outlive most client-side timeouts; prefer
    /// [`start`](Self::start) plus status polling.
    #[deprecated(note = "use start() and poll, or wait_for_terminal()")]
    pub async fn migrate_and_wait(
        &self,
        vmid: u32,
        request: MigrateRequest,
    ) -> OpsResult<Migration> {
        let started = self.start(vmid, request).await?;
        self.wait_for_terminal(started.migration_id).await
    }

    /// Synchronous precondition pass shared by `check` and `start`.
    async fn evaluate(&self, vm: &VmListItem, request: &MigrateRequest) -> OpsResult<Evaluation> {
        let mut blockers = Vec::new();
        let mut warnings = Vec::new();

        if request.target_node == vm.node {
            blockers.push(OpsError::from(ValidationError::Field {
                field: "target_node".to_string(),
                message: "target node must differ from source node".to_string(),
            }));
        } else {
            let nodes = self.inventory.list_nodes().await?;
            match nodes.iter().find(|n| n.node == request.target_node) {
                None => blockers.push(OpsError::NotFound(format!(
                    "Node '{}' not found",
                    request.target_node
                ))),
                Some(target) if !target.is_online() => blockers.push(OpsError::precondition(
                    format!("target node '{}' is offline", request.target_node),
                    "bring the node online or choose another target",
                )),
                Some(_) => {}
            }
        }

        if self.registry.vm_migrating(vm.vmid).await {
            blockers.push(OpsError::Conflict(format!(
                "VM {} is already being migrated",
                vm.vmid
            )));
        }

        let disks = self.inventory.vm_disks(&vm.node, vm.vmid).await?;
        let local_disks: Vec<String> = disks
            .iter()
            .filter(|d| {
                StorageClass::classify(&d.backend, &self.config.local_storage_patterns).is_local()
            })
            .map(|d| format!("{} ({})", d.key, d.backend))
            .collect();

        let migration_type = if vm.is_running() {
            MigrationType::Online
        } else {
            MigrationType::Offline
        };

        if !local_disks.is_empty() {
            if !request.options.with_local_disks {
                blockers.push(OpsError::precondition(
                    format!(
                        "VM {} has node-local disks: {}",
                        vm.vmid,
                        local_disks.join(", ")
                    ),
                    "set with_local_disks=true to copy them to the target",
                ));
            } else if migration_type == MigrationType::Online {
                warnings.push(
                    "local disk contents are copied while the VM keeps running; expect \
                     prolonged transfer"
                        .to_string(),
                );
            }
        }

        Ok(Evaluation {
            migration_type,
            local_disks,
            blockers,
            warnings,
        })
    }

    fn spawn_poll_loop(&self, id: Uuid, task: TaskHandle) {
        let registry = Arc::clone(&self.registry);
        let executor = Arc::clone(&self.executor);
        let interval = self.config.poll_interval();
        tokio::spawn(async move {
            let mut failures = 0u32;
            loop {
                sleep(interval).await;
                match executor.task_state(&task).await {
                    Ok(TaskState::Running) => failures = 0,
                    Ok(TaskState::Ok) => {
                        registry
                            .finish_migration(id, MigrationStatus::Completed, None)
                            .await;
                        break;
                    }
                    Ok(TaskState::Error { detail }) => {
                        registry
                            .finish_migration(id, MigrationStatus::Failed, Some(detail))
                            .await;
                        break;
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(migration = %id, error = %e, failures, "task poll failed");
                        if failures >= MAX_POLL_FAILURES {
                            registry
                                .finish_migration(
                                    id,
                                    MigrationStatus::Failed,
                                    Some(format!("task polling failed repeatedly: {}", e)),
                                )
                                .await;
                            break;
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::model::node::NodeListItem;
    use crate::core::domain::model::vm::VmDisk;
    use crate::core::infrastructure::cluster_api::{MockInventory, MockMigrationExecutor};

    fn node(name: &str, status: &str) -> NodeListItem {
        NodeListItem {
            node: name.to_string(),
            status: status.to_string(),
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

    fn vm(vmid: u32, node: &str, status: &str) -> VmListItem {
        VmListItem {
            vmid,
            name: format!("vm-{vmid}"),
            status: status.to_string(),
            node: node.to_string(),
            maxcpu: Some(2),
            maxmem: Some(4 << 30),
            maxdisk: Some(32 << 30),
            cpu: None,
            mem: None,
            tags: None,
        }
    }

    fn shared_disk() -> VmDisk {
        VmDisk {
            key: "scsi0".to_string(),
            volume: "ceph-pool:vm-101-disk-0".to_string(),
            backend: "ceph-pool".to_string(),
        }
    }

    fn local_disk() -> VmDisk {
        VmDisk {
            key: "scsi0".to_string(),
            volume: "local-lvm:vm-102-disk-0".to_string(),
            backend: "local-lvm".to_string(),
        }
    }

    fn inventory_with(disks: Vec<VmDisk>) -> MockInventory {
        let mut inventory = MockInventory::new();
        inventory
            .expect_list_nodes()
            .returning(|| Ok(vec![node("pve1", "online"), node("pve2", "online")]));
        inventory
            .expect_list_vms()
            .returning(|n| {
                if n == "pve1" {
                    Ok(vec![vm(101, "pve1", "running")])
                } else {
                    Ok(vec![])
                }
            });
        inventory
            .expect_vm_disks()
            .returning(move |_, _| Ok(disks.clone()));
        inventory
    }

    fn fast_config() -> OpsConfig {
        OpsConfig {
            poll_interval_ms: 5,
            ..OpsConfig::strict()
        }
    }

    fn service(
        inventory: MockInventory,
        executor: MockMigrationExecutor,
    ) -> (MigrationService, Arc<OperationRegistry>) {
        let registry = Arc::new(OperationRegistry::new());
        (
            MigrationService::new(
                Arc::new(inventory),
                Arc::new(executor),
                registry.clone(),
                fast_config(),
            ),
            registry,
        )
    }

    fn accepting_executor() -> MockMigrationExecutor {
        let mut executor = MockMigrationExecutor::new();
        executor.expect_submit_migration().returning(|vmid, source, _, _, _| {
            Ok(TaskHandle {
                upid: format!("UPID:{}:0:0:0:qmigrate:{}:ops@pam:", source, vmid),
                node: source.to_string(),
            })
        });
        executor
            .expect_task_state()
            .returning(|_| Ok(TaskState::Ok));
        executor
    }

    #[tokio::test]
    async fn test_same_node_target_is_rejected_without_a_record() {
        let (service, registry) =
            service(inventory_with(vec![shared_disk()]), MockMigrationExecutor::new());
        let result = service.start(101, MigrateRequest::to("pve1")).await;
        assert!(matches!(result, Err(OpsError::Validation { .. })));
        assert!(registry.list_migrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_vmid_is_rejected() {
        let (service, _) =
            service(inventory_with(vec![]), MockMigrationExecutor::new());
        let result = service.start(99, MigrateRequest::to("pve2")).await;
        assert!(matches!(result, Err(OpsError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_unknown_vm_is_not_found() {
        let (service, _) =
            service(inventory_with(vec![]), MockMigrationExecutor::new());
        let result = service.start(999, MigrateRequest::to("pve2")).await;
        assert!(matches!(result, Err(OpsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_local_disks_require_the_flag() {
        let (service, registry) =
            service(inventory_with(vec![local_disk()]), MockMigrationExecutor::new());
        let result = service.start(101, MigrateRequest::to("pve2")).await;
        match result {
            Err(OpsError::PreconditionFailed { remediation, .. }) => {
                assert!(remediation.contains("with_local_disks"));
            }
            other => panic!("expected precondition failure, got {:?}", other),
        }
        assert!(registry.list_migrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_check_reports_local_disks_without_side_effects() {
        let (service, registry) =
            service(inventory_with(vec![local_disk()]), MockMigrationExecutor::new());
        let check = service
            .check(101, &MigrateRequest::to("pve2"))
            .await
            .unwrap();
        assert!(!check.feasible);
        assert_eq!(check.local_disks.len(), 1);
        assert_eq!(check.migration_type, MigrationType::Online);
        assert!(registry.list_migrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_successful_migration_reaches_completed() {
        let (service, _) = service(inventory_with(vec![shared_disk()]), accepting_executor());
        let started = service.start(101, MigrateRequest::to("pve2")).await.unwrap();
        assert!(started.status_url.contains(&started.migration_id.to_string()));

        let settled = service.wait_for_terminal(started.migration_id).await.unwrap();
        assert_eq!(settled.status, MigrationStatus::Completed);
        assert!(settled.duration_seconds.is_some());
        assert_eq!(settled.source_node, "pve1");
        assert_eq!(settled.target_node, "pve2");
    }

    #[tokio::test]
    async fn test_rejected_submission_leaves_a_failed_audit_record() {
        let mut executor = MockMigrationExecutor::new();
        executor.expect_submit_migration().returning(|_, _, _, _, _| {
            Err(OpsError::Api {
                status: 403,
                message: "permission denied".to_string(),
            })
        });
        let (service, registry) = service(inventory_with(vec![shared_disk()]), executor);

        let result = service.start(101, MigrateRequest::to("pve2")).await;
        assert!(matches!(result, Err(OpsError::Api { .. })));

        let history = service.history(101).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, MigrationStatus::Failed);
        // Guard must be free again for a retry.
        assert!(registry.try_claim_vm(101).await);
    }

    #[tokio::test]
    async fn test_second_migration_of_the_same_vm_conflicts() {
        let mut executor = MockMigrationExecutor::new();
        executor.expect_submit_migration().returning(|vmid, source, _, _, _| {
            Ok(TaskHandle {
                upid: format!("UPID:{}:0:0:0:qmigrate:{}:ops@pam:", source, vmid),
                node: source.to_string(),
            })
        });
        // Never terminates while we try the second start.
        executor
            .expect_task_state()
            .returning(|_| Ok(TaskState::Running));
        let (service, _) = service(inventory_with(vec![shared_disk()]), executor);

        service.start(101, MigrateRequest::to("pve2")).await.unwrap();
        let second = service.start(101, MigrateRequest::to("pve2")).await;
        assert!(matches!(second, Err(OpsError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_remote_task_failure_marks_the_record_failed() {
        let mut executor = MockMigrationExecutor::new();
        executor.expect_submit_migration().returning(|vmid, source, _, _, _| {
            Ok(TaskHandle {
                upid: format!("UPID:{}:0:0:0:qmigrate:{}:ops@pam:", source, vmid),
                node: source.to_string(),
            })
        });
        executor.expect_task_state().returning(|_| {
            Ok(TaskState::Error {
                detail: "migration aborted".to_string(),
            })
        });
        let (service, _) = service(inventory_with(vec![shared_disk()]), executor);

        let started = service.start(101, MigrateRequest::to("pve2")).await.unwrap();
        let settled = service.wait_for_terminal(started.migration_id).await.unwrap();
        assert_eq!(settled.status, MigrationStatus::Failed);
        assert_eq!(settled.error_message.as_deref(), Some("migration aborted"));
    }

    #[tokio::test]
    async fn test_deprecated_blocking_variant_follows_the_async_path() {
        let (service, _) = service(inventory_with(vec![shared_disk()]), accepting_executor());
        #[allow(deprecated)]
        let settled = service
            .migrate_and_wait(101, MigrateRequest::to("pve2"))
            .await
            .unwrap();
        assert_eq!(settled.status, MigrationStatus::Completed);
        assert_eq!(service.history(101).await.len(), 1);
    }
}
