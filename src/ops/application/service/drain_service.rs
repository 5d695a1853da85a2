//! Drain orchestrator: bulk evacuation of a node and its reversal.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::OpsConfig;
use crate::core::domain::error::{OpsError, OpsResult};
use crate::core::domain::model::drain::{
    DrainKind, DrainOperation, DrainStatus, VmDrainOutcome, VmDrainStatus,
};
use crate::core::domain::model::migration::{MigrationOptions, MigrationStatus};
use crate::core::domain::model::vm::VmListItem;
use crate::core::domain::value_object::{NodeName, StorageClass};
use crate::core::infrastructure::cluster_api::Inventory;
use crate::core::infrastructure::registry::OperationRegistry;
use crate::ops::application::request::drain_request::{DrainMode, DrainRequest};
use crate::ops::application::request::migrate_request::MigrateRequest;
use crate::ops::application::service::migration_service::MigrationService;
use crate::ops::application::service::placement_service::PlacementService;

/// One guest scheduled for evacuation, with its target fixed or left
/// to placement.
struct DrainJob {
    vm: VmListItem,
    fixed_target: Option<String>,
    options: MigrationOptions,
}

/// Whether a guest's migration was actually tried. A batch where no
/// guest had anywhere to go fails as a whole; individual failures on
/// attempted migrations do not.
enum VmAttempt {
    Attempted,
    NoTarget,
}

/// Coordinates bulk migrations off (and back onto) a node.
///
/// A drain is accepted immediately and runs in the background; the
/// per-node guard in the registry guarantees at most one drain or
/// undrain in flight per node. Post-acceptance failures never abort
/// the whole operation, they are recorded per guest.
pub struct DrainService {
    inventory: Arc<dyn Inventory>,
    placement: Arc<PlacementService>,
    migration: Arc<MigrationService>,
    registry: Arc<OperationRegistry>,
    config: OpsConfig,
}

/// The cloneable subset a spawned drain task needs.
#[derive(Clone)]
struct DrainWorker {
    inventory: Arc<dyn Inventory>,
    placement: Arc<PlacementService>,
    migration: Arc<MigrationService>,
    registry: Arc<OperationRegistry>,
    config: OpsConfig,
}

impl DrainService {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        placement: Arc<PlacementService>,
        migration: Arc<MigrationService>,
        registry: Arc<OperationRegistry>,
        config: OpsConfig,
    ) -> Self {
        Self {
            inventory,
            placement,
            migration,
            registry,
            config,
        }
    }

    fn worker(&self) -> DrainWorker {
        DrainWorker {
            inventory: Arc::clone(&self.inventory),
            placement: Arc::clone(&self.placement),
            migration: Arc::clone(&self.migration),
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
        }
    }

    /// Starts draining a node. Returns the pending operation record
    /// immediately; progress is queried through [`drain_status`].
    ///
    /// [`drain_status`]: Self::drain_status
    ///
    /// # Errors
    /// Returns `OpsError::NotFound` for unknown nodes and
    /// `OpsError::Conflict` when the node already has a drain or
    /// undrain in flight.
    pub async fn begin_drain(
        &self,
        node: &str,
        request: DrainRequest,
    ) -> OpsResult<DrainOperation> {
        NodeName::new(node.to_string()).await?;
        let nodes = self.inventory.list_nodes().await?;
        if !nodes.iter().any(|n| n.node == node) {
            return Err(OpsError::NotFound(format!("Node '{}' not found", node)));
        }
        if !self.registry.try_claim_node(node).await {
            return Err(OpsError::Conflict(format!(
                "Node '{}' already has a drain operation in flight",
                node
            )));
        }

        let operation = DrainOperation::new(node, DrainKind::Drain);
        self.registry.insert_drain(operation.clone()).await;
        info!(%node, drain = %operation.id, mode = ?request.mode, "drain accepted");

        let worker = self.worker();
        let node = node.to_string();
        let id = operation.id;
        tokio::spawn(async move {
            worker.run_drain(id, node, request).await;
        });
        Ok(operation)
    }

    /// Reverses the most recent completed drain of a node, moving every
    /// guest that was successfully drained, and is still where the
    /// drain put it, back home.
    ///
    /// # Errors
    /// Returns `OpsError::Conflict` while the node is in maintenance or
    /// already draining, `OpsError::NotFound` without drain history.
    pub async fn undrain(&self, node: &str) -> OpsResult<DrainOperation> {
        NodeName::new(node.to_string()).await?;
        if self.registry.in_maintenance(node).await {
            return Err(OpsError::Conflict(format!(
                "Node '{}' is in maintenance; disable maintenance before undraining",
                node
            )));
        }
        let source = self
            .registry
            .last_completed_drain(node)
            .await
            .ok_or_else(|| OpsError::NotFound(format!("No drain history for node '{}'", node)))?;
        if !self.registry.try_claim_node(node).await {
            return Err(OpsError::Conflict(format!(
                "Node '{}' already has a drain operation in flight",
                node
            )));
        }

        let operation = DrainOperation::new(node, DrainKind::Undrain);
        self.registry.insert_drain(operation.clone()).await;
        info!(%node, undrain = %operation.id, reverses = %source.id, "undrain accepted");

        let worker = self.worker();
        let node = node.to_string();
        let id = operation.id;
        tokio::spawn(async move {
            worker.run_undrain(id, node, source).await;
        });
        Ok(operation)
    }

    /// Read-only snapshot of one drain operation.
    pub async fn drain_status(&self, id: Uuid) -> OpsResult<DrainOperation> {
        self.registry
            .drain(id)
            .await
            .ok_or_else(|| OpsError::NotFound(format!("Drain operation {} not found", id)))
    }

    /// Blocks until the operation reaches a terminal state.
    pub async fn wait_for_terminal(&self, id: Uuid) -> OpsResult<DrainOperation> {
        let mut rx = self
            .registry
            .subscribe_drain(id)
            .await
            .ok_or_else(|| OpsError::NotFound(format!("Drain operation {} not found", id)))?;
        while !rx.borrow_and_update().is_terminal() {
            rx.changed()
                .await
                .map_err(|_| OpsError::Internal("drain status channel closed".to_string()))?;
        }
        self.drain_status(id).await
    }
}

impl DrainWorker {
    async fn run_drain(&self, id: Uuid, node: String, request: DrainRequest) {
        let vms = match self.inventory.list_vms(&node).await {
            Ok(vms) => vms,
            Err(e) => {
                // Nothing was attempted; this is the one case where the
                // whole operation fails rather than individual guests.
                self.registry
                    .update_drain(id, |d| {
                        d.finish(
                            DrainStatus::Failed,
                            Some(format!("could not enumerate guests: {}", e)),
                        )
                    })
                    .await;
                self.registry.release_node(&node).await;
                return;
            }
        };

        let tolerant_tag = self.config.maintenance_tolerant_tag.clone();
        let options = MigrationOptions {
            with_local_disks: request.mode == DrainMode::Hard,
            bandwidth_mbps: None,
        };
        let jobs: Vec<DrainJob> = vms
            .into_iter()
            .filter(|vm| request.mode == DrainMode::Hard || !vm.has_tag(&tolerant_tag))
            .map(|vm| DrainJob {
                vm,
                fixed_target: request.target_node.clone(),
                options: options.clone(),
            })
            .collect();

        let allow_offline = request.mode == DrainMode::Hard || request.allow_offline;
        let max_concurrent = if request.parallel {
            request
                .max_concurrent
                .unwrap_or(self.config.default_max_concurrent)
                .max(1)
        } else {
            1
        };
        let exclude = HashSet::from([node.clone()]);

        self.run_batch(id, &node, jobs, allow_offline, max_concurrent, exclude)
            .await;
    }

    async fn run_undrain(&self, id: Uuid, node: String, source: DrainOperation) {
        // Only guests the drain actually moved, and that are still on
        // their recorded target, come back.
        let mut residents: HashMap<String, Vec<VmListItem>> = HashMap::new();
        let mut jobs = Vec::new();
        for entry in source
            .vms
            .iter()
            .filter(|e| e.status == VmDrainOutcome::Completed)
        {
            let Some(target) = entry.target_node.clone() else {
                continue;
            };
            if !residents.contains_key(&target) {
                match self.inventory.list_vms(&target).await {
                    Ok(vms) => {
                        residents.insert(target.clone(), vms);
                    }
                    Err(e) => {
                        warn!(node = %target, error = %e, "skipping unreachable node in undrain");
                        residents.insert(target.clone(), Vec::new());
                    }
                }
            }
            let still_there = residents[&target].iter().find(|vm| vm.vmid == entry.vmid);
            if let Some(vm) = still_there {
                // A hard drain may have copied local disks to the
                // target; the reverse leg needs the same treatment, so
                // classify the guest's disks where they are now.
                let with_local_disks = match self.inventory.vm_disks(&target, vm.vmid).await {
                    Ok(disks) => disks.iter().any(|d| {
                        StorageClass::classify(&d.backend, &self.config.local_storage_patterns)
                            .is_local()
                    }),
                    Err(e) => {
                        warn!(vmid = vm.vmid, node = %target, error = %e,
                            "could not inspect disks for undrain, assuming shared storage");
                        false
                    }
                };
                jobs.push(DrainJob {
                    vm: vm.clone(),
                    fixed_target: Some(node.clone()),
                    options: MigrationOptions {
                        with_local_disks,
                        bandwidth_mbps: None,
                    },
                });
            }
        }

        self.run_batch(
            id,
            &node,
            jobs,
            false,
            self.config.default_max_concurrent,
            HashSet::new(),
        )
        .await;
    }

    /// Shared execution path for drain and undrain: fans the jobs out
    /// under a bounded semaphore and settles the aggregate record.
    async fn run_batch(
        &self,
        id: Uuid,
        guard_node: &str,
        jobs: Vec<DrainJob>,
        allow_offline: bool,
        max_concurrent: usize,
        exclude: HashSet<String>,
    ) {
        self.registry
            .update_drain(id, |d| {
                d.status = DrainStatus::InProgress;
                d.total_vms = jobs.len() as u32;
                d.vms = jobs
                    .iter()
                    .map(|job| VmDrainStatus {
                        vmid: job.vm.vmid,
                        name: job.vm.name.clone(),
                        status: VmDrainOutcome::Pending,
                        target_node: job.fixed_target.clone(),
                        error: None,
                        migration_id: None,
                    })
                    .collect();
            })
            .await;

        if jobs.is_empty() {
            self.registry
                .update_drain(id, |d| d.finish(DrainStatus::Completed, None))
                .await;
            self.registry.release_node(guard_node).await;
            return;
        }

        let total = jobs.len();
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let mut join_set = JoinSet::new();
        for job in jobs {
            let worker = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let exclude = exclude.clone();
            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    // The semaphore lives as long as the batch; treat a
                    // closed one as an attempted, failed migration.
                    return VmAttempt::Attempted;
                };
                worker.migrate_one(id, job, allow_offline, exclude).await
            });
        }
        let mut no_target = 0usize;
        while let Some(joined) = join_set.join_next().await {
            if matches!(joined, Ok(VmAttempt::NoTarget)) {
                no_target += 1;
            }
        }

        if no_target == total {
            // The cluster had no room for a single guest; surface that
            // as a failure of the whole operation, not a completion.
            self.registry
                .update_drain(id, |d| {
                    d.finish(
                        DrainStatus::Failed,
                        Some("no feasible migration target for any guest".to_string()),
                    )
                })
                .await;
        } else {
            self.registry
                .update_drain(id, |d| d.finish(DrainStatus::Completed, None))
                .await;
        }
        self.registry.release_node(guard_node).await;
    }

    async fn migrate_one(
        &self,
        drain_id: Uuid,
        job: DrainJob,
        allow_offline: bool,
        exclude: HashSet<String>,
    ) -> VmAttempt {
        let vmid = job.vm.vmid;
        self.registry
            .update_drain(drain_id, |d| {
                if let Some(entry) = d.vms.iter_mut().find(|e| e.vmid == vmid) {
                    entry.status = VmDrainOutcome::Migrating;
                }
            })
            .await;

        let target = match job.fixed_target {
            Some(target) => target,
            None => {
                match self
                    .placement
                    .recommend_excluding(&job.vm.requirements(), &exclude)
                    .await
                {
                    Ok(Some(recommendation)) => recommendation.recommended_node,
                    Ok(None) => {
                        self.settle(
                            drain_id,
                            vmid,
                            VmDrainOutcome::Failed,
                            Some("no node can accommodate the guest's resources".to_string()),
                        )
                        .await;
                        return VmAttempt::NoTarget;
                    }
                    Err(e) => {
                        self.settle(drain_id, vmid, VmDrainOutcome::Failed, Some(e.to_string()))
                            .await;
                        return VmAttempt::Attempted;
                    }
                }
            }
        };

        let request = MigrateRequest {
            target_node: target.clone(),
            allow_offline_migration: allow_offline,
            initiated_by: format!("drain:{}", drain_id),
            options: job.options,
        };
        match self.migration.start(vmid, request).await {
            Ok(started) => {
                self.registry
                    .update_drain(drain_id, |d| {
                        if let Some(entry) = d.vms.iter_mut().find(|e| e.vmid == vmid) {
                            entry.migration_id = Some(started.migration_id);
                            entry.target_node = Some(target.clone());
                        }
                    })
                    .await;
                match self.migration.wait_for_terminal(started.migration_id).await {
                    Ok(settled) if settled.status == MigrationStatus::Completed => {
                        self.settle(drain_id, vmid, VmDrainOutcome::Completed, None)
                            .await;
                    }
                    Ok(settled) => {
                        self.settle(drain_id, vmid, VmDrainOutcome::Failed, settled.error_message)
                            .await;
                    }
                    Err(e) => {
                        self.settle(drain_id, vmid, VmDrainOutcome::Failed, Some(e.to_string()))
                            .await;
                    }
                }
            }
            Err(e) => {
                self.settle(drain_id, vmid, VmDrainOutcome::Failed, Some(e.to_string()))
                    .await;
            }
        }
        VmAttempt::Attempted
    }

    async fn settle(
        &self,
        drain_id: Uuid,
        vmid: u32,
        outcome: VmDrainOutcome,
        error: Option<String>,
    ) {
        self.registry
            .update_drain(drain_id, |d| d.settle_vm(vmid, outcome, error))
            .await;
    }
}
