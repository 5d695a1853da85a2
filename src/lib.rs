mod config;
mod core;
mod ops;

#[cfg(test)]
mod tests;

use std::sync::Arc;

pub use crate::config::{OpsConfig, Overcommit, PlacementWeights};
pub use crate::core::domain::error::{OpsError, OpsResult, ValidationError};
pub use crate::core::domain::model::drain::{
    DrainKind, DrainOperation, DrainStatus, VmDrainOutcome, VmDrainStatus,
};
pub use crate::core::domain::model::maintenance::MaintenanceRecord;
pub use crate::core::domain::model::migration::{
    Migration, MigrationCheck, MigrationOptions, MigrationStarted, MigrationStatus, MigrationType,
};
pub use crate::core::domain::model::node::NodeListItem;
pub use crate::core::domain::model::placement::{
    FitScores, PlacementAlternative, PlacementRecommendation,
};
pub use crate::core::domain::model::resources::{
    ClusterCapacity, NodeCapacity, ResourceDimension, ResourceRequirements, ResourceSnapshot,
    VmCapacity,
};
pub use crate::core::domain::model::task::{TaskHandle, TaskState};
pub use crate::core::domain::model::vm::{VmDisk, VmListItem};
pub use crate::core::domain::value_object::{NodeName, StorageClass, ValueObject, VmId};
pub use crate::core::infrastructure::api_client::{ApiClient, ApiClientBuilder, RateLimitConfig};
pub use crate::core::infrastructure::cluster_api::{Inventory, MigrationExecutor};
pub use crate::core::infrastructure::registry::OperationRegistry;
pub use crate::ops::application::request::drain_request::{DrainMode, DrainRequest};
pub use crate::ops::application::request::maintenance_request::{
    EnterMaintenanceRequest, ExitMaintenanceRequest,
};
pub use crate::ops::application::request::migrate_request::MigrateRequest;
pub use crate::ops::application::service::capacity_service::CapacityService;
pub use crate::ops::application::service::drain_service::DrainService;
pub use crate::ops::application::service::maintenance_service::MaintenanceService;
pub use crate::ops::application::service::migration_service::MigrationService;
pub use crate::ops::application::service::placement_service::PlacementService;

/// A client for node-lifecycle orchestration on a Proxmox VE cluster
///
/// This client wires the orchestration services around one shared
/// operation registry:
/// - Capacity reports and placement recommendations
/// - Single-VM migrations with async tracking
/// - Node drain/undrain and maintenance windows
///
/// # Examples
///
/// ```no_run
/// use virtshift::{DrainRequest, OpsResult, VirtshiftClient};
///
/// #[tokio::main]
/// async fn main() -> OpsResult<()> {
///     let client = VirtshiftClient::builder()
///         .host("proxmox.example.com")
///         .port(8006)
///         .token("ops@pam!orchestrator=secret")
///         .build()?;
///
///     let accepted = client.drain().begin_drain("pve3", DrainRequest::default()).await?;
///     let settled = client.drain().wait_for_terminal(accepted.id).await?;
///     println!("drained {} guests", settled.completed_vms);
///     Ok(())
/// }
/// ```
pub struct VirtshiftClient {
    capacity: Arc<CapacityService>,
    placement: Arc<PlacementService>,
    migration: Arc<MigrationService>,
    drain: Arc<DrainService>,
    maintenance: Arc<MaintenanceService>,
    registry: Arc<OperationRegistry>,
}

/// Builder for [`VirtshiftClient`] configuration.
///
/// Connection parameters build one HTTP client serving both the
/// inventory and the migration executor. Tests and embedders can
/// instead inject their own implementations of either port.
pub struct VirtshiftClientBuilder {
    host: Option<String>,
    port: Option<u16>,
    token: Option<String>,
    secure: bool,
    accept_invalid_certs: bool,
    rate_limit: Option<RateLimitConfig>,
    config: OpsConfig,
    inventory: Option<Arc<dyn Inventory>>,
    executor: Option<Arc<dyn MigrationExecutor>>,
}

impl Default for VirtshiftClientBuilder {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            token: None,
            secure: true,
            accept_invalid_certs: false,
            rate_limit: None,
            config: OpsConfig::default(),
            inventory: None,
            executor: None,
        }
    }
}

impl VirtshiftClientBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// API token in `user@realm!tokenid=secret` form.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Orchestration policy; defaults are tuned for a single cluster.
    pub fn config(mut self, config: OpsConfig) -> Self {
        self.config = config;
        self
    }

    /// Injects a custom inventory implementation.
    pub fn inventory(mut self, inventory: Arc<dyn Inventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    /// Injects a custom migration executor implementation.
    pub fn executor(mut self, executor: Arc<dyn MigrationExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Builds the client and wires the services.
    ///
    /// # Errors
    /// Returns `OpsError::Validation` when connection parameters are
    /// needed but missing or malformed.
    pub fn build(self) -> OpsResult<VirtshiftClient> {
        let (inventory, executor): (Arc<dyn Inventory>, Arc<dyn MigrationExecutor>) =
            match (self.inventory, self.executor) {
                (Some(inventory), Some(executor)) => (inventory, executor),
                (inventory, executor) => {
                    let mut builder = ApiClient::builder()
                        .secure(self.secure)
                        .accept_invalid_certs(self.accept_invalid_certs);
                    if let Some(host) = self.host {
                        builder = builder.host(host);
                    }
                    if let Some(port) = self.port {
                        builder = builder.port(port);
                    }
                    if let Some(token) = self.token {
                        builder = builder.token(token);
                    }
                    if let Some(rate_limit) = self.rate_limit {
                        builder = builder.rate_limit(rate_limit);
                    }
                    let api = Arc::new(builder.build()?);
                    let api_inventory: Arc<dyn Inventory> = api.clone();
                    let api_executor: Arc<dyn MigrationExecutor> = api;
                    (
                        inventory.unwrap_or(api_inventory),
                        executor.unwrap_or(api_executor),
                    )
                }
            };

        let registry = Arc::new(OperationRegistry::new());
        let capacity = Arc::new(CapacityService::new(
            Arc::clone(&inventory),
            self.config.clone(),
        ));
        let placement = Arc::new(PlacementService::new(
            Arc::clone(&capacity),
            Arc::clone(&registry),
            self.config.clone(),
        ));
        let migration = Arc::new(MigrationService::new(
            Arc::clone(&inventory),
            Arc::clone(&executor),
            Arc::clone(&registry),
            self.config.clone(),
        ));
        let drain = Arc::new(DrainService::new(
            Arc::clone(&inventory),
            Arc::clone(&placement),
            Arc::clone(&migration),
            Arc::clone(&registry),
            self.config.clone(),
        ));
        let maintenance = Arc::new(MaintenanceService::new(
            inventory,
            Arc::clone(&drain),
            Arc::clone(&registry),
        ));

        Ok(VirtshiftClient {
            capacity,
            placement,
            migration,
            drain,
            maintenance,
            registry,
        })
    }
}

impl VirtshiftClient {
    pub fn builder() -> VirtshiftClientBuilder {
        VirtshiftClientBuilder::default()
    }

    pub fn capacity(&self) -> &CapacityService {
        &self.capacity
    }

    pub fn placement(&self) -> &PlacementService {
        &self.placement
    }

    pub fn migration(&self) -> &MigrationService {
        &self.migration
    }

    pub fn drain(&self) -> &DrainService {
        &self.drain
    }

    pub fn maintenance(&self) -> &MaintenanceService {
        &self.maintenance
    }

    /// The shared operation registry, for embedders that want raw
    /// record access.
    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }
}
