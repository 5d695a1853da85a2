pub mod capacity_service;
pub mod drain_service;
pub mod maintenance_service;
pub mod migration_service;
pub mod placement_service;
