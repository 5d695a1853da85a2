pub mod drain_request;
pub mod maintenance_request;
pub mod migrate_request;
