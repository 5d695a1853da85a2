pub mod drain;
pub mod maintenance;
pub mod migration;
pub mod node;
pub mod placement;
pub mod resources;
pub mod task;
pub mod vm;
