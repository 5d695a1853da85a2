pub mod base_value_object;
pub mod node_name;
pub mod storage_class;
pub mod vm_id;

pub use base_value_object::ValueObject;
pub use node_name::NodeName;
pub use storage_class::StorageClass;
pub use vm_id::VmId;
