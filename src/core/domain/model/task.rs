//! Remote task handle and poll result for control-plane operations.

use serde::{Deserialize, Serialize};

/// Handle to an asynchronous task running on the control plane
/// (a UPID in Proxmox terms). The owning node is kept alongside the id
/// because task status is a per-node endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TaskHandle {
    /// Opaque task identifier issued at submission.
    pub upid: String,
    /// Node the task runs on.
    pub node: String,
}

/// Outcome of polling a remote task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum TaskState {
    /// Still running; poll again later.
    Running,
    /// Finished successfully.
    Ok,
    /// Finished with an error; detail is the remote exit status.
    Error { detail: String },
}
