use serde::{Deserialize, Serialize};

use crate::ops::application::request::drain_request::DrainRequest;

/// Caller's intent when putting a node into maintenance.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EnterMaintenanceRequest {
    /// Operator-supplied reason, kept on the record for audit.
    pub reason: Option<String>,
    /// Drain the node as part of entering maintenance.
    pub drain: bool,
    /// How to drain, when `drain` is set.
    pub drain_request: DrainRequest,
}

/// Caller's intent when taking a node out of maintenance.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExitMaintenanceRequest {
    /// Move previously drained guests back to the node.
    pub undrain: bool,
}
