use thiserror::Error;

/// The main error type for cluster orchestration operations.
///
/// This enum represents all failure classes a caller can observe:
/// synchronous rejections (validation, conflicts, missing entities,
/// unmet preconditions) and infrastructure failures (provider
/// unreachable, unexpected API responses).
///
/// Partial failure of a bulk operation is deliberately *not* an error:
/// a drain that moved some VMs and lost others completes with the
/// per-VM failures recorded on the [`DrainOperation`] itself.
///
/// [`DrainOperation`]: crate::DrainOperation
#[derive(Error, Debug)]
pub enum OpsError {
    /// Malformed or missing input, rejected before any record is created.
    #[error("Validation error: {source}")]
    Validation {
        #[from]
        source: ValidationError,
    },

    /// The requested state transition collides with current state
    /// (node already draining, maintenance flag already set, VM
    /// already mid-migration).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unknown node, VM, migration or drain operation id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation is well-formed but cannot run against the current
    /// cluster state. Carries a remediation hint for the caller.
    #[error("Precondition failed: {reason} ({remediation})")]
    PreconditionFailed { reason: String, remediation: String },

    /// The capacity/inventory/task API could not be reached.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The control plane answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invariant violations and other bugs on our side.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OpsError {
    /// Builds a precondition error with its remediation hint.
    pub fn precondition(reason: impl Into<String>, remediation: impl Into<String>) -> Self {
        OpsError::PreconditionFailed {
            reason: reason.into(),
            remediation: remediation.into(),
        }
    }
}

/// Specialized error type for validation failures.
///
/// Provides detailed context about why a validation failed, including
/// field-specific errors and format violations.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// A validation failure for a specific field.
    #[error("Field '{field}' validation failed: {message}")]
    Field { field: String, message: String },

    /// Format/syntax validation failures.
    #[error("Format error: {0}")]
    Format(String),

    /// Violations of domain constraints.
    #[error("Domain constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Type alias for Results that may fail with an OpsError.
pub type OpsResult<T> = Result<T, OpsError>;
