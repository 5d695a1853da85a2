use crate::core::domain::error::{OpsError, OpsResult, ValidationError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Common shape of validated domain values.
///
/// Inputs that cross the service boundary (node names, guest ids) are
/// wrapped in a value object so malformed requests are rejected before
/// any cluster call or record creation happens. Validation rules live
/// next to the type, parameterized by a config so limits are not
/// scattered through the services.
#[async_trait]
pub trait ValueObject: Send + Sync + 'static {
    /// The wrapped raw value.
    type Value: Send + Sync + Clone;

    /// Rule parameters for [`validate`](Self::validate).
    type ValidationConfig: Send + Sync;

    fn value(&self) -> &Arc<RwLock<Self::Value>>;

    fn validation_config() -> Self::ValidationConfig;

    /// Checks the raw value against the domain rules.
    async fn validate(
        value: &Self::Value,
        config: &Self::ValidationConfig,
    ) -> Result<(), ValidationError>;

    /// Clones the wrapped value out.
    async fn as_inner(&self) -> Self::Value {
        self.value().read().await.clone()
    }

    /// Wraps a value without validating it. Reserved for values that
    /// were already validated or come from trusted inventory data.
    fn create(value: Self::Value) -> Self;

    /// Validates and wraps a value.
    ///
    /// # Errors
    /// Returns `OpsError::Validation` when the value breaks a rule.
    async fn new(value: Self::Value) -> OpsResult<Self>
    where
        Self: Sized,
    {
        let config = Self::validation_config();
        Self::validate(&value, &config)
            .await
            .map_err(OpsError::from)?;
        Ok(Self::create(value))
    }
}
