use crate::core::domain::{
    error::{OpsResult, ValidationError},
    value_object::base_value_object::ValueObject,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Represents the configuration for a node name value object
#[derive(Debug, Clone)]
pub struct NodeNameConfig {
    max_name_length: usize,
    max_label_length: usize,
}

impl NodeNameConfig {
    fn validate_label(&self, label: &str) -> Result<(), ValidationError> {
        if label.is_empty() || label.len() > self.max_label_length {
            return Err(ValidationError::Format(format!(
                "Label must be between 1 and {} characters",
                self.max_label_length
            )));
        }

        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ValidationError::Format(
                "Label can only contain alphanumeric characters and hyphens".to_string(),
            ));
        }

        if label.starts_with('-') || label.ends_with('-') {
            return Err(ValidationError::Format(
                "Label cannot start or end with hyphen".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for NodeNameConfig {
    fn default() -> Self {
        Self {
            max_name_length: 253,
            max_label_length: 63,
        }
    }
}

/// Represents a validated cluster node name
///
/// This value object encapsulates a node name and ensures it meets
/// RFC 1035 label requirements. No resolution is attempted; a node
/// name only has to be well-formed, existence is checked against
/// inventory at use time.
#[derive(Debug, Clone)]
pub struct NodeName {
    value: Arc<RwLock<String>>,
}

impl NodeName {
    /// Creates a new NodeName instance with validation
    ///
    /// # Returns
    ///
    /// * `Ok(NodeName)` if validation succeeds
    /// * `Err(OpsError)` if validation fails
    pub async fn new(name: String) -> OpsResult<Self> {
        <Self as ValueObject>::new(name).await
    }
}

#[async_trait]
impl ValueObject for NodeName {
    type Value = String;
    type ValidationConfig = NodeNameConfig;

    fn value(&self) -> &Arc<RwLock<Self::Value>> {
        &self.value
    }

    fn validation_config() -> Self::ValidationConfig {
        NodeNameConfig::default()
    }

    async fn validate(
        value: &Self::Value,
        config: &Self::ValidationConfig,
    ) -> Result<(), ValidationError> {
        if value.is_empty() {
            return Err(ValidationError::Field {
                field: "node".to_string(),
                message: "Node name cannot be empty".to_string(),
            });
        }

        if value.len() > config.max_name_length {
            return Err(ValidationError::ConstraintViolation(format!(
                "Node name length exceeds maximum of {} characters",
                config.max_name_length
            )));
        }

        for label in value.split('.') {
            config.validate_label(label)?;
        }

        Ok(())
    }

    fn create(value: Self::Value) -> Self {
        Self {
            value: Arc::new(RwLock::new(value)),
        }
    }
}
