use crate::core::domain::error::ValidationError;

/// Range of guest ids the control plane accepts.
const VMID_MIN: u32 = 100;
const VMID_MAX: u32 = 999_999_999;

/// A validated guest identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VmId(u32);

impl VmId {
    /// Creates a new validated id.
    pub fn new(vmid: u32) -> Result<Self, ValidationError> {
        validate_vmid(vmid)?;
        Ok(Self(vmid))
    }

    /// Returns the numeric id.
    pub fn get(&self) -> u32 {
        self.0
    }
}

/// Validates a guest id against the control plane's accepted range.
pub(crate) fn validate_vmid(vmid: u32) -> Result<(), ValidationError> {
    if !(VMID_MIN..=VMID_MAX).contains(&vmid) {
        return Err(ValidationError::Field {
            field: "vmid".to_string(),
            message: format!("VM id must be between {} and {}", VMID_MIN, VMID_MAX),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_vmid_valid() {
        assert!(validate_vmid(100).is_ok());
        assert!(validate_vmid(101).is_ok());
        assert!(validate_vmid(999_999_999).is_ok());
    }

    #[test]
    fn test_validate_vmid_invalid() {
        assert!(validate_vmid(0).is_err());
        assert!(validate_vmid(99).is_err());
        assert!(validate_vmid(1_000_000_000).is_err());
    }

    #[test]
    fn test_vmid_new_exposes_the_value() {
        let vmid = VmId::new(101).unwrap();
        assert_eq!(vmid.get(), 101);
    }
}
