//! Domain models for virtual machines and their disks.

use serde::{Deserialize, Serialize};

use crate::core::domain::model::resources::ResourceRequirements;

/// A virtual machine as returned by the per-node guest listing.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VmListItem {
    /// The VM identifier (unique per cluster).
    pub vmid: u32,
    /// Human-readable name.
    pub name: String,
    /// Current status (e.g., "running", "stopped").
    pub status: String,
    /// The node where this VM resides.
    pub node: String,
    /// Allocated virtual CPU count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxcpu: Option<u32>,
    /// Allocated memory in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxmem: Option<u64>,
    /// Allocated disk space in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxdisk: Option<u64>,
    /// CPU usage fraction (0.0 to 1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    /// Memory usage in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem: Option<u64>,
    /// Semicolon-separated tag list (if any).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

impl VmListItem {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    /// Whether the VM carries the given tag. Tags are a
    /// semicolon-separated list on the wire.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags
            .as_deref()
            .map(|tags| tags.split(';').any(|t| t.trim() == tag))
            .unwrap_or(false)
    }

    /// Resource footprint of this VM, used to find it a new home.
    pub fn requirements(&self) -> ResourceRequirements {
        ResourceRequirements {
            cpu_cores: self.maxcpu.unwrap_or(1),
            memory_bytes: self.maxmem.unwrap_or(0),
            storage_bytes: self.maxdisk.unwrap_or(0),
            ..ResourceRequirements::default()
        }
    }
}

/// A single VM disk, resolved from the VM configuration.
///
/// `backend` is the storage id part of the volume reference
/// (`local-lvm:vm-102-disk-0` -> `local-lvm`); locality classification
/// happens in the value-object layer, never by ad hoc string checks.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VmDisk {
    /// Configuration key (e.g., "scsi0", "virtio1").
    pub key: String,
    /// Full volume reference as stored in the VM config.
    pub volume: String,
    /// Storage backend id the volume lives on.
    pub backend: String,
}

impl VmDisk {
    /// Parses a disk entry from a config key/value pair. Returns `None`
    /// for entries that are not block devices (e.g., CD-ROM drives).
    pub fn parse(key: &str, value: &str) -> Option<Self> {
        if value.contains("media=cdrom") || value.starts_with("none") {
            return None;
        }
        let volume = value.split(',').next()?.trim();
        let backend = volume.split(':').next()?.trim();
        if backend.is_empty() {
            return None;
        }
        Some(Self {
            key: key.to_string(),
            volume: volume.to_string(),
            backend: backend.to_string(),
        })
    }
}
