//! Control-plane ports and their HTTP adapter.
//!
//! Services depend on the [`Inventory`] and [`MigrationExecutor`]
//! traits, never on [`ApiClient`] directly, so tests can substitute
//! mocks and fakes for the cluster.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::domain::error::OpsResult;
use crate::core::domain::model::migration::MigrationOptions;
use crate::core::domain::model::node::NodeListItem;
use crate::core::domain::model::task::{TaskHandle, TaskState};
use crate::core::domain::model::vm::{VmDisk, VmListItem};
use crate::core::infrastructure::api_client::ApiClient;

/// Read-only view of cluster state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Lists every node known to the cluster.
    async fn list_nodes(&self) -> OpsResult<Vec<NodeListItem>>;

    /// Lists the guests resident on one node.
    async fn list_vms(&self, node: &str) -> OpsResult<Vec<VmListItem>>;

    /// Resolves the block devices attached to one guest.
    async fn vm_disks(&self, node: &str, vmid: u32) -> OpsResult<Vec<VmDisk>>;
}

/// Write side of the control plane: submitting migrations and polling
/// the tasks they spawn.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MigrationExecutor: Send + Sync {
    /// Submits a migration and returns the remote task handle.
    async fn submit_migration(
        &self,
        vmid: u32,
        source: &str,
        target: &str,
        online: bool,
        options: &MigrationOptions,
    ) -> OpsResult<TaskHandle>;

    /// Polls the current state of a remote task.
    async fn task_state(&self, task: &TaskHandle) -> OpsResult<TaskState>;
}

/// Guest record as the per-node listing returns it; the listing does
/// not repeat the node, so the adapter injects it.
#[derive(Debug, Deserialize)]
struct QemuRecord {
    vmid: u32,
    name: Option<String>,
    status: String,
    maxcpu: Option<u32>,
    maxmem: Option<u64>,
    maxdisk: Option<u64>,
    cpu: Option<f64>,
    mem: Option<u64>,
    tags: Option<String>,
}

impl QemuRecord {
    fn into_vm(self, node: &str) -> VmListItem {
        VmListItem {
            vmid: self.vmid,
            name: self.name.unwrap_or_else(|| format!("vm-{}", self.vmid)),
            status: self.status,
            node: node.to_string(),
            maxcpu: self.maxcpu,
            maxmem: self.maxmem,
            maxdisk: self.maxdisk,
            cpu: self.cpu,
            mem: self.mem,
            tags: self.tags,
        }
    }
}

#[derive(Debug, Serialize)]
struct MigrateBody<'a> {
    target: &'a str,
    online: u8,
    #[serde(rename = "with-local-disks", skip_serializing_if = "Option::is_none")]
    with_local_disks: Option<u8>,
    #[serde(rename = "bwlimit", skip_serializing_if = "Option::is_none")]
    bandwidth_mbps: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TaskStatusRecord {
    status: String,
    exitstatus: Option<String>,
}

impl TaskStatusRecord {
    fn into_state(self) -> TaskState {
        if self.status != "stopped" {
            return TaskState::Running;
        }
        match self.exitstatus.as_deref() {
            Some("OK") => TaskState::Ok,
            Some(detail) => TaskState::Error {
                detail: detail.to_string(),
            },
            None => TaskState::Error {
                detail: "task stopped without exit status".to_string(),
            },
        }
    }
}

/// Configuration keys that describe block devices.
fn is_disk_key(key: &str) -> bool {
    for prefix in ["scsi", "virtio", "ide", "sata"] {
        if let Some(index) = key.strip_prefix(prefix) {
            if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) {
                return true;
            }
        }
    }
    matches!(key, "efidisk0" | "tpmstate0")
}

#[async_trait]
impl Inventory for ApiClient {
    async fn list_nodes(&self) -> OpsResult<Vec<NodeListItem>> {
        self.get("nodes").await
    }

    async fn list_vms(&self, node: &str) -> OpsResult<Vec<VmListItem>> {
        let records: Vec<QemuRecord> = self.get(&format!("nodes/{}/qemu", node)).await?;
        Ok(records
            .into_iter()
            .map(|record| record.into_vm(node))
            .collect())
    }

    async fn vm_disks(&self, node: &str, vmid: u32) -> OpsResult<Vec<VmDisk>> {
        // BTreeMap keeps disk order stable across calls.
        let config: BTreeMap<String, serde_json::Value> = self
            .get(&format!("nodes/{}/qemu/{}/config", node, vmid))
            .await?;
        Ok(config
            .iter()
            .filter(|(key, _)| is_disk_key(key))
            .filter_map(|(key, value)| value.as_str().and_then(|v| VmDisk::parse(key, v)))
            .collect())
    }
}

#[async_trait]
impl MigrationExecutor for ApiClient {
    async fn submit_migration(
        &self,
        vmid: u32,
        source: &str,
        target: &str,
        online: bool,
        options: &MigrationOptions,
    ) -> OpsResult<TaskHandle> {
        let body = MigrateBody {
            target,
            online: u8::from(online),
            with_local_disks: options.with_local_disks.then_some(1),
            bandwidth_mbps: options.bandwidth_mbps,
        };
        let upid: String = self
            .post(&format!("nodes/{}/qemu/{}/migrate", source, vmid), &body)
            .await?;
        Ok(TaskHandle {
            upid,
            node: source.to_string(),
        })
    }

    async fn task_state(&self, task: &TaskHandle) -> OpsResult<TaskState> {
        let record: TaskStatusRecord = self
            .get(&format!("nodes/{}/tasks/{}/status", task.node, task.upid))
            .await?;
        Ok(record.into_state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    async fn test_client(server: &MockServer) -> ApiClient {
        let url = Url::parse(&server.uri()).unwrap();
        ApiClient::builder()
            .host(url.host_str().unwrap())
            .port(url.port().unwrap())
            .secure(false)
            .token("ops@pam!orchestrator=secret")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_list_vms_injects_the_node() {
        let mock_server = MockServer::start().await;
        let client = test_client(&mock_server).await;

        Mock::given(method("GET"))
            .and(path("/api2/json/nodes/pve1/qemu"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"vmid": 101, "name": "web-1", "status": "running", "maxcpu": 2},
                    {"vmid": 102, "status": "stopped"}
                ]
            })))
            .mount(&mock_server)
            .await;

        let vms = client.list_vms("pve1").await.unwrap();
        assert_eq!(vms.len(), 2);
        assert_eq!(vms[0].node, "pve1");
        assert_eq!(vms[0].name, "web-1");
        // Unnamed guests get a synthetic name.
        assert_eq!(vms[1].name, "vm-102");
    }

    #[tokio::test]
    async fn test_vm_disks_skips_non_block_entries() {
        let mock_server = MockServer::start().await;
        let client = test_client(&mock_server).await;

        Mock::given(method("GET"))
            .and(path("/api2/json/nodes/pve1/qemu/101/config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "scsi0": "local-lvm:vm-101-disk-0,size=32G",
                    "virtio1": "ceph-pool:vm-101-disk-1,size=8G",
                    "ide2": "local:iso/debian.iso,media=cdrom",
                    "net0": "virtio=AA:BB:CC:DD:EE:FF,bridge=vmbr0",
                    "cores": 2,
                    "memory": 2048
                }
            })))
            .mount(&mock_server)
            .await;

        let disks = client.vm_disks("pve1", 101).await.unwrap();
        assert_eq!(disks.len(), 2);
        assert!(disks.iter().any(|d| d.backend == "local-lvm"));
        assert!(disks.iter().any(|d| d.backend == "ceph-pool"));
    }

    #[tokio::test]
    async fn test_submit_migration_returns_task_handle() {
        let mock_server = MockServer::start().await;
        let client = test_client(&mock_server).await;

        Mock::given(method("POST"))
            .and(path("/api2/json/nodes/pve1/qemu/101/migrate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": "UPID:pve1:0004F2A1:0B3C5D21:65ABCDEF:qmigrate:101:ops@pam:"
            })))
            .mount(&mock_server)
            .await;

        let task = client
            .submit_migration(101, "pve1", "pve2", true, &MigrationOptions::default())
            .await
            .unwrap();
        assert!(task.upid.starts_with("UPID:pve1"));
        assert_eq!(task.node, "pve1");
    }

    #[tokio::test]
    async fn test_task_state_mapping() {
        let mock_server = MockServer::start().await;
        let client = test_client(&mock_server).await;
        let upid = "UPID:pve1:0004F2A1:0B3C5D21:65ABCDEF:qmigrate:101:ops@pam:";

        Mock::given(method("GET"))
            .and(path(format!("/api2/json/nodes/pve1/tasks/{}/status", upid)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"status": "stopped", "exitstatus": "OK"}
            })))
            .mount(&mock_server)
            .await;

        let task = TaskHandle {
            upid: upid.to_string(),
            node: "pve1".to_string(),
        };
        assert_eq!(client.task_state(&task).await.unwrap(), TaskState::Ok);
    }

    #[test]
    fn test_disk_keys() {
        assert!(is_disk_key("scsi0"));
        assert!(is_disk_key("virtio12"));
        assert!(is_disk_key("sata1"));
        assert!(is_disk_key("efidisk0"));
        assert!(!is_disk_key("net0"));
        assert!(!is_disk_key("scsihw"));
        assert!(!is_disk_key("memory"));
    }

    #[test]
    fn test_stopped_task_without_ok_is_an_error() {
        let record = TaskStatusRecord {
            status: "stopped".to_string(),
            exitstatus: Some("migration aborted".to_string()),
        };
        assert_eq!(
            record.into_state(),
            TaskState::Error {
                detail: "migration aborted".to_string()
            }
        );
    }
}
