//! In-memory registry of long-running operations.
//!
//! The registry owns every migration, drain and maintenance record and
//! the exclusivity guards around them. Services hold it behind an
//! `Arc` and never keep operation state of their own, so a record
//! looked up by id is always the same record the poll loops mutate.

use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, RwLock, watch};
use uuid::Uuid;

use crate::core::domain::model::drain::{DrainOperation, DrainStatus};
use crate::core::domain::model::maintenance::MaintenanceRecord;
use crate::core::domain::model::migration::{Migration, MigrationStatus};

#[derive(Debug, Default)]
pub struct OperationRegistry {
    migrations: RwLock<HashMap<Uuid, Migration>>,
    migration_watch: RwLock<HashMap<Uuid, watch::Sender<MigrationStatus>>>,
    drains: RwLock<HashMap<Uuid, DrainOperation>>,
    drain_watch: RwLock<HashMap<Uuid, watch::Sender<DrainStatus>>>,
    /// Nodes with a drain or undrain in flight.
    draining_nodes: Mutex<HashSet<String>>,
    /// Guests with a migration in flight.
    migrating_vms: Mutex<HashSet<u32>>,
    maintenance: RwLock<HashMap<String, MaintenanceRecord>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // --- migrations -----------------------------------------------------

    /// Claims the per-VM migration guard. Returns `false` when another
    /// migration already holds it.
    pub async fn try_claim_vm(&self, vmid: u32) -> bool {
        self.migrating_vms.lock().await.insert(vmid)
    }

    /// Releases the per-VM guard without touching the record; used when
    /// submission fails before a poll loop exists.
    pub async fn release_vm(&self, vmid: u32) {
        self.migrating_vms.lock().await.remove(&vmid);
    }

    /// Whether a migration for this guest is currently in flight.
    pub async fn vm_migrating(&self, vmid: u32) -> bool {
        self.migrating_vms.lock().await.contains(&vmid)
    }

    /// Stores a fresh migration record and opens its status channel.
    pub async fn insert_migration(&self, migration: Migration) {
        let (tx, _rx) = watch::channel(migration.status);
        self.migration_watch
            .write()
            .await
            .insert(migration.id, tx);
        self.migrations
            .write()
            .await
            .insert(migration.id, migration);
    }

    pub async fn migration(&self, id: Uuid) -> Option<Migration> {
        self.migrations.read().await.get(&id).cloned()
    }

    /// All migration records, newest first.
    pub async fn list_migrations(&self) -> Vec<Migration> {
        let mut records: Vec<Migration> = self.migrations.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records
    }

    /// Mutates one migration record under the registry lock.
    pub async fn update_migration<F>(&self, id: Uuid, mutate: F) -> Option<Migration>
    where
        F: FnOnce(&mut Migration),
    {
        let mut migrations = self.migrations.write().await;
        migrations.get_mut(&id).map(|migration| {
            mutate(migration);
            migration.clone()
        })
    }

    /// Moves a migration to `Running` and notifies subscribers.
    pub async fn mark_migration_running(&self, id: Uuid) {
        let mut migrations = self.migrations.write().await;
        if let Some(migration) = migrations.get_mut(&id) {
            migration.status = MigrationStatus::Running;
        }
        drop(migrations);
        self.notify_migration(id, MigrationStatus::Running).await;
    }

    /// Moves a migration to a terminal state, releases the per-VM guard
    /// and notifies subscribers. Returns the settled record.
    pub async fn finish_migration(
        &self,
        id: Uuid,
        status: MigrationStatus,
        error: Option<String>,
    ) -> Option<Migration> {
        let settled = {
            let mut migrations = self.migrations.write().await;
            migrations.get_mut(&id).map(|migration| {
                migration.finish(status, error);
                migration.clone()
            })
        };
        if let Some(migration) = &settled {
            self.release_vm(migration.vmid).await;
            self.notify_migration(id, status).await;
        }
        settled
    }

    /// Subscribes to status changes of one migration. The receiver's
    /// current value is the status at subscription time.
    pub async fn subscribe_migration(&self, id: Uuid) -> Option<watch::Receiver<MigrationStatus>> {
        self.migration_watch
            .read()
            .await
            .get(&id)
            .map(|tx| tx.subscribe())
    }

    async fn notify_migration(&self, id: Uuid, status: MigrationStatus) {
        if let Some(tx) = self.migration_watch.read().await.get(&id) {
            // Lagging receivers only ever need the latest value.
            let _ = tx.send(status);
        }
    }

    // --- drains ---------------------------------------------------------

    /// Claims the per-node drain guard. Returns `false` when the node
    /// already has a drain or undrain in flight.
    pub async fn try_claim_node(&self, node: &str) -> bool {
        self.draining_nodes.lock().await.insert(node.to_string())
    }

    pub async fn release_node(&self, node: &str) {
        self.draining_nodes.lock().await.remove(node);
    }

    pub async fn insert_drain(&self, drain: DrainOperation) {
        let (tx, _rx) = watch::channel(drain.status);
        self.drain_watch.write().await.insert(drain.id, tx);
        self.drains.write().await.insert(drain.id, drain);
    }

    pub async fn drain(&self, id: Uuid) -> Option<DrainOperation> {
        self.drains.read().await.get(&id).cloned()
    }

    /// Mutates one drain record under the registry lock and notifies
    /// subscribers of its (possibly unchanged) status afterwards.
    pub async fn update_drain<F>(&self, id: Uuid, mutate: F) -> Option<DrainOperation>
    where
        F: FnOnce(&mut DrainOperation),
    {
        let updated = {
            let mut drains = self.drains.write().await;
            drains.get_mut(&id).map(|drain| {
                mutate(drain);
                drain.clone()
            })
        };
        if let Some(drain) = &updated {
            if let Some(tx) = self.drain_watch.read().await.get(&id) {
                let _ = tx.send(drain.status);
            }
        }
        updated
    }

    pub async fn subscribe_drain(&self, id: Uuid) -> Option<watch::Receiver<DrainStatus>> {
        self.drain_watch
            .read()
            .await
            .get(&id)
            .map(|tx| tx.subscribe())
    }

    /// The most recent completed drain of a node, used to reverse it.
    pub async fn last_completed_drain(&self, node: &str) -> Option<DrainOperation> {
        use crate::core::domain::model::drain::DrainKind;
        self.drains
            .read()
            .await
            .values()
            .filter(|d| {
                d.node == node && d.kind == DrainKind::Drain && d.status == DrainStatus::Completed
            })
            .max_by_key(|d| d.started_at)
            .cloned()
    }

    // --- maintenance ----------------------------------------------------

    pub async fn maintenance(&self, node: &str) -> Option<MaintenanceRecord> {
        self.maintenance.read().await.get(node).cloned()
    }

    pub async fn in_maintenance(&self, node: &str) -> bool {
        self.maintenance
            .read()
            .await
            .get(node)
            .map(|record| record.in_maintenance)
            .unwrap_or(false)
    }

    /// Nodes currently flagged for maintenance; placement excludes them.
    pub async fn nodes_in_maintenance(&self) -> HashSet<String> {
        self.maintenance
            .read()
            .await
            .values()
            .filter(|record| record.in_maintenance)
            .map(|record| record.node.clone())
            .collect()
    }

    pub async fn set_maintenance(&self, record: MaintenanceRecord) {
        self.maintenance
            .write()
            .await
            .insert(record.node.clone(), record);
    }

    pub async fn update_maintenance<F>(&self, node: &str, mutate: F) -> Option<MaintenanceRecord>
    where
        F: FnOnce(&mut MaintenanceRecord),
    {
        let mut records = self.maintenance.write().await;
        records.get_mut(node).map(|record| {
            mutate(record);
            record.clone()
        })
    }
}
