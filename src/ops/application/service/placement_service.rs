//! Placement engine: ranks nodes for new or displaced workloads.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::config::OpsConfig;
use crate::core::domain::error::{OpsError, OpsResult};
use crate::core::domain::model::placement::{
    FitScores, PlacementAlternative, PlacementRecommendation,
};
use crate::core::domain::model::resources::{
    NodeCapacity, ResourceDimension, ResourceRequirements, ResourceSnapshot, VmCapacity,
};
use crate::core::infrastructure::registry::OperationRegistry;
use crate::ops::application::service::capacity_service::CapacityService;

/// One scored candidate, kept internal to the ranking pass.
struct Candidate {
    node: String,
    fit: FitScores,
    score: f64,
    load: f64,
}

/// Scores and ranks nodes for a resource requirement.
///
/// Recommendations are computed fresh on every call; capacity under a
/// live cluster moves too fast for cached rankings to stay honest.
pub struct PlacementService {
    capacity: Arc<CapacityService>,
    registry: Arc<OperationRegistry>,
    config: OpsConfig,
}

impl PlacementService {
    pub fn new(
        capacity: Arc<CapacityService>,
        registry: Arc<OperationRegistry>,
        config: OpsConfig,
    ) -> Self {
        Self {
            capacity,
            registry,
            config,
        }
    }

    /// Recommends the best node for the given requirements.
    ///
    /// Nodes offline, in maintenance or explicitly excluded never
    /// qualify. When preferred nodes are given and at least one of them
    /// qualifies, the choice is restricted to the preferred set;
    /// otherwise the whole cluster is considered and a warning records
    /// the fallback.
    ///
    /// Returns `Ok(None)` when no node can accommodate the request, so
    /// callers can tell infeasibility apart from failed preconditions
    /// and map it to their own not-found signalling.
    pub async fn recommend(
        &self,
        requirements: &ResourceRequirements,
    ) -> OpsResult<Option<PlacementRecommendation>> {
        let (snapshots, mut warnings) = self.capacity.online_snapshots(true).await?;
        let maintenance = self.registry.nodes_in_maintenance().await;

        if requirements.storage_type.is_some() {
            warnings.push(
                "storage type constraints are not evaluated against node storage pools"
                    .to_string(),
            );
        }

        let mut qualifying: Vec<Candidate> = snapshots
            .iter()
            .filter(|s| !maintenance.contains(&s.node))
            .filter(|s| !requirements.excluded_nodes.contains(&s.node))
            .filter_map(|s| self.score(s, requirements))
            .collect();

        if !requirements.preferred_nodes.is_empty() {
            let preferred: Vec<&Candidate> = qualifying
                .iter()
                .filter(|c| requirements.preferred_nodes.contains(&c.node))
                .collect();
            if preferred.is_empty() {
                warnings.push(
                    "no preferred node can accommodate the request; considering all nodes"
                        .to_string(),
                );
            } else {
                qualifying.retain(|c| requirements.preferred_nodes.contains(&c.node));
            }
        }

        if qualifying.is_empty() {
            debug!("no node qualifies for the requested resources");
            return Ok(None);
        }

        // Highest score wins; ties go to the least loaded node, then
        // the name keeps the order deterministic.
        qualifying.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.load.total_cmp(&b.load))
                .then_with(|| a.node.cmp(&b.node))
        });

        if requirements.high_availability && qualifying.len() < 2 {
            warnings.push(
                "high availability requested but only one node qualifies; no failover headroom"
                    .to_string(),
            );
        }

        let best = &qualifying[0];
        debug!(node = %best.node, score = best.score, "placement recommendation");
        let alternatives = qualifying
            .iter()
            .skip(1)
            .take(self.config.max_alternatives)
            .map(|c| PlacementAlternative {
                node: c.node.clone(),
                score: c.score,
            })
            .collect();

        Ok(Some(PlacementRecommendation {
            recommended_node: best.node.clone(),
            placement_score: best.score,
            fit_scores: best.fit,
            alternatives,
            warnings,
        }))
    }

    /// Recommends a new home for a displaced guest, never its current
    /// node and never additional excluded ones.
    pub async fn recommend_excluding(
        &self,
        requirements: &ResourceRequirements,
        exclude: &HashSet<String>,
    ) -> OpsResult<Option<PlacementRecommendation>> {
        let mut requirements = requirements.clone();
        requirements.excluded_nodes.extend(exclude.iter().cloned());
        self.recommend(&requirements).await
    }

    /// Reports the largest single VM the cluster could still host,
    /// honouring the request's node constraints.
    ///
    /// Each dimension is answered independently per node; the limiting
    /// factor is the dimension with the smallest remaining share of its
    /// cluster total.
    pub async fn largest_possible_vm(
        &self,
        requirements: &ResourceRequirements,
    ) -> OpsResult<VmCapacity> {
        let (snapshots, _warnings) = self.capacity.online_snapshots(true).await?;
        let maintenance = self.registry.nodes_in_maintenance().await;
        let config = self.capacity.config();

        let mut offers: Vec<NodeCapacity> = snapshots
            .iter()
            .filter(|s| !maintenance.contains(&s.node))
            .filter(|s| !requirements.excluded_nodes.contains(&s.node))
            .map(|s| NodeCapacity {
                node: s.node.clone(),
                max_cpu_cores: s.available(ResourceDimension::Cpu, config),
                max_memory_bytes: s.available(ResourceDimension::Memory, config),
                max_storage_bytes: s.available(ResourceDimension::Storage, config),
            })
            .collect();

        if !requirements.preferred_nodes.is_empty()
            && offers
                .iter()
                .any(|o| requirements.preferred_nodes.contains(&o.node))
        {
            offers.retain(|o| requirements.preferred_nodes.contains(&o.node));
        }

        if offers.is_empty() {
            return Err(OpsError::precondition(
                "no online node outside maintenance",
                "bring a node online or end maintenance",
            ));
        }

        let max_cpu = offers.iter().map(|o| o.max_cpu_cores).max().unwrap_or(0);
        let max_memory = offers.iter().map(|o| o.max_memory_bytes).max().unwrap_or(0);
        let max_storage = offers
            .iter()
            .map(|o| o.max_storage_bytes)
            .max()
            .unwrap_or(0);

        let limiting_factor = self.limiting_factor(&snapshots, max_cpu, max_memory, max_storage);

        let mut alternatives = offers;
        alternatives.sort_by(|a, b| {
            b.max_memory_bytes
                .cmp(&a.max_memory_bytes)
                .then_with(|| b.max_storage_bytes.cmp(&a.max_storage_bytes))
                .then_with(|| a.node.cmp(&b.node))
        });
        alternatives.truncate(self.config.max_alternatives);

        Ok(VmCapacity {
            max_cpu_cores: max_cpu,
            max_memory_bytes: max_memory,
            max_storage_bytes: max_storage,
            limiting_factor,
            alternatives,
        })
    }

    /// Per-dimension fit of one node; `None` when any required
    /// dimension is short.
    fn score(&self, snapshot: &ResourceSnapshot, req: &ResourceRequirements) -> Option<Candidate> {
        let config = self.capacity.config();
        let cpu = dimension_fit(
            snapshot.available_cores(config),
            u64::from(req.cpu_cores),
        )?;
        let memory = dimension_fit(snapshot.available_memory_bytes(config), req.memory_bytes)?;
        let storage = dimension_fit(snapshot.available_storage_bytes(config), req.storage_bytes)?;

        let weights = &self.config.placement_weights;
        let score = storage * weights.storage + memory * weights.memory + cpu * weights.cpu;
        Some(Candidate {
            node: snapshot.node.clone(),
            fit: FitScores {
                cpu,
                memory,
                storage,
            },
            score,
            load: snapshot.cpu_load,
        })
    }

    /// The dimension with the least remaining share of its cluster total.
    fn limiting_factor(
        &self,
        snapshots: &[ResourceSnapshot],
        max_cpu: u64,
        max_memory: u64,
        max_storage: u64,
    ) -> ResourceDimension {
        let total_cpu: u64 = snapshots.iter().map(|s| s.total_cores).sum();
        let total_memory: u64 = snapshots.iter().map(|s| s.total_memory_bytes).sum();
        let total_storage: u64 = snapshots.iter().map(|s| s.total_storage_bytes).sum();

        let shares = [
            (ResourceDimension::Cpu, share(max_cpu, total_cpu)),
            (ResourceDimension::Memory, share(max_memory, total_memory)),
            (ResourceDimension::Storage, share(max_storage, total_storage)),
        ];
        shares
            .into_iter()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(dimension, _)| dimension)
            .unwrap_or(ResourceDimension::Memory)
    }
}

/// Fit of one dimension: `available / required` capped at 1, or `None`
/// when the node cannot cover the requirement at all. A requirement of
/// zero always fits perfectly.
fn dimension_fit(available: u64, required: u64) -> Option<f64> {
    if required == 0 {
        return Some(1.0);
    }
    if available < required {
        return None;
    }
    Some((available as f64 / required as f64).min(1.0))
}

/// Remaining share of a cluster total, in `0.0..=1.0`.
fn share(available: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    available as f64 / total as f64
}
