//! Orchestration policy knobs.
//!
//! Everything that tunes capacity math, placement scoring and drain
//! behaviour lives here so that services stay free of magic numbers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Overcommit policy for one resource dimension.
///
/// Available headroom is computed as
/// `total * ratio * (1 - reserve_percent / 100) - allocated`,
/// floored at zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Overcommit {
    /// Multiplier permitting allocation beyond raw physical capacity.
    pub ratio: f64,
    /// Percentage of (overcommitted) capacity held back from placement.
    pub reserve_percent: f64,
}

impl Overcommit {
    pub fn new(ratio: f64, reserve_percent: f64) -> Self {
        Self {
            ratio,
            reserve_percent,
        }
    }

    /// Headroom still available for new allocations, floored at zero.
    pub fn headroom(&self, total: u64, allocated: u64) -> u64 {
        let ceiling = total as f64 * self.ratio * (1.0 - self.reserve_percent / 100.0);
        let available = ceiling - allocated as f64;
        if available <= 0.0 { 0 } else { available as u64 }
    }
}

/// Weights used to combine per-dimension fit scores into one placement
/// score. Storage dominates, then memory, then CPU: a storage misfit is
/// the hardest to repair after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementWeights {
    pub storage: f64,
    pub memory: f64,
    pub cpu: f64,
}

impl Default for PlacementWeights {
    fn default() -> Self {
        Self {
            storage: 0.5,
            memory: 0.3,
            cpu: 0.2,
        }
    }
}

/// Top-level orchestration configuration.
///
/// Deserializable so deployments can ship it as JSON/TOML next to the
/// connection settings; [`Default`] gives sane single-cluster values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    /// CPU overcommit policy.
    pub cpu: Overcommit,
    /// Memory overcommit policy.
    pub memory: Overcommit,
    /// Storage overcommit policy.
    pub storage: Overcommit,
    /// Scoring weights for placement.
    pub placement_weights: PlacementWeights,
    /// Maximum number of ranked alternatives on a recommendation.
    pub max_alternatives: usize,
    /// Storage backend ids matching any of these patterns are treated
    /// as node-local (trailing `*` wildcard supported).
    pub local_storage_patterns: Vec<String>,
    /// VMs carrying this tag are left running by a soft drain.
    pub maintenance_tolerant_tag: String,
    /// Concurrent migrations per drain when the request does not say.
    pub default_max_concurrent: usize,
    /// Remote task poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Capacity snapshot cache time-to-live in milliseconds.
    pub capacity_cache_ttl_ms: u64,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            cpu: Overcommit::new(4.0, 0.0),
            memory: Overcommit::new(1.0, 10.0),
            storage: Overcommit::new(1.0, 10.0),
            placement_weights: PlacementWeights::default(),
            max_alternatives: 3,
            local_storage_patterns: vec!["local".to_string(), "local-*".to_string()],
            maintenance_tolerant_tag: "maint-ok".to_string(),
            default_max_concurrent: 4,
            poll_interval_ms: 2_000,
            capacity_cache_ttl_ms: 10_000,
        }
    }
}

impl OpsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn capacity_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.capacity_cache_ttl_ms)
    }

    /// A configuration with no overcommit and no reserves, useful when
    /// raw inventory numbers should pass through untouched.
    pub fn strict() -> Self {
        Self {
            cpu: Overcommit::new(1.0, 0.0),
            memory: Overcommit::new(1.0, 0.0),
            storage: Overcommit::new(1.0, 0.0),
            ..Self::default()
        }
    }
}
