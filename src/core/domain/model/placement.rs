//! Placement recommendation produced by the placement engine.

use serde::{Deserialize, Serialize};

/// Per-dimension fit of a candidate node, each in `0.0..=1.0`
/// (`available / required`, capped at 1).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct FitScores {
    pub cpu: f64,
    pub memory: f64,
    pub storage: f64,
}

/// A runner-up candidate with its combined score.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlacementAlternative {
    pub node: String,
    pub score: f64,
}

/// The placement engine's answer for one request.
///
/// Computed fresh per request; never cached, since capacity moves
/// underneath long-running operations.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlacementRecommendation {
    /// Best qualifying node.
    pub recommended_node: String,
    /// Combined weighted score in `0.0..=1.0`.
    pub placement_score: f64,
    /// Per-dimension fit of the recommended node.
    pub fit_scores: FitScores,
    /// Next-best qualifying nodes, best first.
    pub alternatives: Vec<PlacementAlternative>,
    /// Non-fatal observations (preferred set fell through, HA with a
    /// single candidate, nodes skipped for provider errors).
    pub warnings: Vec<String>,
}
