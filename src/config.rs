//! Run parameters supplied by the caller. Read-only to the core.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which simulation implementation the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Fidelity-first implementation, ground truth for parity checks.
    Reference,
    /// Throughput-optimized implementation, subject to the safety gate.
    Accelerated,
}

/// Parameters for one optimization or batch run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Independent simulations per build.
    pub sims_per_build: usize,
    /// Stage cap; `None` falls back to the archetype default.
    pub max_stage: Option<i32>,
    /// Safety bound on events processed within a single stage. Tripping it
    /// is a defect (`TerminalCause::Aborted`), never a normal outcome.
    pub stage_action_cap: u32,
    /// Requested backend; the safety gate may override it.
    pub backend: BackendKind,
    /// Fixed top-level seed for reproducible batches; `None` draws one.
    pub seed: Option<u64>,
    /// Number of optimizer tiers.
    pub tier_count: usize,
    /// Builds scored per tier.
    pub builds_per_tier: usize,
    /// Relative best-score improvement below which a tier counts toward the
    /// plateau.
    pub plateau_threshold: f64,
    /// Consecutive plateau tiers before the optimizer stops early.
    pub plateau_patience: usize,
    /// Wall-clock budget, observed at tier boundaries only.
    pub wall_budget: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sims_per_build: 100,
            max_stage: None,
            stage_action_cap: 100_000,
            backend: BackendKind::Accelerated,
            seed: None,
            tier_count: 6,
            builds_per_tier: 200,
            plateau_threshold: 0.005,
            plateau_patience: 2,
            wall_budget: None,
        }
    }
}
