//! The engine contract, backend selection and the parity check.
//!
//! Both simulation implementations sit behind [`CombatEngine`]; everything
//! downstream (batch runner, optimizer) only ever talks to the trait. The
//! safety gate lives here too: it overrides a request for the accelerated
//! backend when the batch would finish faster than results can reliably be
//! drained from the collection channel.

use crate::build::Build;
use crate::config::{BackendKind, EngineConfig};
use crate::error::Result;
use crate::stats::AggregateStats;
use serde::Serialize;
use tracing::warn;

/// Relative tolerance for aggregate stage/loot/xp agreement between the two
/// backends over a validation corpus.
pub const PARITY_TOLERANCE: f64 = 0.05;

/// Minimum simulations per build for the accelerated backend. Below this a
/// batch completes faster than the result channel is guaranteed to drain,
/// so the gate forces the reference backend instead. A concurrency-safety
/// rule, not an accuracy rule.
pub const MIN_ACCELERATED_SIMS: usize = 8;

/// One simulation implementation: a pure function from (build, seed) to a
/// result. Same build, same seed, same backend means a bit-identical result.
pub trait CombatEngine: Send + Sync {
    fn backend(&self) -> BackendKind;

    fn simulate(&self, build: &Build, seed: u64) -> Result<crate::stats::SimulationResult>;
}

/// Outcome of the safety gate, carried through to the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub requested: BackendKind,
    pub selected: BackendKind,
    pub gate_override: bool,
}

/// Apply the safety gate to the caller's backend request.
pub fn select_backend(config: &EngineConfig) -> Selection {
    let requested = config.backend;
    let selected = match requested {
        BackendKind::Accelerated if config.sims_per_build < MIN_ACCELERATED_SIMS => {
            warn!(
                sims_per_build = config.sims_per_build,
                minimum = MIN_ACCELERATED_SIMS,
                "batch too small for the accelerated backend, forcing reference"
            );
            BackendKind::Reference
        }
        other => other,
    };
    Selection {
        requested,
        selected,
        gate_override: selected != requested,
    }
}

/// Instantiate the engine for a backend.
pub fn build_engine(kind: BackendKind, config: &EngineConfig) -> Box<dyn CombatEngine> {
    match kind {
        BackendKind::Reference => Box::new(crate::reference::ReferenceEngine::new(config)),
        BackendKind::Accelerated => Box::new(crate::accelerated::AcceleratedEngine::new(config)),
    }
}

/// Derive the per-run seed stream from a top-level seed. splitmix64 keeps
/// neighboring run indices decorrelated while staying reproducible.
pub fn mix_seed(top_seed: u64, run_index: u64) -> u64 {
    let mut z = top_seed
        .wrapping_add(run_index.wrapping_mul(0x9e37_79b9_7f4a_7c15))
        .wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Assemble the final result for a finished run. Shared by both backends so
/// the loot/xp closed form and the overflow check cannot drift apart.
pub(crate) fn finish_run(
    hunter: &crate::hunter::Hunter,
    cause: crate::stats::TerminalCause,
    elapsed: f64,
) -> Result<crate::stats::SimulationResult> {
    let economy = crate::catalog::Catalog::for_kind(hunter.kind).economy;
    let (loot_common, loot_uncommon, loot_rare, total_xp) =
        economy.totals(hunter.current_stage, hunter.loot_mult, hunter.xp_mult);

    // Extreme multipliers route through f64; wrapped or NaN totals must
    // surface as an error, never as a value.
    if ![loot_common, loot_uncommon, loot_rare].iter().all(|v| v.is_finite()) {
        return Err(crate::error::SimError::NumericOverflow {
            quantity: "loot",
            stage: hunter.current_stage,
        });
    }
    if !total_xp.is_finite() {
        return Err(crate::error::SimError::NumericOverflow {
            quantity: "xp",
            stage: hunter.current_stage,
        });
    }
    if !hunter.tally.damage_dealt.is_finite() || !hunter.tally.damage_taken.is_finite() {
        return Err(crate::error::SimError::NumericOverflow {
            quantity: "damage",
            stage: hunter.current_stage,
        });
    }

    Ok(crate::stats::SimulationResult {
        final_stage: hunter.current_stage,
        cause,
        elapsed,
        kills: hunter.tally.kills,
        damage_dealt: hunter.tally.damage_dealt,
        damage_taken: hunter.tally.damage_taken,
        loot_common,
        loot_uncommon,
        loot_rare,
        total_xp,
        attacks: hunter.tally.attacks,
        crits: hunter.tally.crits,
        evades: hunter.tally.evades,
        effect_procs: hunter.tally.effect_procs,
        revives_used: hunter.revives_used,
    })
}

/// A metric where the two backends drifted past [`PARITY_TOLERANCE`].
/// Reported as a warning with both aggregates attached; never fatal.
#[derive(Debug, Clone, Serialize)]
pub struct Disagreement {
    pub build: String,
    pub metric: &'static str,
    pub reference: f64,
    pub accelerated: f64,
    pub deviation: f64,
}

fn relative_deviation(reference: f64, accelerated: f64) -> f64 {
    if reference == 0.0 && accelerated == 0.0 {
        0.0
    } else {
        (accelerated - reference).abs() / reference.abs().max(1e-12)
    }
}

/// Run a validation corpus on both backends and compare aggregate
/// stage/loot/xp. Must be re-run whenever either backend's formulas change.
pub fn check_parity(corpus: &[Build], config: &EngineConfig) -> Result<Vec<Disagreement>> {
    let reference = crate::reference::ReferenceEngine::new(config);
    let accelerated = crate::accelerated::AcceleratedEngine::new(config);
    let top_seed = config.seed.unwrap_or(0x5eed);

    let mut disagreements = Vec::new();
    for build in corpus {
        let aggregate = |engine: &dyn CombatEngine| -> Result<AggregateStats> {
            let mut results = Vec::with_capacity(config.sims_per_build);
            let mut overflows = 0;
            for run in 0..config.sims_per_build {
                match engine.simulate(build, mix_seed(top_seed, run as u64)) {
                    Ok(result) => results.push(result),
                    Err(crate::error::SimError::NumericOverflow { .. }) => overflows += 1,
                    Err(e) => return Err(e),
                }
            }
            Ok(AggregateStats::from_results(&results, overflows))
        };
        let ref_stats = aggregate(&reference)?;
        let acc_stats = aggregate(&accelerated)?;

        for (metric, r, a) in [
            ("avg_stage", ref_stats.avg_stage, acc_stats.avg_stage),
            ("avg_loot", ref_stats.avg_loot, acc_stats.avg_loot),
            ("avg_xp", ref_stats.avg_xp, acc_stats.avg_xp),
        ] {
            let deviation = relative_deviation(r, a);
            if deviation > PARITY_TOLERANCE {
                warn!(
                    build = %build.allocation_key(),
                    metric,
                    reference = r,
                    accelerated = a,
                    deviation,
                    "backend disagreement beyond tolerance"
                );
                disagreements.push(Disagreement {
                    build: build.allocation_key(),
                    metric,
                    reference: r,
                    accelerated: a,
                    deviation,
                });
            }
        }
    }
    Ok(disagreements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_forces_reference_below_minimum_batch() {
        let config = EngineConfig {
            sims_per_build: MIN_ACCELERATED_SIMS - 1,
            backend: BackendKind::Accelerated,
            ..EngineConfig::default()
        };
        let selection = select_backend(&config);
        assert_eq!(selection.selected, BackendKind::Reference);
        assert!(selection.gate_override);
    }

    #[test]
    fn gate_passes_large_accelerated_batches() {
        let config = EngineConfig {
            sims_per_build: MIN_ACCELERATED_SIMS,
            backend: BackendKind::Accelerated,
            ..EngineConfig::default()
        };
        let selection = select_backend(&config);
        assert_eq!(selection.selected, BackendKind::Accelerated);
        assert!(!selection.gate_override);
    }

    #[test]
    fn gate_never_touches_reference_requests() {
        let config = EngineConfig {
            sims_per_build: 1,
            backend: BackendKind::Reference,
            ..EngineConfig::default()
        };
        let selection = select_backend(&config);
        assert_eq!(selection.selected, BackendKind::Reference);
        assert!(!selection.gate_override);
    }

    #[test]
    fn seed_mixing_spreads_neighboring_indices() {
        let a = mix_seed(42, 0);
        let b = mix_seed(42, 1);
        assert_ne!(a, b);
        // Different top seeds give different streams.
        assert_ne!(mix_seed(1, 0), mix_seed(2, 0));
    }
}
