//! Final ranking and baseline comparison.
//!
//! Consumes scored populations (one per fitness metric when several run),
//! deduplicates builds with identical allocations, ranks by the requested
//! metric and, when a baseline build's stats are supplied, annotates every
//! entry with its percentage deviation. Deviations are reporting only; the
//! search never sees them.

use crate::build::Build;
use crate::engine::{Disagreement, Selection};
use crate::optimizer::FitnessMetric;
use crate::stats::AggregateStats;
use serde::Serialize;
use std::collections::BTreeSet;

/// Percentage deviation of a candidate from the baseline, per metric.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BaselineDelta {
    pub stage_pct: f64,
    pub loot_pct: f64,
    pub xp_pct: f64,
    pub survival_pct: f64,
}

fn pct(candidate: f64, baseline: f64) -> f64 {
    if baseline.abs() < 1e-12 {
        0.0
    } else {
        (candidate - baseline) / baseline * 100.0
    }
}

impl BaselineDelta {
    fn between(candidate: &AggregateStats, baseline: &AggregateStats) -> BaselineDelta {
        BaselineDelta {
            stage_pct: pct(candidate.avg_stage, baseline.avg_stage),
            loot_pct: pct(candidate.avg_loot, baseline.avg_loot),
            xp_pct: pct(candidate.avg_xp, baseline.avg_xp),
            survival_pct: pct(candidate.survival_rate, baseline.survival_rate),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedEntry {
    pub rank: usize,
    pub score: f64,
    pub build: Build,
    pub stats: AggregateStats,
    pub baseline_delta: Option<BaselineDelta>,
}

/// The crate's output boundary: ranked candidates plus the engine-selection
/// metadata and the defect tallies accumulated along the way.
#[derive(Debug, Clone, Serialize)]
pub struct RankedReport {
    pub metric: FitnessMetric,
    pub selection: Selection,
    pub entries: Vec<RankedEntry>,
    pub baseline: Option<AggregateStats>,
    pub aborted_runs: usize,
    pub overflow_runs: usize,
    pub disagreements: Vec<Disagreement>,
}

/// Rank one or more populations under a metric.
pub fn rank(
    populations: Vec<Vec<(Build, AggregateStats)>>,
    metric: FitnessMetric,
    baseline: Option<&AggregateStats>,
    selection: Selection,
    top_n: usize,
) -> RankedReport {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut candidates: Vec<(Build, AggregateStats, f64)> = Vec::new();
    let mut aborted_runs = 0;
    let mut overflow_runs = 0;

    for population in populations {
        for (build, stats) in population {
            aborted_runs += stats.aborted_runs;
            overflow_runs += stats.overflow_runs;
            if !seen.insert(build.allocation_key()) {
                continue;
            }
            let score = metric.score(&stats);
            candidates.push((build, stats, score));
        }
    }

    candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
    candidates.truncate(top_n);

    let entries = candidates
        .into_iter()
        .enumerate()
        .map(|(i, (build, stats, score))| RankedEntry {
            rank: i + 1,
            score,
            baseline_delta: baseline.map(|base| BaselineDelta::between(&stats, base)),
            build,
            stats,
        })
        .collect();

    RankedReport {
        metric,
        selection,
        entries,
        baseline: baseline.cloned(),
        aborted_runs,
        overflow_runs,
        disagreements: Vec::new(),
    }
}

impl RankedReport {
    /// Attach parity warnings gathered during the run.
    pub fn with_disagreements(mut self, disagreements: Vec<Disagreement>) -> RankedReport {
        self.disagreements = disagreements;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::HunterKind;
    use crate::config::{BackendKind, EngineConfig};
    use crate::engine::select_backend;

    fn stats(avg_stage: f64) -> AggregateStats {
        AggregateStats {
            completed_runs: 10,
            avg_stage,
            avg_loot: avg_stage * 100.0,
            ..AggregateStats::default()
        }
    }

    fn selection() -> Selection {
        select_backend(&EngineConfig {
            backend: BackendKind::Reference,
            ..EngineConfig::default()
        })
    }

    #[test]
    fn entries_are_ranked_by_metric_descending() {
        let a = Build::minimal(HunterKind::Borge, 1).expect("valid");
        let b = Build::minimal(HunterKind::Borge, 2).expect("valid");
        let report = rank(
            vec![vec![(a, stats(10.0)), (b, stats(30.0))]],
            FitnessMetric::AvgStage,
            None,
            selection(),
            10,
        );
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries[0].rank, 1);
        assert!(report.entries[0].score > report.entries[1].score);
    }

    #[test]
    fn identical_allocations_are_deduplicated() {
        let a = Build::minimal(HunterKind::Ozzy, 5).expect("valid");
        let duplicate = a.clone();
        let report = rank(
            vec![vec![(a, stats(10.0))], vec![(duplicate, stats(12.0))]],
            FitnessMetric::AvgStage,
            None,
            selection(),
            10,
        );
        assert_eq!(report.entries.len(), 1);
    }

    #[test]
    fn baseline_deltas_carry_sign() {
        let a = Build::minimal(HunterKind::Knox, 3).expect("valid");
        let baseline = stats(20.0);
        let report = rank(
            vec![vec![(a, stats(30.0))]],
            FitnessMetric::AvgStage,
            Some(&baseline),
            selection(),
            5,
        );
        let delta = report.entries[0].baseline_delta.expect("delta");
        assert!((delta.stage_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn zero_baseline_deviations_do_not_divide_by_zero() {
        let a = Build::minimal(HunterKind::Knox, 3).expect("valid");
        let baseline = AggregateStats::default();
        let report = rank(
            vec![vec![(a, stats(30.0))]],
            FitnessMetric::AvgStage,
            Some(&baseline),
            selection(),
            5,
        );
        let delta = report.entries[0].baseline_delta.expect("delta");
        assert_eq!(delta.stage_pct, 0.0);
    }
}
