//! Per-run results and their batch-level reduction.

use serde::{Deserialize, Serialize};

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalCause {
    /// Ran out of stages (configured cap reached).
    StageCap,
    /// Died with no revive left.
    Death,
    /// The per-stage action cap tripped. A defect, surfaced and tallied,
    /// never folded into averages.
    Aborted,
}

/// Outcome of a single simulation run. Produced once, never mutated after
/// being returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub final_stage: i32,
    pub cause: TerminalCause,
    /// Simulated seconds.
    pub elapsed: f64,
    pub kills: i32,
    pub damage_dealt: f64,
    pub damage_taken: f64,
    pub loot_common: f64,
    pub loot_uncommon: f64,
    pub loot_rare: f64,
    pub total_xp: f64,
    pub attacks: i32,
    pub crits: i32,
    pub evades: i32,
    pub effect_procs: i32,
    pub revives_used: i32,
}

impl Default for SimulationResult {
    fn default() -> Self {
        SimulationResult {
            final_stage: 0,
            // Pessimistic until the run loop finishes and stamps the real cause.
            cause: TerminalCause::Aborted,
            elapsed: 0.0,
            kills: 0,
            damage_dealt: 0.0,
            damage_taken: 0.0,
            loot_common: 0.0,
            loot_uncommon: 0.0,
            loot_rare: 0.0,
            total_xp: 0.0,
            attacks: 0,
            crits: 0,
            evades: 0,
            effect_procs: 0,
            revives_used: 0,
        }
    }
}

impl SimulationResult {
    pub fn total_loot(&self) -> f64 {
        self.loot_common + self.loot_uncommon + self.loot_rare
    }

    pub fn loot_per_hour(&self) -> f64 {
        if self.elapsed > 0.0 {
            self.total_loot() / (self.elapsed / 3600.0)
        } else {
            0.0
        }
    }
}

/// Statistical reduction over one build's batch. The reduction is a set of
/// sums and extrema, so it is independent of the order results arrive in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Runs that terminated normally and entered the averages.
    pub completed_runs: usize,
    /// Runs excluded for tripping the action cap.
    pub aborted_runs: usize,
    /// Runs excluded for producing non-finite totals.
    pub overflow_runs: usize,
    pub avg_stage: f64,
    pub std_stage: f64,
    pub min_stage: i32,
    pub max_stage: i32,
    pub avg_time: f64,
    pub avg_loot: f64,
    pub avg_loot_common: f64,
    pub avg_loot_uncommon: f64,
    pub avg_loot_rare: f64,
    pub avg_loot_per_hour: f64,
    pub avg_xp: f64,
    pub avg_damage: f64,
    pub avg_damage_taken: f64,
    pub avg_kills: f64,
    /// Fraction of completed runs that did not end in death.
    pub survival_rate: f64,
    /// Fraction of completed runs that cleared stages 100 / 200 / 300.
    pub boss_survival: [f64; 3],
}

impl AggregateStats {
    /// Reduce a batch. Aborted runs are filtered out of every average and
    /// tallied; `overflow_runs` is carried through from the batch runner.
    pub fn from_results(results: &[SimulationResult], overflow_runs: usize) -> Self {
        let aborted_runs = results
            .iter()
            .filter(|r| r.cause == TerminalCause::Aborted)
            .count();
        let completed: Vec<&SimulationResult> = results
            .iter()
            .filter(|r| r.cause != TerminalCause::Aborted)
            .collect();
        if completed.is_empty() {
            return AggregateStats {
                aborted_runs,
                overflow_runs,
                ..AggregateStats::default()
            };
        }

        let n = completed.len() as f64;
        let avg_stage = completed.iter().map(|r| r.final_stage as f64).sum::<f64>() / n;
        let variance = completed
            .iter()
            .map(|r| (r.final_stage as f64 - avg_stage).powi(2))
            .sum::<f64>()
            / n;

        let survivors = completed
            .iter()
            .filter(|r| r.cause != TerminalCause::Death)
            .count();
        let boss_survival = [100, 200, 300].map(|boss| {
            completed.iter().filter(|r| r.final_stage > boss).count() as f64 / n
        });

        AggregateStats {
            completed_runs: completed.len(),
            aborted_runs,
            overflow_runs,
            avg_stage,
            std_stage: variance.sqrt(),
            min_stage: completed.iter().map(|r| r.final_stage).min().unwrap_or(0),
            max_stage: completed.iter().map(|r| r.final_stage).max().unwrap_or(0),
            avg_time: completed.iter().map(|r| r.elapsed).sum::<f64>() / n,
            avg_loot: completed.iter().map(|r| r.total_loot()).sum::<f64>() / n,
            avg_loot_common: completed.iter().map(|r| r.loot_common).sum::<f64>() / n,
            avg_loot_uncommon: completed.iter().map(|r| r.loot_uncommon).sum::<f64>() / n,
            avg_loot_rare: completed.iter().map(|r| r.loot_rare).sum::<f64>() / n,
            avg_loot_per_hour: completed.iter().map(|r| r.loot_per_hour()).sum::<f64>() / n,
            avg_xp: completed.iter().map(|r| r.total_xp).sum::<f64>() / n,
            avg_damage: completed.iter().map(|r| r.damage_dealt).sum::<f64>() / n,
            avg_damage_taken: completed.iter().map(|r| r.damage_taken).sum::<f64>() / n,
            avg_kills: completed.iter().map(|r| r.kills as f64).sum::<f64>() / n,
            survival_rate: survivors as f64 / n,
            boss_survival,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(stage: i32, cause: TerminalCause) -> SimulationResult {
        SimulationResult {
            final_stage: stage,
            cause,
            elapsed: 100.0,
            loot_common: stage as f64,
            ..SimulationResult::default()
        }
    }

    #[test]
    fn aborted_runs_are_excluded_and_counted() {
        let results = vec![
            run(10, TerminalCause::Death),
            run(1, TerminalCause::Aborted),
            run(20, TerminalCause::Death),
        ];
        let stats = AggregateStats::from_results(&results, 0);
        assert_eq!(stats.completed_runs, 2);
        assert_eq!(stats.aborted_runs, 1);
        assert_eq!(stats.avg_stage, 15.0);
        assert_eq!(stats.min_stage, 10);
    }

    #[test]
    fn reduction_is_order_independent() {
        let mut results = vec![
            run(3, TerminalCause::Death),
            run(150, TerminalCause::StageCap),
            run(7, TerminalCause::Death),
            run(42, TerminalCause::Aborted),
            run(210, TerminalCause::StageCap),
        ];
        let forward = AggregateStats::from_results(&results, 1);
        results.reverse();
        let backward = AggregateStats::from_results(&results, 1);
        assert_eq!(forward, backward);
    }

    #[test]
    fn survival_counts_non_death_outcomes() {
        let results = vec![
            run(100, TerminalCause::StageCap),
            run(50, TerminalCause::Death),
        ];
        let stats = AggregateStats::from_results(&results, 0);
        assert_eq!(stats.survival_rate, 0.5);
    }

    #[test]
    fn all_aborted_batch_reports_only_tallies() {
        let results = vec![run(5, TerminalCause::Aborted)];
        let stats = AggregateStats::from_results(&results, 2);
        assert_eq!(stats.completed_runs, 0);
        assert_eq!(stats.aborted_runs, 1);
        assert_eq!(stats.overflow_runs, 2);
        assert_eq!(stats.avg_stage, 0.0);
    }
}
