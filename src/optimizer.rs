//! Tiered evolutionary search over the allocation space.
//!
//! Tier 1 samples the space uniformly; later tiers breed offspring from the
//! top decile of the previous tier by field-wise crossover plus small point
//! mutations. Offspring that fail validation are discarded and resampled,
//! never simulated. The best (build, score) seen so far survives into every
//! following tier unconditionally, which makes best-seen fitness monotone
//! across tiers. Tiers are strictly sequential; each tier's scoring fans out
//! through the batch runner.

use crate::batch::BatchRunner;
use crate::build::{Build, HunterKind, Modifiers};
use crate::config::EngineConfig;
use crate::engine::mix_seed;
use crate::error::{Result, SimError};
use crate::generator::BuildGenerator;
use crate::stats::AggregateStats;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// How builds are compared. Selection is defined entirely through
/// [`FitnessMetric::score`], so adding a metric never touches the tier loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FitnessMetric {
    AvgStage,
    LootPerHour,
    SurvivalRate,
    AvgDamage,
    /// Weighted blend; loot enters log-scaled so it cannot drown the rest.
    Weighted {
        stage: f64,
        loot: f64,
        survival: f64,
    },
}

impl FitnessMetric {
    pub fn score(&self, stats: &AggregateStats) -> f64 {
        match *self {
            FitnessMetric::AvgStage => stats.avg_stage,
            FitnessMetric::LootPerHour => stats.avg_loot_per_hour,
            FitnessMetric::SurvivalRate => stats.survival_rate,
            FitnessMetric::AvgDamage => stats.avg_damage,
            FitnessMetric::Weighted {
                stage,
                loot,
                survival,
            } => {
                stage * stats.avg_stage
                    + loot * (1.0 + stats.avg_loot_per_hour).log10()
                    + survival * stats.survival_rate
            }
        }
    }
}

/// Cooperative cancellation. The tier loop observes it between batches and
/// at tier boundaries; in-flight runs always finish.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TiersExhausted,
    Plateau,
    Cancelled,
    WallBudget,
}

/// Final state of one optimization run.
pub struct OptimizerOutcome {
    /// Best-seen build and its stats; monotone across tiers.
    pub best: (Build, AggregateStats),
    /// The last fully scored tier, sorted by the metric descending.
    pub population: Vec<(Build, AggregateStats)>,
    pub tiers_completed: usize,
    pub builds_tested: usize,
    pub stop_reason: StopReason,
}

pub struct Optimizer {
    runner: BatchRunner,
    generator: BuildGenerator,
    metric: FitnessMetric,
    cancel: CancelFlag,
    tier_count: usize,
    builds_per_tier: usize,
    plateau_threshold: f64,
    plateau_patience: usize,
    wall_budget: Option<std::time::Duration>,
    rng: SmallRng,
}

/// Bounded retries before a failed offspring is replaced by a fresh random
/// sample.
const BREED_RETRIES: usize = 20;

impl Optimizer {
    pub fn new(
        kind: HunterKind,
        level: i32,
        modifiers: Modifiers,
        config: &EngineConfig,
        metric: FitnessMetric,
        cancel: CancelFlag,
    ) -> Result<Optimizer> {
        let runner = BatchRunner::new(config)?;
        let rng = SmallRng::seed_from_u64(runner.top_seed());
        Ok(Optimizer {
            runner,
            generator: BuildGenerator::with_modifiers(kind, level, modifiers),
            metric,
            cancel,
            tier_count: config.tier_count,
            builds_per_tier: config.builds_per_tier,
            plateau_threshold: config.plateau_threshold,
            plateau_patience: config.plateau_patience,
            wall_budget: config.wall_budget,
            rng,
        })
    }

    pub fn runner(&self) -> &BatchRunner {
        &self.runner
    }

    /// Run the tier loop to completion, plateau, cancellation or budget.
    pub fn run(&mut self) -> Result<OptimizerOutcome> {
        let started = Instant::now();
        let mut best: Option<(Build, AggregateStats, f64)> = None;
        let mut population: Vec<(Build, AggregateStats)> = Vec::new();
        let mut plateau_run = 0;
        let mut builds_tested: usize = 0;
        let mut tiers_completed = 0;
        let mut stop_reason = StopReason::TiersExhausted;

        for tier in 0..self.tier_count {
            // Cancellation and the wall clock are only observed at tier
            // boundaries and between batches, never mid-simulation.
            if self.cancel.is_cancelled() {
                stop_reason = StopReason::Cancelled;
                break;
            }
            if let Some(budget) = self.wall_budget {
                if started.elapsed() >= budget {
                    stop_reason = StopReason::WallBudget;
                    break;
                }
            }

            let builds = if tier == 0 {
                self.seed_tier()?
            } else {
                self.breed_tier(&population, best.as_ref().map(|(b, _, _)| b))?
            };

            let mut scored: Vec<(Build, AggregateStats, f64)> =
                Vec::with_capacity(builds.len());
            let mut interrupted = false;
            for build in builds {
                if self.cancel.is_cancelled() {
                    interrupted = true;
                    break;
                }
                let batch_seed = mix_seed(self.runner.top_seed(), builds_tested as u64);
                let stats = self.runner.run_seeded(&build, batch_seed)?;
                builds_tested += 1;
                let score = self.metric.score(&stats);
                scored.push((build, stats, score));
            }
            if interrupted {
                // A partially scored tier is discarded, never reported.
                stop_reason = StopReason::Cancelled;
                break;
            }

            scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

            let previous_best = best.as_ref().map(|(_, _, score)| *score);
            if let Some((build, stats, score)) = scored.first() {
                let improved = previous_best.map_or(true, |prev| *score > prev);
                if improved {
                    best = Some((build.clone(), stats.clone(), *score));
                }
            }

            if let (Some(prev), Some((_, _, now))) = (previous_best, best.as_ref()) {
                let improvement = (now - prev) / prev.abs().max(1e-9);
                if improvement < self.plateau_threshold {
                    plateau_run += 1;
                } else {
                    plateau_run = 0;
                }
            }

            population = scored
                .into_iter()
                .map(|(build, stats, _)| (build, stats))
                .collect();
            tiers_completed += 1;

            if let Some((_, _, score)) = best.as_ref() {
                info!(
                    tier = tier + 1,
                    tested = builds_tested,
                    best_score = *score,
                    "tier complete"
                );
            }

            if plateau_run >= self.plateau_patience {
                stop_reason = StopReason::Plateau;
                break;
            }
        }

        let Some((best_build, best_stats, _)) = best else {
            // Cancelled before the first tier finished scoring.
            return Err(SimError::Cancelled);
        };
        Ok(OptimizerOutcome {
            best: (best_build, best_stats),
            population,
            tiers_completed,
            builds_tested,
            stop_reason,
        })
    }

    /// Tier 1: uniform random sampling of the valid space.
    fn seed_tier(&mut self) -> Result<Vec<Build>> {
        let mut builds = Vec::with_capacity(self.builds_per_tier);
        for _ in 0..self.builds_per_tier {
            builds.push(self.generator.random_build(&mut self.rng)?);
        }
        Ok(builds)
    }

    /// Tiers > 1: breed from the top decile. The incumbent best re-enters
    /// both the breeding pool and the tier itself.
    fn breed_tier(
        &mut self,
        population: &[(Build, AggregateStats)],
        incumbent: Option<&Build>,
    ) -> Result<Vec<Build>> {
        let decile = (population.len() / 10).max(2).min(population.len().max(1));
        let mut pool: Vec<&Build> = population.iter().take(decile).map(|(b, _)| b).collect();
        if let Some(best) = incumbent {
            pool.push(best);
        }
        if pool.is_empty() {
            return self.seed_tier();
        }

        let mut builds = Vec::with_capacity(self.builds_per_tier);
        if let Some(best) = incumbent {
            builds.push(best.clone());
        }
        while builds.len() < self.builds_per_tier {
            let offspring = self.breed_one(&pool);
            match offspring {
                Some(build) => builds.push(build),
                // Persistent validation failures fall back to fresh samples
                // rather than simulating garbage.
                None => builds.push(self.generator.random_build(&mut self.rng)?),
            }
        }
        Ok(builds)
    }

    fn breed_one(&mut self, pool: &[&Build]) -> Option<Build> {
        for _ in 0..BREED_RETRIES {
            let a = pool[self.rng.gen_range(0..pool.len())];
            let b = pool[self.rng.gen_range(0..pool.len())];
            let mut talents = crossover(a.talents(), b.talents(), &mut self.rng);
            let mut attributes = crossover(a.attributes(), b.attributes(), &mut self.rng);
            mutate(&mut talents, &mut self.rng);
            mutate(&mut attributes, &mut self.rng);
            // Offspring are re-validated from scratch; invalid ones are
            // discarded and resampled.
            if let Ok(build) = a.with_allocations(talents, attributes) {
                return Some(build);
            }
        }
        None
    }
}

/// Field-wise crossover: each allocation field is drawn from one of the two
/// parents at uniform.
fn crossover(
    a: &BTreeMap<String, i32>,
    b: &BTreeMap<String, i32>,
    rng: &mut SmallRng,
) -> BTreeMap<String, i32> {
    let mut child = BTreeMap::new();
    let keys: Vec<&String> = a.keys().chain(b.keys()).collect();
    for key in keys {
        if child.contains_key(key.as_str()) {
            continue;
        }
        let source = if rng.gen_bool(0.5) { a } else { b };
        let level = source.get(key.as_str()).copied().unwrap_or(0);
        if level > 0 {
            child.insert(key.clone(), level);
        }
    }
    child
}

/// Move a small number of points to neighboring allocations.
fn mutate(allocation: &mut BTreeMap<String, i32>, rng: &mut SmallRng) {
    if allocation.is_empty() {
        return;
    }
    let moves = rng.gen_range(0..=2);
    for _ in 0..moves {
        let keys: Vec<String> = allocation.keys().cloned().collect();
        let from = &keys[rng.gen_range(0..keys.len())];
        let to = &keys[rng.gen_range(0..keys.len())];
        if from == to {
            continue;
        }
        let from_level = allocation.get(from.as_str()).copied().unwrap_or(0);
        if from_level > 0 {
            allocation.insert(from.clone(), from_level - 1);
            *allocation.entry(to.clone()).or_insert(0) += 1;
        }
        allocation.retain(|_, lvl| *lvl > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;

    fn quick_config() -> EngineConfig {
        EngineConfig {
            sims_per_build: 5,
            backend: BackendKind::Reference,
            seed: Some(77),
            tier_count: 3,
            builds_per_tier: 8,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn best_score_is_monotone_across_tiers() {
        let mut optimizer = Optimizer::new(
            HunterKind::Borge,
            15,
            Modifiers::default(),
            &quick_config(),
            FitnessMetric::AvgStage,
            CancelFlag::new(),
        )
        .expect("optimizer");
        let outcome = optimizer.run().expect("outcome");
        assert!(outcome.tiers_completed >= 1);
        let best_score = FitnessMetric::AvgStage.score(&outcome.best.1);
        for (_, stats) in &outcome.population {
            assert!(FitnessMetric::AvgStage.score(stats) <= best_score + 1e-9);
        }
    }

    #[test]
    fn cancellation_before_start_reports_cancelled() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut optimizer = Optimizer::new(
            HunterKind::Knox,
            10,
            Modifiers::default(),
            &quick_config(),
            FitnessMetric::AvgStage,
            cancel,
        )
        .expect("optimizer");
        assert!(matches!(optimizer.run(), Err(SimError::Cancelled)));
    }

    #[test]
    fn crossover_only_mixes_parent_fields() {
        let mut rng = SmallRng::seed_from_u64(4);
        let a: BTreeMap<String, i32> =
            [("x".to_string(), 3), ("y".to_string(), 1)].into_iter().collect();
        let b: BTreeMap<String, i32> = [("y".to_string(), 2)].into_iter().collect();
        for _ in 0..20 {
            let child = crossover(&a, &b, &mut rng);
            for (key, level) in &child {
                assert!(
                    *level == a.get(key).copied().unwrap_or(0)
                        || *level == b.get(key).copied().unwrap_or(0)
                );
            }
        }
    }

    #[test]
    fn mutation_preserves_total_points() {
        let mut rng = SmallRng::seed_from_u64(12);
        for _ in 0..50 {
            let mut allocation: BTreeMap<String, i32> =
                [("a".to_string(), 4), ("b".to_string(), 2)].into_iter().collect();
            let before: i32 = allocation.values().sum();
            mutate(&mut allocation, &mut rng);
            let after: i32 = allocation.values().sum();
            assert_eq!(before, after);
        }
    }
}
