//! Fans one build's simulations across a worker pool and reduces them.
//!
//! The runner owns the only shared resource on the hot path, the rayon
//! pool, and never exposes it. Each run gets its own derived seed and its
//! own read-only view of the build, so no locking is needed anywhere.

use crate::build::Build;
use crate::config::EngineConfig;
use crate::engine::{build_engine, mix_seed, select_backend, CombatEngine, Selection};
use crate::error::{Result, SimError};
use crate::stats::AggregateStats;
use rayon::prelude::*;
use tracing::debug;

pub struct BatchRunner {
    pool: rayon::ThreadPool,
    engine: Box<dyn CombatEngine>,
    selection: Selection,
    sims_per_build: usize,
    top_seed: u64,
}

impl BatchRunner {
    /// Build a runner for one optimization or batch session. Applies the
    /// safety gate once, up front; the decision is carried in
    /// [`BatchRunner::selection`] for reporting.
    pub fn new(config: &EngineConfig) -> Result<BatchRunner> {
        let selection = select_backend(config);
        let engine = build_engine(selection.selected, config);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_cpus::get())
            .build()
            .map_err(|e| SimError::Pool(e.to_string()))?;
        let top_seed = config.seed.unwrap_or_else(rand::random);
        Ok(BatchRunner {
            pool,
            engine,
            selection,
            sims_per_build: config.sims_per_build,
            top_seed,
        })
    }

    /// Which backend actually runs, and whether the gate overrode the request.
    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn top_seed(&self) -> u64 {
        self.top_seed
    }

    /// Run the configured number of independent simulations for one build.
    ///
    /// Fails atomically on an invalid build; never returns partial
    /// statistics. Aborted and overflowed runs are excluded from the
    /// aggregate and tallied on the returned stats. Per-run seeds derive
    /// from the top-level seed plus the run index, so a fixed seed
    /// reproduces the whole batch.
    pub fn run(&self, build: &Build) -> Result<AggregateStats> {
        self.run_seeded(build, self.top_seed)
    }

    /// Same as [`BatchRunner::run`] with an explicit batch seed. The
    /// optimizer uses this to give every scored build its own stream.
    pub fn run_seeded(&self, build: &Build, batch_seed: u64) -> Result<AggregateStats> {
        build.revalidate()?;

        let engine = &*self.engine;
        let outcomes: Vec<Result<crate::stats::SimulationResult>> = self.pool.install(|| {
            (0..self.sims_per_build)
                .into_par_iter()
                .map(|run| engine.simulate(build, mix_seed(batch_seed, run as u64)))
                .collect()
        });

        let mut results = Vec::with_capacity(outcomes.len());
        let mut overflow_runs = 0;
        for outcome in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                // Overflow is fatal for the run, recovered at the batch
                // level, and always counted.
                Err(SimError::NumericOverflow { .. }) => overflow_runs += 1,
                Err(e) => return Err(e),
            }
        }

        let stats = AggregateStats::from_results(&results, overflow_runs);
        if stats.aborted_runs > 0 || stats.overflow_runs > 0 {
            debug!(
                build = %build.allocation_key(),
                aborted = stats.aborted_runs,
                overflow = stats.overflow_runs,
                "batch excluded defective runs"
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::HunterKind;
    use crate::config::BackendKind;

    fn config(sims: usize, seed: u64) -> EngineConfig {
        EngineConfig {
            sims_per_build: sims,
            seed: Some(seed),
            backend: BackendKind::Reference,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn fixed_seed_reproduces_the_whole_batch() {
        let build = Build::minimal(HunterKind::Borge, 5).expect("valid");
        let runner = BatchRunner::new(&config(20, 1234)).expect("runner");
        let a = runner.run(&build).expect("batch");
        let b = runner.run(&build).expect("batch");
        assert_eq!(a, b);
    }

    #[test]
    fn minimal_level_one_batch_has_no_aborts() {
        let build = Build::minimal(HunterKind::Borge, 1).expect("valid");
        let runner = BatchRunner::new(&config(50, 7)).expect("runner");
        let stats = runner.run(&build).expect("batch");
        assert_eq!(stats.aborted_runs, 0);
        assert_eq!(stats.overflow_runs, 0);
        assert_eq!(stats.completed_runs, 50);
        // Same seed policy, same deterministic aggregate.
        let again = runner.run(&build).expect("batch");
        assert_eq!(stats.avg_stage, again.avg_stage);
    }

    #[test]
    fn accelerated_requests_keep_their_backend_above_the_minimum() {
        let cfg = EngineConfig {
            sims_per_build: 16,
            backend: BackendKind::Accelerated,
            seed: Some(1),
            ..EngineConfig::default()
        };
        let runner = BatchRunner::new(&cfg).expect("runner");
        assert_eq!(runner.selection().selected, BackendKind::Accelerated);
    }
}
