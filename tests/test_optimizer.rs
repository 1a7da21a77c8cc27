//! Optimizer behavior across tiers: monotone best tracking, termination,
//! cancellation semantics and report assembly.

use hunter_optim::{
    rank, BackendKind, Build, CancelFlag, EngineConfig, FitnessMetric, HunterKind, Modifiers,
    Optimizer, SimError, StopReason,
};

fn config(tiers: usize, seed: u64) -> EngineConfig {
    EngineConfig {
        sims_per_build: 5,
        backend: BackendKind::Reference,
        seed: Some(seed),
        tier_count: tiers,
        builds_per_tier: 10,
        // Effectively disable plateau stops so tier counts compare cleanly.
        plateau_threshold: -1.0,
        ..EngineConfig::default()
    }
}

fn run_optimizer(tiers: usize, seed: u64) -> hunter_optim::OptimizerOutcome {
    let mut optimizer = Optimizer::new(
        HunterKind::Borge,
        12,
        Modifiers::default(),
        &config(tiers, seed),
        FitnessMetric::AvgStage,
        CancelFlag::new(),
    )
    .expect("optimizer");
    optimizer.run().expect("outcome")
}

#[test]
fn more_tiers_never_lose_ground() {
    // Same seed: tier 1 is identical in both runs, so the three-tier best
    // can only match or beat the one-tier best.
    let short = run_optimizer(1, 314);
    let long = run_optimizer(3, 314);
    let metric = FitnessMetric::AvgStage;
    assert!(metric.score(&long.best.1) >= metric.score(&short.best.1));
    assert_eq!(short.tiers_completed, 1);
    assert_eq!(long.tiers_completed, 3);
}

#[test]
fn the_best_build_dominates_its_final_population() {
    let outcome = run_optimizer(3, 11);
    let metric = FitnessMetric::AvgStage;
    let best_score = metric.score(&outcome.best.1);
    for (_, stats) in &outcome.population {
        assert!(metric.score(stats) <= best_score + 1e-9);
    }
    assert_eq!(outcome.stop_reason, StopReason::TiersExhausted);
    assert_eq!(outcome.builds_tested, 30);
}

#[test]
fn every_tested_build_honors_the_allocation_invariants() {
    let outcome = run_optimizer(3, 77);
    for (build, _) in &outcome.population {
        assert!(build.revalidate().is_ok());
        let talent_spent: i32 = build.talents().values().sum();
        assert!(talent_spent <= build.level());
    }
}

#[test]
fn plateau_detection_stops_early() {
    let cfg = EngineConfig {
        sims_per_build: 5,
        backend: BackendKind::Reference,
        seed: Some(21),
        tier_count: 10,
        builds_per_tier: 6,
        // Any non-negative improvement counts as a plateau tier.
        plateau_threshold: f64::INFINITY,
        plateau_patience: 2,
        ..EngineConfig::default()
    };
    let mut optimizer = Optimizer::new(
        HunterKind::Knox,
        8,
        Modifiers::default(),
        &cfg,
        FitnessMetric::AvgStage,
        CancelFlag::new(),
    )
    .expect("optimizer");
    let outcome = optimizer.run().expect("outcome");
    assert_eq!(outcome.stop_reason, StopReason::Plateau);
    // Tier 1 seeds, then two consecutive plateau tiers trip the stop.
    assert_eq!(outcome.tiers_completed, 3);
}

#[test]
fn pre_cancelled_runs_report_cancelled_not_partial_results() {
    let cancel = CancelFlag::new();
    cancel.cancel();
    let mut optimizer = Optimizer::new(
        HunterKind::Ozzy,
        10,
        Modifiers::default(),
        &config(2, 5),
        FitnessMetric::AvgStage,
        cancel,
    )
    .expect("optimizer");
    assert!(matches!(optimizer.run(), Err(SimError::Cancelled)));
}

#[test]
fn ranked_report_carries_selection_metadata_and_dedupes() {
    let outcome = run_optimizer(2, 42);
    let mut optimizer_for_selection = Optimizer::new(
        HunterKind::Borge,
        12,
        Modifiers::default(),
        &config(2, 42),
        FitnessMetric::AvgStage,
        CancelFlag::new(),
    )
    .expect("optimizer");
    let selection = optimizer_for_selection.runner().selection();

    let baseline_build = Build::minimal(HunterKind::Borge, 12).expect("valid");
    let baseline = optimizer_for_selection
        .runner()
        .run(&baseline_build)
        .expect("baseline batch");

    let population = outcome.population.clone();
    let report = rank(
        vec![outcome.population, vec![outcome.best], population],
        FitnessMetric::AvgStage,
        Some(&baseline),
        selection,
        5,
    );

    assert_eq!(report.selection.requested, BackendKind::Reference);
    assert!(!report.selection.gate_override);
    assert!(report.entries.len() <= 5);
    // Ranks are dense and descending by score.
    for (i, entry) in report.entries.iter().enumerate() {
        assert_eq!(entry.rank, i + 1);
        if i > 0 {
            assert!(report.entries[i - 1].score >= entry.score);
        }
        assert!(entry.baseline_delta.is_some());
    }
    // The same allocation fed in twice appears once.
    let mut keys: Vec<String> = report
        .entries
        .iter()
        .map(|e| e.build.allocation_key())
        .collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), report.entries.len());
}
