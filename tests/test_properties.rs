//! Property-based tests for the allocation invariants and the batch
//! reduction.

use proptest::prelude::*;

use hunter_optim::{
    mix_seed, AggregateStats, Build, BuildGenerator, HunterKind, Modifiers, SimulationResult,
    TerminalCause,
};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Strategy: a Borge talent allocation with per-id levels inside each id's
/// max, so only the budget invariant decides validity.
fn borge_talents() -> impl Strategy<Value = BTreeMap<String, i32>> {
    (
        0..=2i32,  // death_is_my_companion
        0..=5i32,  // life_of_the_hunt
        0..=5i32,  // unfair_advantage
        0..=10i32, // impeccable_impacts
        0..=15i32, // presence_of_god
        0..=15i32, // fires_of_war
    )
        .prop_map(|(dimc, loth, ua, ii, pog, fow)| {
            [
                ("death_is_my_companion", dimc),
                ("life_of_the_hunt", loth),
                ("unfair_advantage", ua),
                ("impeccable_impacts", ii),
                ("presence_of_god", pog),
                ("fires_of_war", fow),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
        })
}

fn cause_strategy() -> impl Strategy<Value = TerminalCause> {
    prop_oneof![
        Just(TerminalCause::StageCap),
        Just(TerminalCause::Death),
        Just(TerminalCause::Aborted),
    ]
}

fn result_strategy() -> impl Strategy<Value = SimulationResult> {
    (0..400i32, cause_strategy(), 1.0..50_000.0f64, 0..5000i32).prop_map(
        |(stage, cause, elapsed, kills)| SimulationResult {
            final_stage: stage,
            cause,
            elapsed,
            kills,
            loot_common: stage as f64 * 3.5,
            loot_uncommon: stage as f64 * 2.5,
            loot_rare: stage as f64 * 1.5,
            total_xp: stage as f64 * 1000.0,
            damage_dealt: kills as f64 * 12.0,
            damage_taken: kills as f64 * 4.0,
            ..SimulationResult::default()
        },
    )
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

proptest! {
    // Budget invariant: a within-max talent allocation is accepted exactly
    // when its point total fits the level.
    #[test]
    fn talent_budget_decides_validity(level in 1..120i32, talents in borge_talents()) {
        let spent: i32 = talents.values().sum();
        let outcome = Build::new(
            HunterKind::Borge,
            level,
            talents,
            BTreeMap::new(),
            Modifiers::default(),
        );
        prop_assert_eq!(outcome.is_ok(), spent <= level);
    }

    // Attribute budget: 3x level, cost-weighted.
    #[test]
    fn attribute_budget_is_cost_weighted(level in 1..80i32, lvl in 0..40i32) {
        // book_of_baal costs 3 per level and needs soul_of_ares first.
        let attributes: BTreeMap<String, i32> =
            [("soul_of_ares".to_string(), 1), ("book_of_baal".to_string(), lvl.min(6))]
                .into_iter()
                .collect();
        let spent = 1 + lvl.min(6) * 3;
        let outcome = Build::new(
            HunterKind::Borge,
            level,
            BTreeMap::new(),
            attributes,
            Modifiers::default(),
        );
        prop_assert_eq!(outcome.is_ok(), spent <= level * 3);
    }

    // Aggregation is permutation-invariant up to float tolerance.
    #[test]
    fn aggregation_is_order_independent(
        mut results in prop::collection::vec(result_strategy(), 1..40),
        rotation in 0..40usize,
    ) {
        let forward = AggregateStats::from_results(&results, 0);
        let pivot = rotation % results.len();
        results.rotate_left(pivot);
        results.reverse();
        let shuffled = AggregateStats::from_results(&results, 0);

        prop_assert_eq!(forward.completed_runs, shuffled.completed_runs);
        prop_assert_eq!(forward.aborted_runs, shuffled.aborted_runs);
        prop_assert_eq!(forward.min_stage, shuffled.min_stage);
        prop_assert_eq!(forward.max_stage, shuffled.max_stage);
        prop_assert!(close(forward.avg_stage, shuffled.avg_stage));
        prop_assert!(close(forward.std_stage, shuffled.std_stage));
        prop_assert!(close(forward.avg_loot, shuffled.avg_loot));
        prop_assert!(close(forward.avg_xp, shuffled.avg_xp));
        prop_assert!(close(forward.survival_rate, shuffled.survival_rate));
    }

    // Aborted runs never contribute to the averages, whatever the mix.
    #[test]
    fn aborted_runs_never_skew_averages(
        results in prop::collection::vec(result_strategy(), 1..40),
    ) {
        let stats = AggregateStats::from_results(&results, 0);
        let completed: Vec<&SimulationResult> = results
            .iter()
            .filter(|r| r.cause != TerminalCause::Aborted)
            .collect();
        prop_assert_eq!(stats.completed_runs, completed.len());
        prop_assert_eq!(
            stats.aborted_runs,
            results.len() - completed.len()
        );
        if let Some(max) = completed.iter().map(|r| r.final_stage).max() {
            prop_assert_eq!(stats.max_stage, max);
        } else {
            prop_assert_eq!(stats.completed_runs, 0);
        }
    }

    // Every sampled allocation is valid, for every archetype.
    #[test]
    fn sampled_builds_always_validate(seed in any::<u64>(), level in 1..100i32) {
        let mut rng = SmallRng::seed_from_u64(seed);
        for kind in HunterKind::ALL {
            let generator = BuildGenerator::new(kind, level);
            let build = generator.random_build(&mut rng);
            prop_assert!(build.is_ok(), "{:?}: {:?}", kind, build.err());
        }
    }

    // Seed mixing is deterministic and sensitive to both inputs.
    #[test]
    fn seed_mixing_is_stable(top in any::<u64>(), index in 0..10_000u64) {
        prop_assert_eq!(mix_seed(top, index), mix_seed(top, index));
        prop_assert_ne!(mix_seed(top, index), mix_seed(top, index.wrapping_add(1)));
    }
}
