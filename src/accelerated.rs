//! Throughput-optimized simulation backend.
//!
//! Same combat semantics as the reference backend, different machinery: the
//! four recurring events (hunter attack, enemy attack, boss secondary, regen
//! tick) live in fixed slots instead of a heap, stuns delay the enemy slot
//! directly instead of rewriting a queue, timestamps stay exact instead of
//! being quantized, and the RNG is a seeded `fastrand` stream. Aggregates
//! agree with the reference backend within the documented parity tolerance.

use crate::build::Build;
use crate::config::{BackendKind, EngineConfig};
use crate::enemy::{BossArt, Enemy};
use crate::engine::{finish_run, CombatEngine};
use crate::error::Result;
use crate::hunter::{Dice, Hunter};
use crate::stats::TerminalCause;

struct FastDice(fastrand::Rng);

impl Dice for FastDice {
    #[inline(always)]
    fn roll(&mut self) -> f64 {
        self.0.f64()
    }
}

/// Upcoming event times for the current duel. `f64::INFINITY` marks an
/// empty slot.
struct Slots {
    hunter: f64,
    enemy: f64,
    special: f64,
    regen: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Hunter,
    Enemy,
    Special,
    Regen,
}

impl Slots {
    /// Earliest slot; priority order hunter < enemy < special < regen on
    /// exact time ties, matching the reference timeline.
    #[inline(always)]
    fn next(&self) -> Slot {
        let mut best = Slot::Hunter;
        let mut best_time = self.hunter;
        for (slot, time) in [
            (Slot::Enemy, self.enemy),
            (Slot::Special, self.special),
            (Slot::Regen, self.regen),
        ] {
            if time < best_time {
                best = slot;
                best_time = time;
            }
        }
        best
    }
}

pub struct AcceleratedEngine {
    max_stage: Option<i32>,
    action_cap: u32,
}

impl AcceleratedEngine {
    pub fn new(config: &EngineConfig) -> Self {
        AcceleratedEngine {
            max_stage: config.max_stage,
            action_cap: config.stage_action_cap,
        }
    }
}

impl CombatEngine for AcceleratedEngine {
    fn backend(&self) -> BackendKind {
        BackendKind::Accelerated
    }

    fn simulate(&self, build: &Build, seed: u64) -> Result<crate::stats::SimulationResult> {
        let mut dice = FastDice(fastrand::Rng::with_seed(seed));
        let mut hunter = Hunter::from_build(build, self.max_stage);
        let kind = hunter.kind;

        let mut elapsed: i64 = 0;
        let mut next_hunter = hunter.attack_interval(false);
        let mut next_regen = 0.0_f64;

        let cause = 'stages: loop {
            let stage = hunter.current_stage;
            let is_boss = stage % 100 == 0 && stage > 0;
            let mut enemies = if is_boss {
                vec![Enemy::boss(stage, kind)]
            } else {
                (0..10).map(|_| Enemy::regular(stage, kind)).collect::<Vec<_>>()
            };
            for enemy in &mut enemies {
                hunter.apply_spawn_effects(enemy);
            }

            let mut actions: u32 = 0;
            for enemy in &mut enemies {
                let mut slots = Slots {
                    hunter: next_hunter,
                    enemy: elapsed as f64 + enemy.speed,
                    special: if enemy.secondary != BossArt::None {
                        elapsed as f64 + enemy.secondary_cooldown
                    } else {
                        f64::INFINITY
                    },
                    regen: next_regen,
                };

                while !enemy.is_dead() && !hunter.is_dead() {
                    actions += 1;
                    if actions > self.action_cap {
                        break 'stages TerminalCause::Aborted;
                    }
                    match slots.next() {
                        Slot::Hunter => {
                            let now = slots.hunter;
                            hunter.attack(enemy, &mut dice);
                            let stun = hunter.take_pending_stun();
                            if stun > 0.0 {
                                slots.enemy += stun;
                            }
                            slots.hunter = now + hunter.attack_interval(is_boss);
                        }
                        Slot::Enemy => {
                            let now = slots.enemy;
                            hunter.receive_attack(enemy, &mut dice);
                            slots.enemy = now + enemy.speed;
                        }
                        Slot::Special => {
                            let now = slots.special;
                            match enemy.secondary {
                                BossArt::EnragingStrike => {
                                    hunter.receive_attack(enemy, &mut dice);
                                    enemy.add_enrage();
                                }
                                BossArt::HardenedCarapace => enemy.begin_harden(),
                                BossArt::None => {}
                            }
                            slots.special = now + enemy.secondary_cooldown;
                        }
                        Slot::Regen => {
                            hunter.regen_tick();
                            enemy.regen_tick();
                            elapsed += 1;
                            slots.regen = elapsed as f64;
                        }
                    }
                }

                // The hunter-attack and regen cadences persist across duels
                // and stages; the enemy slots die with the enemy.
                next_hunter = slots.hunter;
                next_regen = slots.regen;

                if hunter.is_dead() {
                    break 'stages TerminalCause::Death;
                }
                hunter.on_kill(is_boss, &mut dice);
            }

            hunter.on_stage_complete(is_boss, &mut dice);
            hunter.current_stage += 1;
            if hunter.current_stage >= hunter.max_stage {
                break 'stages TerminalCause::StageCap;
            }
        };

        finish_run(&hunter, cause, elapsed as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::HunterKind;

    #[test]
    fn same_seed_is_bit_identical() {
        let engine = AcceleratedEngine::new(&EngineConfig::default());
        let build = Build::minimal(HunterKind::Knox, 10).expect("valid");
        let a = engine.simulate(&build, 99).expect("run");
        let b = engine.simulate(&build, 99).expect("run");
        assert_eq!(a, b);
    }

    #[test]
    fn slot_ties_resolve_by_priority() {
        let slots = Slots {
            hunter: 1.0,
            enemy: 1.0,
            special: 1.0,
            regen: 1.0,
        };
        assert_eq!(slots.next(), Slot::Hunter);
        let slots = Slots {
            hunter: 2.0,
            enemy: 1.0,
            special: 1.0,
            regen: 1.0,
        };
        assert_eq!(slots.next(), Slot::Enemy);
    }

    #[test]
    fn empty_special_slot_never_fires() {
        let slots = Slots {
            hunter: 5.0,
            enemy: 4.0,
            special: f64::INFINITY,
            regen: 3.0,
        };
        assert_eq!(slots.next(), Slot::Regen);
    }

    #[test]
    fn weak_builds_terminate_with_death() {
        let engine = AcceleratedEngine::new(&EngineConfig::default());
        let build = Build::minimal(HunterKind::Borge, 1).expect("valid");
        let result = engine.simulate(&build, 5).expect("run");
        assert_eq!(result.cause, TerminalCause::Death);
    }
}
