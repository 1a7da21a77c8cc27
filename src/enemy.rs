//! Stage-scaled enemy and boss generation.
//!
//! Enemy strength is a pure function of (stage, archetype, boss flag), so
//! both backends construct identical opponents. Bosses carry multi-phase
//! behavior: enrage stacking that ramps attack speed and eventually triples
//! power, and for one archetype a harden phase with near-total damage
//! reduction.

use crate::build::HunterKind;

/// Secondary attack wired to a boss, fired on its own cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BossArt {
    None,
    /// Extra attack that also adds an enrage stack.
    EnragingStrike,
    /// 95% damage reduction and tripled regen for five ticks, enrage burst
    /// when it wears off.
    HardenedCarapace,
}

#[derive(Debug, Clone, Copy)]
struct ScaledStats {
    hp: f64,
    power: f64,
    regen: f64,
    special_chance: f64,
    special_damage: f64,
    damage_reduction: f64,
    speed: f64,
}

/// One opponent in the encounter loop.
#[derive(Debug, Clone)]
pub struct Enemy {
    pub hp: f64,
    pub max_hp: f64,
    pub power: f64,
    base_power: f64,
    pub regen: f64,
    pub damage_reduction: f64,
    base_dr: f64,
    pub special_chance: f64,
    pub special_damage: f64,
    pub speed: f64,
    base_speed: f64,
    pub is_boss: bool,
    pub secondary: BossArt,
    /// Seconds between secondary attacks; 0 when there is none.
    pub secondary_cooldown: f64,
    base_secondary_cooldown: f64,
    enrage_stacks: i32,
    harden_ticks: i32,
}

/// Enrage stacks past this point flip the boss into its final phase.
const MAX_ENRAGE_STACKS: i32 = 200;

impl Enemy {
    /// A regular enemy for a stage.
    pub fn regular(stage: i32, kind: HunterKind) -> Enemy {
        Enemy::from_stats(Self::scaled_stats(stage, kind, false), false, BossArt::None, 0.0)
    }

    /// The boss for a boss stage. Secondary attacks appear from stage 200.
    pub fn boss(stage: i32, kind: HunterKind) -> Enemy {
        let stats = Self::scaled_stats(stage, kind, true);
        let (art, cooldown) = if stage >= 200 {
            match kind {
                HunterKind::Borge => (BossArt::EnragingStrike, stats.speed * 1.8),
                HunterKind::Ozzy => (BossArt::HardenedCarapace, 60.0),
                HunterKind::Knox => (BossArt::None, 0.0),
            }
        } else {
            (BossArt::None, 0.0)
        };
        Enemy::from_stats(stats, true, art, cooldown)
    }

    fn from_stats(stats: ScaledStats, is_boss: bool, secondary: BossArt, cooldown: f64) -> Enemy {
        Enemy {
            hp: stats.hp,
            max_hp: stats.hp,
            power: stats.power,
            base_power: stats.power,
            regen: stats.regen,
            damage_reduction: stats.damage_reduction,
            base_dr: stats.damage_reduction,
            special_chance: stats.special_chance,
            special_damage: stats.special_damage,
            speed: stats.speed,
            base_speed: stats.speed,
            is_boss,
            secondary,
            secondary_cooldown: cooldown,
            base_secondary_cooldown: cooldown,
            enrage_stacks: 0,
            harden_ticks: 0,
        }
    }

    /// Late-stage difficulty ramp shared by the Borge and Ozzy ladders:
    /// additive breakpoints, then an exponential tail past stage 350.
    fn late_stage_scaling(stage: i32) -> f64 {
        let s = stage as f64;
        let mut f = 1.0;
        for &(from, rate) in &[
            (149.0, 0.006),
            (199.0, 0.006),
            (249.0, 0.006),
            (299.0, 0.006),
            (309.0, 0.003),
            (319.0, 0.003),
            (329.0, 0.004),
            (339.0, 0.004),
            (349.0, 0.005),
            (359.0, 0.005),
            (369.0, 0.006),
            (379.0, 0.006),
            (389.0, 0.007),
        ] {
            f += ((s - from) * rate).max(0.0);
        }
        f.max(1.0) * 1.01_f64.powi((stage - 350).max(0))
    }

    /// The Knox ladder scales multiplicatively instead, and only past 150.
    fn knox_stage_scaling(stage: i32) -> f64 {
        if stage < 150 {
            return 1.0;
        }
        let s = stage as f64;
        let mut f = 1.0;
        for &from in &[149, 199, 249, 299, 349, 369, 389, 409, 429] {
            if stage > from {
                f *= 1.0 + (s - from as f64) * 0.007;
            }
        }
        f * 1.01_f64.powi((stage - 400).max(0))
    }

    fn scaled_stats(stage: i32, kind: HunterKind, is_boss: bool) -> ScaledStats {
        let s = stage as f64;
        let cycles = ((stage - 1).max(0) / 100) as f64;
        let boss = |m: f64| if is_boss { m } else { 1.0 };

        match kind {
            HunterKind::Borge => {
                let f = Self::late_stage_scaling(stage);
                let tier = if stage > 100 { 2.85 } else { 1.0 };
                ScaledStats {
                    hp: (s * 4.0 + 9.0) * f * tier * boss(90.0),
                    power: (s * 0.7 + 2.5) * f * tier * boss(3.63),
                    regen: (s - 1.0).max(0.0)
                        * 0.08
                        * if stage > 100 { 1.052 } else { 1.0 }
                        * f
                        * boss(1.92),
                    special_chance: (s * 0.0004 + 0.0322 + if is_boss { 0.04 } else { 0.0 })
                        .min(0.25),
                    special_damage: (s * 0.008 + 1.212).min(2.5),
                    damage_reduction: if is_boss { (0.05 + s * 0.0004).min(0.25) } else { 0.0 },
                    speed: (4.53 - s * 0.006) * boss(2.42),
                }
            }
            HunterKind::Ozzy => {
                let f = Self::late_stage_scaling(stage);
                ScaledStats {
                    hp: (s * 6.0 + 11.0) * f * 2.9_f64.powf(cycles) * boss(48.0),
                    power: (s * 0.75 + 1.35) * f * 2.7_f64.powf(cycles) * boss(3.0),
                    regen: (s - 1.0).max(0.0) * 0.1 * 1.25_f64.powf(cycles) * f * boss(6.0),
                    special_chance: (s * 0.0006 + 0.0994 + if is_boss { 0.13 } else { 0.0 })
                        .min(0.25),
                    special_damage: (s * 0.008 + 1.03).min(2.5),
                    damage_reduction: if is_boss { (0.05 + s * 0.0004).min(0.25) } else { 0.0 },
                    speed: (3.2 - s * 0.004) * boss(2.45),
                }
            }
            HunterKind::Knox => {
                let f = Self::knox_stage_scaling(stage);
                let hp_tier = if stage > 100 { 2.8 } else { 1.0 };
                let power_tier = if stage > 100 { 2.6 } else { 1.0 };
                ScaledStats {
                    hp: (s * 5.0 + 10.0) * f * hp_tier * boss(120.0),
                    power: (s * 0.65 + 1.5) * f * power_tier * boss(4.0),
                    regen: (s - 1.0).max(0.0)
                        * 0.09
                        * if stage > 100 { 1.15 } else { 1.0 }
                        * f
                        * boss(2.0),
                    special_chance: (s * 0.00055 + 0.075 + if is_boss { 0.13 } else { 0.0 })
                        .min(0.25),
                    special_damage: (s * 0.0075 + 1.15).min(2.5),
                    damage_reduction: if is_boss { 0.05 } else { 0.0 },
                    speed: (3.8 - s * 0.005) * boss(2.85),
                }
            }
        }
    }

    pub fn is_dead(&self) -> bool {
        self.hp <= 0.0
    }

    /// Apply incoming damage through this enemy's damage reduction; returns
    /// the amount that actually landed.
    pub fn take_damage(&mut self, damage: f64) -> f64 {
        let landed = damage * (1.0 - self.damage_reduction);
        self.hp -= landed;
        landed
    }

    /// One regen tick. Drives the harden phase countdown as a side effect.
    pub fn regen_tick(&mut self) {
        if self.hp <= 0.0 || self.hp >= self.max_hp {
            return;
        }
        if self.harden_ticks > 0 {
            self.hp = (self.hp + self.regen * 3.0).min(self.max_hp);
            self.harden_ticks -= 1;
            if self.harden_ticks == 0 {
                self.end_harden();
            }
        } else {
            self.hp = (self.hp + self.regen).min(self.max_hp);
        }
    }

    pub fn begin_harden(&mut self) {
        self.harden_ticks = 5;
        self.damage_reduction = 0.95;
    }

    fn end_harden(&mut self) {
        self.damage_reduction = self.base_dr;
        for _ in 0..5 {
            self.add_enrage();
        }
    }

    /// Each stack shortens the attack interval toward a floor; past
    /// [`MAX_ENRAGE_STACKS`] the boss enters its final phase: triple power
    /// and guaranteed specials.
    pub fn add_enrage(&mut self) {
        if !self.is_boss {
            return;
        }
        self.enrage_stacks += 1;
        let ramp = (self.enrage_stacks as f64 / MAX_ENRAGE_STACKS as f64).min(1.0);
        self.speed = (self.base_speed * (1.0 - ramp)).max(0.5);
        if self.base_secondary_cooldown > 0.0 {
            self.secondary_cooldown = (self.base_secondary_cooldown * (1.0 - ramp)).max(0.5);
        }
        if self.enrage_stacks > MAX_ENRAGE_STACKS {
            self.power = self.base_power * 3.0;
            self.special_chance = 1.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bosses_outclass_regular_enemies() {
        for kind in HunterKind::ALL {
            let regular = Enemy::regular(100, kind);
            let boss = Enemy::boss(100, kind);
            assert!(boss.max_hp > regular.max_hp * 10.0, "{kind:?}");
            assert!(boss.power > regular.power, "{kind:?}");
        }
    }

    #[test]
    fn stage_scaling_is_monotonic_in_hp() {
        for kind in HunterKind::ALL {
            let mut prev = 0.0;
            for stage in 1..400 {
                let e = Enemy::regular(stage, kind);
                assert!(e.max_hp > prev, "{kind:?} stage {stage}");
                prev = e.max_hp;
            }
        }
    }

    #[test]
    fn secondary_attacks_start_at_stage_200() {
        assert_eq!(Enemy::boss(100, HunterKind::Borge).secondary, BossArt::None);
        assert_eq!(
            Enemy::boss(200, HunterKind::Borge).secondary,
            BossArt::EnragingStrike
        );
        assert_eq!(
            Enemy::boss(200, HunterKind::Ozzy).secondary,
            BossArt::HardenedCarapace
        );
        assert_eq!(Enemy::boss(300, HunterKind::Knox).secondary, BossArt::None);
    }

    #[test]
    fn enrage_caps_out_in_a_final_phase() {
        let mut boss = Enemy::boss(200, HunterKind::Borge);
        let base_power = boss.power;
        for _ in 0..=MAX_ENRAGE_STACKS {
            boss.add_enrage();
        }
        assert_eq!(boss.power, base_power * 3.0);
        assert_eq!(boss.special_chance, 1.0);
        assert!(boss.speed >= 0.5);
    }

    #[test]
    fn harden_restores_damage_reduction_when_it_ends() {
        let mut boss = Enemy::boss(200, HunterKind::Ozzy);
        let base_dr = boss.damage_reduction;
        boss.hp = boss.max_hp / 2.0;
        boss.begin_harden();
        assert_eq!(boss.damage_reduction, 0.95);
        for _ in 0..5 {
            boss.regen_tick();
        }
        assert_eq!(boss.damage_reduction, base_dr);
    }
}
