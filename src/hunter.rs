//! Combat-ready character state derived from a [`Build`], plus the shared
//! damage-resolution primitives both backends call into.
//!
//! Modifier order is fixed so the two backends resolve combat identically:
//!
//! 1. the attacker rolls its special (crit / multistrike / salvo charge),
//! 2. damage passes through the target's damage reduction,
//! 3. on-attack hooks fire in a fixed sequence (lifesteal, heal procs,
//!    stun proc, attack-speed proc, decay stacking),
//! 4. on defense: charge-based evades, then the evade/block roll, then
//!    kind-specific mitigation layers, then main damage reduction,
//! 5. the on-lethal hook runs exactly when hp crosses zero or below;
//!    an available revive triggers there and only there.
//!
//! Archetype mechanics are dispatched over the [`KindState`] tag; there is
//! no inheritance anywhere.

use crate::build::{Build, HunterKind};
use crate::enemy::Enemy;

/// Uniform draws in `[0, 1)`. Each backend brings its own generator, so the
/// resolution code stays independent of the RNG choice.
pub trait Dice {
    fn roll(&mut self) -> f64;

    fn chance(&mut self, p: f64) -> bool {
        self.roll() < p
    }
}

/// Counters accumulated during one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CombatTally {
    pub attacks: i32,
    pub crits: i32,
    pub evades: i32,
    pub effect_procs: i32,
    pub kills: i32,
    pub damage_dealt: f64,
    pub damage_taken: f64,
}

/// Borge: melee bruiser. Stuns, reflects, burns attack-speed procs.
#[derive(Debug, Clone)]
pub struct BorgeState {
    pub impeccable_impacts: i32,
    pub fires_of_war: i32,
    pub life_of_the_hunt: i32,
    pub helltouch_barrier: i32,
    pub weakspot_analysis: i32,
    pub born_for_battle: i32,
    pub lifedrain_inhalers: i32,
    pub atlas_protocol: i32,
    /// Multiplicative damage-reduction layer, applied before main DR.
    pub minotaur_dr: f64,
    /// Pending attack-interval reduction, consumed by the next attack.
    speed_buff: f64,
}

/// Ozzy: fast striker. Multistrikes, echoes, decay stacks, charge evades.
#[derive(Debug, Clone)]
pub struct OzzyState {
    pub tricksters_boon: i32,
    pub thousand_needles: i32,
    pub crippling_shots: i32,
    pub omen_of_decay: i32,
    pub echo_bullets: i32,
    pub dance_of_dashes: i32,
    pub vectid_elixir: i32,
    pub soul_of_snek: i32,
    pub gift_of_medusa: i32,
    pub cycle_of_death: i32,
    pub deal_with_death: i32,
    /// Multiplicative damage-reduction layer, applied before main DR.
    pub scarab_dr: f64,
    trickster_charges: i32,
    decay_stacks: i32,
    empowered_ticks: i32,
}

/// Knox: salvo gunner. Blocks instead of evading, charges instead of crits.
#[derive(Debug, Clone)]
pub struct KnoxState {
    pub ghost_bullets: i32,
    pub finishing_move: i32,
    pub calypsos_advantage: i32,
    pub soul_amplification: i32,
    pub fortification_elixir: i32,
    pub block_chance: f64,
    pub charge_chance: f64,
    pub charge_gained: f64,
    pub salvo_projectiles: i32,
    souls_stacks: i32,
    block_regen_ticks: i32,
}

/// Archetype-specific mechanics behind one tag.
#[derive(Debug, Clone)]
pub enum KindState {
    Borge(BorgeState),
    Ozzy(OzzyState),
    Knox(KnoxState),
}

/// A character mid-run: derived stats plus mutable combat state.
#[derive(Debug, Clone)]
pub struct Hunter {
    pub kind: HunterKind,
    pub level: i32,
    pub max_hp: f64,
    pub hp: f64,
    pub power: f64,
    pub regen: f64,
    pub damage_reduction: f64,
    pub evade_chance: f64,
    pub effect_chance: f64,
    pub special_chance: f64,
    pub special_damage: f64,
    pub speed: f64,
    pub lifesteal: f64,
    pub loot_mult: f64,
    pub xp_mult: f64,
    pub max_stage: i32,
    pub current_stage: i32,
    pub max_revives: i32,
    pub revives_used: i32,
    // Shared talents.
    pub unfair_advantage: i32,
    pub presence_of_god: i32,
    pub omen_of_defeat: i32,
    pub call_me_lucky_loot: i32,
    /// Stun rolled by the last attack, waiting to be applied to the enemy's
    /// next action. Backends drain it via [`Hunter::take_pending_stun`].
    pending_stun: f64,
    pub state: KindState,
    pub tally: CombatTally,
}

// Gadgets boost hp/power/regen: ~0.3% per level plus a small tier bump.
fn gadget_mult(level: i32) -> f64 {
    (1.0 + level as f64 * 0.003) * 1.002_f64.powi(level / 10)
}

// Meteorite gem nodes. The third creation node scales off levels past 39.
fn gem_mults(b: &Build) -> (f64, f64, f64) {
    let creation1 = b.gem("creation_node_1") as f64;
    let creation2 = b.gem("creation_node_2") as f64;
    let creation3 = b.gem("creation_node_3") as f64;
    let over39 = (b.level() - 39).max(0) as f64;
    let shared = 1.0 + 0.02 * creation2;
    let hp = (1.0 + 0.015 * over39 * creation3) * shared * (1.0 + 0.2 * creation1);
    let power = (1.0 + 0.01 * over39 * creation3) * shared;
    let regen = (1.0 + 0.005 * over39 * creation3) * shared;
    (hp, power, regen)
}

impl Hunter {
    /// Derive combat stats from a validated build. `max_stage_override`
    /// comes from the run config; the archetype default applies otherwise.
    pub fn from_build(build: &Build, max_stage_override: Option<i32>) -> Hunter {
        let max_stage =
            max_stage_override.unwrap_or(build.catalog().economy.default_max_stage);
        match build.kind() {
            HunterKind::Borge => Self::derive_borge(build, max_stage),
            HunterKind::Ozzy => Self::derive_ozzy(build, max_stage),
            HunterKind::Knox => Self::derive_knox(build, max_stage),
        }
    }

    fn derive_borge(b: &Build, max_stage: i32) -> Hunter {
        let gadgets = gadget_mult(b.gadget("wrench_of_gore"))
            * gadget_mult(b.gadget("zaptron_533"))
            * gadget_mult(b.gadget("anchor_of_ages"));
        let (gem_hp, gem_power, gem_regen) = gem_mults(b);

        let hp_stat = b.stat("hp") as f64;
        let max_hp = (43.0 + hp_stat * (2.50 + 0.01 * (hp_stat / 5.0).floor()))
            * (1.0 + b.attribute("soul_of_ares") as f64 * 0.01)
            * (1.0 + b.relic("disk_of_dawn") as f64 * 0.03)
            * gadgets
            * gem_hp
            + b.inscryption("i3") as f64 * 6.0
            + b.inscryption("i27") as f64 * 59.15;

        let pwr_stat = b.stat("power") as f64;
        let power = (3.0
            + pwr_stat * (0.5 + 0.01 * (pwr_stat / 10.0).floor())
            + b.inscryption("i13") as f64
            + b.talent("impeccable_impacts") as f64 * 2.0)
            * (1.0 + b.attribute("soul_of_ares") as f64 * 0.002)
            * (1.0 + b.attribute("soul_of_the_minotaur") as f64 * 0.01)
            * (1.0 + b.relic("long_range_artillery_crawler") as f64 * 0.03)
            * gadgets
            * gem_power;

        let reg_stat = b.stat("regen") as f64;
        let regen = (0.02
            + reg_stat * (0.03 + 0.01 * (reg_stat / 30.0).floor())
            + b.attribute("essence_of_ylith") as f64 * 0.04)
            * (1.0 + b.attribute("essence_of_ylith") as f64 * 0.009)
            * gadgets
            * gem_regen;

        let damage_reduction = (b.stat("damage_reduction") as f64 * 0.0144
            + b.attribute("spartan_lineage") as f64 * 0.015
            + b.inscryption("i24") as f64 * 0.004
            + b.attribute("soul_of_hermes") as f64 * 0.002)
            .min(0.9);

        let evade_chance = 0.01
            + b.stat("evade_chance") as f64 * 0.0034
            + b.attribute("superior_sensors") as f64 * 0.016;

        let effect_chance = 0.04
            + b.stat("effect_chance") as f64 * 0.005
            + b.attribute("superior_sensors") as f64 * 0.012
            + b.inscryption("i11") as f64 * 0.02;

        let special_chance = 0.05
            + b.stat("special_chance") as f64 * 0.0018
            + b.attribute("explosive_punches") as f64 * 0.044
            + b.attribute("soul_of_hermes") as f64 * 0.004
            + b.inscryption("i4") as f64 * 0.0065
            + b.gem("innovation_node_3") as f64 * 0.03;

        let special_damage = 1.30
            + b.stat("special_damage") as f64 * 0.01
            + b.attribute("explosive_punches") as f64 * 0.08;

        let speed =
            (5.0 - b.stat("speed") as f64 * 0.03 - b.inscryption("i23") as f64 * 0.04).max(0.1);

        Hunter {
            kind: HunterKind::Borge,
            level: b.level(),
            max_hp,
            hp: max_hp,
            power,
            regen,
            damage_reduction,
            evade_chance,
            effect_chance,
            special_chance,
            special_damage,
            speed,
            lifesteal: b.attribute("book_of_baal") as f64 * 0.0111,
            loot_mult: b.loot_multiplier(),
            xp_mult: b.xp_multiplier(),
            max_stage,
            current_stage: 0,
            max_revives: b.talent("death_is_my_companion"),
            revives_used: 0,
            unfair_advantage: b.talent("unfair_advantage"),
            presence_of_god: b.talent("presence_of_god"),
            omen_of_defeat: b.talent("omen_of_defeat"),
            call_me_lucky_loot: b.talent("call_me_lucky_loot"),
            pending_stun: 0.0,
            state: KindState::Borge(BorgeState {
                impeccable_impacts: b.talent("impeccable_impacts"),
                fires_of_war: b.talent("fires_of_war"),
                life_of_the_hunt: b.talent("life_of_the_hunt"),
                helltouch_barrier: b.attribute("helltouch_barrier"),
                weakspot_analysis: b.attribute("weakspot_analysis"),
                born_for_battle: b.attribute("born_for_battle"),
                lifedrain_inhalers: b.attribute("lifedrain_inhalers"),
                atlas_protocol: b.attribute("atlas_protocol"),
                minotaur_dr: b.attribute("soul_of_the_minotaur") as f64 * 0.01,
                speed_buff: 0.0,
            }),
            tally: CombatTally::default(),
        }
    }

    fn derive_ozzy(b: &Build, max_stage: i32) -> Hunter {
        let gadgets = gadget_mult(b.gadget("wrench_of_gore"))
            * gadget_mult(b.gadget("zaptron_533"))
            * gadget_mult(b.gadget("anchor_of_ages"));
        let (gem_hp, gem_power, gem_regen) = gem_mults(b);
        let level = b.level();
        let level_mult = 1.001_f64.powi(level) * 1.02_f64.powi(level / 10);
        let lotl = 1.0 + b.attribute("living_off_the_land") as f64 * 0.02;
        let cat = b.attribute("blessings_of_the_cat");

        let hp_stat = b.stat("hp") as f64;
        let max_hp = (16.0 + hp_stat * (2.0 + 0.03 * (hp_stat / 5.0).floor()))
            * lotl
            * (1.0 + b.relic("disk_of_dawn") as f64 * 0.03)
            * gadgets
            * gem_hp;

        let pwr_stat = b.stat("power") as f64;
        let power = (2.0 + pwr_stat * (0.3 + 0.01 * (pwr_stat / 10.0).floor()))
            * level_mult
            * (1.0 + b.attribute("exo_piercers") as f64 * 0.012)
            * (1.0 + cat as f64 * 0.02)
            * (1.0 + b.relic("bee_gone_companion_drone") as f64 * 0.03)
            * gadgets
            * gem_power;

        let reg_stat = b.stat("regen") as f64;
        let regen = (0.1 + reg_stat * (0.05 + 0.01 * (reg_stat / 30.0).floor()))
            * lotl
            * gadgets
            * gem_regen;

        let damage_reduction = (b.stat("damage_reduction") as f64 * 0.0035
            + b.attribute("wings_of_ibu") as f64 * 0.026
            + b.inscryption("i37") as f64 * 0.0111)
            .min(0.9);

        let evade_chance = 0.05
            + b.stat("evade_chance") as f64 * 0.0062
            + b.attribute("wings_of_ibu") as f64 * 0.005;

        let effect_chance = 0.04
            + b.stat("effect_chance") as f64 * 0.0035
            + b.attribute("extermination_protocol") as f64 * 0.028
            + b.inscryption("i31") as f64 * 0.006;

        let special_chance = 0.05
            + b.stat("special_chance") as f64 * 0.0038
            + b.inscryption("i40") as f64 * 0.005
            + b.gem("innovation_node_3") as f64 * 0.03;
        let special_damage = 0.25 + b.stat("special_damage") as f64 * 0.01;

        let speed = ((4.0
            - b.stat("speed") as f64 * 0.0418
            - b.inscryption("i36") as f64 * 0.03
            - b.talent("thousand_needles") as f64 * 0.06)
            * (1.0 - cat as f64 * 0.004))
            .max(0.1);

        Hunter {
            kind: HunterKind::Ozzy,
            level,
            max_hp,
            hp: max_hp,
            power,
            regen,
            damage_reduction,
            evade_chance,
            effect_chance,
            special_chance,
            special_damage,
            speed,
            lifesteal: b.attribute("shimmering_scorpion") as f64 * 0.033,
            loot_mult: b.loot_multiplier(),
            xp_mult: b.xp_multiplier(),
            max_stage,
            current_stage: 0,
            max_revives: b.talent("death_is_my_companion")
                + b.attribute("blessings_of_the_sisters"),
            revives_used: 0,
            unfair_advantage: b.talent("unfair_advantage"),
            presence_of_god: 0,
            omen_of_defeat: 0,
            call_me_lucky_loot: b.talent("call_me_lucky_loot"),
            pending_stun: 0.0,
            state: KindState::Ozzy(OzzyState {
                tricksters_boon: b.talent("tricksters_boon"),
                thousand_needles: b.talent("thousand_needles"),
                crippling_shots: b.talent("crippling_shots"),
                omen_of_decay: b.talent("omen_of_decay"),
                echo_bullets: b.talent("echo_bullets"),
                dance_of_dashes: b.attribute("dance_of_dashes"),
                vectid_elixir: b.attribute("vectid_elixir"),
                soul_of_snek: b.attribute("soul_of_snek"),
                gift_of_medusa: b.attribute("gift_of_medusa"),
                cycle_of_death: b.attribute("cycle_of_death"),
                deal_with_death: b.attribute("deal_with_death"),
                scarab_dr: b.attribute("blessings_of_the_scarab") as f64 * 0.01,
                trickster_charges: 0,
                decay_stacks: 0,
                empowered_ticks: 0,
            }),
            tally: CombatTally::default(),
        }
    }

    fn derive_knox(b: &Build, max_stage: i32) -> Hunter {
        let kraken = 1.0 + b.attribute("release_the_kraken") as f64 * 0.005;
        let (gem_hp, gem_power, gem_regen) = gem_mults(b);

        let hp_stat = b.stat("hp") as f64;
        let max_hp = (20.0 + hp_stat * (2.0 + hp_stat / 50.0))
            * kraken
            * (1.0 + b.relic("disk_of_dawn") as f64 * 0.03)
            * gem_hp;

        let pwr_stat = b.stat("power") as f64;
        let power = (1.2 + pwr_stat * (0.06 + pwr_stat / 1000.0)) * kraken * gem_power;

        let reg_stat = b.stat("regen") as f64;
        let regen = (0.05 + reg_stat * (0.01 + reg_stat * 0.00075)) * gem_regen;

        let pirates = b.attribute("a_pirates_life_for_knox") as f64;
        let damage_reduction =
            (b.stat("damage_reduction") as f64 * 0.01 + pirates * 0.009).min(0.9);
        let block_chance = 0.05
            + b.stat("block_chance") as f64 * 0.005
            + b.attribute("fortification_elixir") as f64 * 0.01
            + pirates * 0.008;
        let effect_chance = 0.04
            + b.stat("effect_chance") as f64 * 0.004
            + b.attribute("serious_efficiency") as f64 * 0.02
            + pirates * 0.007;
        let charge_chance = 0.05
            + b.stat("charge_chance") as f64 * 0.003
            + b.attribute("serious_efficiency") as f64 * 0.01
            + pirates * 0.006;
        let charge_gained = 1.0
            + b.stat("charge_gained") as f64 * 0.01
            + b.attribute("shield_of_poseidon") as f64 * 0.1;

        let speed = (8.0 - b.stat("reload_time") as f64 * 0.08).max(0.1);

        Hunter {
            kind: HunterKind::Knox,
            level: b.level(),
            max_hp,
            hp: max_hp,
            power,
            regen,
            damage_reduction,
            evade_chance: 0.0,
            effect_chance,
            special_chance: 0.10,
            special_damage: 1.0 + b.talent("finishing_move") as f64 * 0.2,
            speed,
            lifesteal: 0.0,
            loot_mult: b.loot_multiplier(),
            xp_mult: b.xp_multiplier(),
            max_stage,
            current_stage: 0,
            max_revives: b.talent("death_is_my_companion"),
            revives_used: 0,
            unfair_advantage: b.talent("unfair_advantage"),
            presence_of_god: b.talent("presence_of_god"),
            omen_of_defeat: b.talent("omen_of_defeat"),
            call_me_lucky_loot: b.talent("call_me_lucky_loot"),
            pending_stun: 0.0,
            state: KindState::Knox(KnoxState {
                ghost_bullets: b.talent("ghost_bullets"),
                finishing_move: b.talent("finishing_move"),
                calypsos_advantage: b.talent("calypsos_advantage"),
                soul_amplification: b.attribute("soul_amplification"),
                fortification_elixir: b.attribute("fortification_elixir"),
                block_chance,
                charge_chance,
                charge_gained,
                salvo_projectiles: 3 + b.stat("projectiles_per_salvo"),
                souls_stacks: 0,
                block_regen_ticks: 0,
            }),
            tally: CombatTally::default(),
        }
    }

    pub fn is_dead(&self) -> bool {
        self.hp <= 0.0
    }

    /// Attack power after state-dependent bonuses.
    pub fn effective_power(&self) -> f64 {
        match &self.state {
            KindState::Borge(s) if s.born_for_battle > 0 && self.max_hp > 0.0 => {
                let missing_pct = (self.max_hp - self.hp) / self.max_hp * 100.0;
                self.power * (1.0 + missing_pct * s.born_for_battle as f64 * 0.001)
            }
            _ => self.power,
        }
    }

    /// Effect chance, with the boss-focused protocol bonus where present.
    pub fn effective_effect_chance(&self, is_boss: bool) -> f64 {
        match &self.state {
            KindState::Borge(s) if is_boss && s.atlas_protocol > 0 => {
                self.effect_chance + s.atlas_protocol as f64 * 0.014
            }
            _ => self.effect_chance,
        }
    }

    /// Seconds until the next attack. Consumes any pending attack-speed
    /// buff, so each proc shortens exactly one swing.
    pub fn attack_interval(&mut self, is_boss: bool) -> f64 {
        let mut interval = self.speed;
        if let KindState::Borge(s) = &mut self.state {
            if is_boss && s.atlas_protocol > 0 {
                interval *= 1.0 - s.atlas_protocol as f64 * 0.04;
            }
            if s.speed_buff > 0.0 {
                interval -= s.speed_buff;
                s.speed_buff = 0.0;
            }
        }
        interval.max(0.1)
    }

    /// Stun rolled by the last attack, if any. Resets on read.
    pub fn take_pending_stun(&mut self) -> f64 {
        std::mem::take(&mut self.pending_stun)
    }

    /// Deterministic on-spawn debuffs applied to a fresh enemy. Halved
    /// against bosses.
    pub fn apply_spawn_effects(&self, enemy: &mut Enemy) {
        let stage_effect = if enemy.is_boss { 0.5 } else { 1.0 };
        if self.presence_of_god > 0 {
            match self.kind {
                // Shaves starting hp for Borge, attack power for Knox.
                HunterKind::Knox => {
                    enemy.power *= 1.0 - self.presence_of_god as f64 * 0.03 * stage_effect;
                }
                _ => {
                    enemy.hp = enemy.max_hp
                        * (1.0 - self.presence_of_god as f64 * 0.04 * stage_effect);
                }
            }
        }
        if self.omen_of_defeat > 0 {
            enemy.regen *= 1.0 - self.omen_of_defeat as f64 * 0.08 * stage_effect;
        }
        if let KindState::Ozzy(s) = &self.state {
            if s.soul_of_snek > 0 {
                enemy.regen *= (1.0 - 0.088 * s.soul_of_snek as f64).max(0.0);
            }
            if s.gift_of_medusa > 0 {
                enemy.regen = (enemy.regen - self.regen * s.gift_of_medusa as f64 * 0.06).max(0.0);
            }
        }
    }

    /// One full attack against `enemy`, including every on-attack hook.
    pub fn attack(&mut self, enemy: &mut Enemy, dice: &mut impl Dice) {
        let is_boss = enemy.is_boss;
        let effect_chance = self.effective_effect_chance(is_boss);
        let power = self.effective_power();
        self.tally.attacks += 1;

        match &mut self.state {
            KindState::Borge(s) => {
                let damage = if dice.chance(self.special_chance) {
                    self.tally.crits += 1;
                    power * self.special_damage
                } else {
                    power
                };
                enemy.take_damage(damage);
                self.tally.damage_dealt += damage;

                // On-attack hooks, fixed order.
                if self.lifesteal > 0.0 {
                    self.hp = (self.hp + damage * self.lifesteal).min(self.max_hp);
                }
                if s.life_of_the_hunt > 0 && dice.chance(effect_chance) {
                    let heal = damage * s.life_of_the_hunt as f64 * 0.06;
                    self.hp = (self.hp + heal).min(self.max_hp);
                    self.tally.effect_procs += 1;
                }
                if s.impeccable_impacts > 0 && dice.chance(effect_chance) {
                    let stun_effect = if is_boss { 0.5 } else { 1.0 };
                    self.pending_stun = s.impeccable_impacts as f64 * 0.1 * stun_effect;
                    self.tally.effect_procs += 1;
                }
                if s.fires_of_war > 0 && dice.chance(effect_chance) {
                    s.speed_buff = s.fires_of_war as f64 * 0.1;
                    self.tally.effect_procs += 1;
                }
            }
            KindState::Ozzy(s) => {
                if s.tricksters_boon > 0 && dice.chance(effect_chance / 2.0) {
                    s.trickster_charges += 1;
                    self.tally.effect_procs += 1;
                }
                let multistrike = dice.chance(self.special_chance);
                if s.thousand_needles > 0 && dice.chance(effect_chance) {
                    let stun_effect = if is_boss { 0.5 } else { 1.0 };
                    self.pending_stun = s.thousand_needles as f64 * 0.05 * stun_effect;
                    self.tally.effect_procs += 1;
                }
                let echo = s.echo_bullets > 0 && dice.chance(effect_chance / 2.0);
                if echo {
                    self.tally.effect_procs += 1;
                }

                // Decay stacks burn off into bonus damage on this hit.
                let cripple_factor = if is_boss { 0.1 } else { 1.0 };
                let cripple = enemy.hp * s.decay_stacks as f64 * 0.008 * cripple_factor;
                s.decay_stacks = 0;
                let omen_mult = if s.omen_of_decay > 0 && dice.chance(effect_chance / 2.0) {
                    self.tally.effect_procs += 1;
                    1.0 + s.omen_of_decay as f64 * 0.03
                } else {
                    1.0
                };

                let empowered = s.empowered_ticks > 0;
                let snek = s.soul_of_snek;
                let mut lifesteal_heal = 0.0;
                let mut hits = vec![(power + cripple) * omen_mult];
                if multistrike {
                    self.tally.crits += 1;
                    hits.push(power * self.special_damage);
                }
                if echo {
                    hits.push(power * s.echo_bullets as f64 * 0.05);
                }
                for &hit in &hits {
                    enemy.take_damage(hit);
                    self.tally.damage_dealt += hit;
                    if self.lifesteal > 0.0 {
                        let mut heal = hit * self.lifesteal;
                        if empowered {
                            heal *= 1.0 + snek as f64 * 0.15;
                        }
                        lifesteal_heal += heal;
                    }
                    if s.crippling_shots > 0 && dice.chance(effect_chance) {
                        s.decay_stacks += s.crippling_shots;
                        self.tally.effect_procs += 1;
                    }
                }
                self.hp = (self.hp + lifesteal_heal).min(self.max_hp);
            }
            KindState::Knox(s) => {
                let mut projectiles = s.salvo_projectiles.max(1);
                if s.ghost_bullets > 0 && dice.chance(s.ghost_bullets as f64 * 0.0667) {
                    projectiles += 1;
                    self.tally.effect_procs += 1;
                }
                let mut salvo_damage = 0.0;
                for i in 0..projectiles {
                    let mut bullet = power;
                    if dice.chance(s.charge_chance) {
                        bullet *= 1.0 + s.charge_gained;
                        self.tally.crits += 1;
                    }
                    if i == projectiles - 1
                        && s.finishing_move > 0
                        && dice.chance(effect_chance * 2.0)
                    {
                        bullet *= self.special_damage;
                        self.tally.effect_procs += 1;
                    }
                    salvo_damage += bullet;
                }
                enemy.take_damage(salvo_damage);
                self.tally.damage_dealt += salvo_damage;
            }
        }
    }

    /// Resolve an incoming enemy attack, through to the on-lethal hook.
    pub fn receive_attack(&mut self, attacker: &mut Enemy, dice: &mut impl Dice) {
        let is_special = dice.chance(attacker.special_chance);
        let raw = if is_special {
            attacker.power * attacker.special_damage
        } else {
            attacker.power
        };

        match &mut self.state {
            KindState::Borge(s) => {
                if dice.chance(self.evade_chance) {
                    self.tally.evades += 1;
                    return;
                }
                let mut damage = raw;
                if s.minotaur_dr > 0.0 {
                    damage *= 1.0 - s.minotaur_dr;
                }
                if is_special && s.weakspot_analysis > 0 {
                    damage *= 1.0 - s.weakspot_analysis as f64 * 0.11;
                }
                let landed = damage * (1.0 - self.damage_reduction);
                self.hp -= landed;
                self.tally.damage_taken += landed;
                // Reflection bypasses the attacker's own damage reduction.
                if s.helltouch_barrier > 0 && landed > 0.0 {
                    let factor = if attacker.is_boss { 0.1 } else { 1.0 };
                    attacker.hp -= landed * s.helltouch_barrier as f64 * 0.08 * factor;
                }
            }
            KindState::Ozzy(s) => {
                // Charge-based evades are checked before the evade roll.
                if s.trickster_charges > 0 {
                    s.trickster_charges -= 1;
                    self.tally.evades += 1;
                    return;
                }
                if dice.chance(self.evade_chance) {
                    self.tally.evades += 1;
                    return;
                }
                let landed = raw * (1.0 - s.scarab_dr) * (1.0 - self.damage_reduction);
                self.hp -= landed;
                self.tally.damage_taken += landed;
                if is_special
                    && s.dance_of_dashes > 0
                    && dice.chance(s.dance_of_dashes as f64 * 0.05)
                {
                    s.trickster_charges += 1;
                    self.tally.effect_procs += 1;
                }
            }
            KindState::Knox(s) => {
                let mut damage = raw;
                if dice.chance(s.block_chance) {
                    damage *= 0.5;
                    self.tally.evades += 1;
                    if s.fortification_elixir > 0 {
                        s.block_regen_ticks = 5;
                    }
                }
                let landed = damage * (1.0 - self.damage_reduction);
                self.hp -= landed;
                self.tally.damage_taken += landed;
            }
        }

        // On-lethal hook: the revive fires exactly when hp crosses zero,
        // never pre-emptively.
        if self.is_dead() {
            self.try_revive();
        }
    }

    fn try_revive(&mut self) -> bool {
        if self.revives_used >= self.max_revives {
            return false;
        }
        self.revives_used += 1;
        self.hp = self.max_hp * 0.8;
        if let KindState::Ozzy(s) = &self.state {
            // Death-cycle attributes grow stronger per revive spent.
            self.special_chance += s.cycle_of_death as f64 * 0.023;
            self.special_damage += s.cycle_of_death as f64 * 0.02;
            self.power *= 1.0 + s.deal_with_death as f64 * 0.02;
            self.damage_reduction =
                (self.damage_reduction + s.deal_with_death as f64 * 0.016).min(0.95);
        }
        true
    }

    /// On-kill hook: loot proc and kill-triggered heals.
    pub fn on_kill(&mut self, is_boss: bool, dice: &mut impl Dice) {
        self.tally.kills += 1;
        let effect_chance = self.effective_effect_chance(is_boss);
        if !is_boss && self.call_me_lucky_loot > 0 && dice.chance(effect_chance) {
            self.tally.effect_procs += 1;
        }
        if self.unfair_advantage > 0 && dice.chance(effect_chance) {
            let heal = self.max_hp * 0.02 * self.unfair_advantage as f64;
            self.hp = (self.hp + heal).min(self.max_hp);
            self.tally.effect_procs += 1;
            if let KindState::Ozzy(s) = &mut self.state {
                if s.vectid_elixir > 0 {
                    s.empowered_ticks += 5;
                }
            }
        }
    }

    /// Stage-clear hook: soul stacks for the salvo archetype.
    pub fn on_stage_complete(&mut self, is_boss: bool, dice: &mut impl Dice) {
        let effect_chance = self.effective_effect_chance(is_boss);
        if let KindState::Knox(s) = &mut self.state {
            if s.calypsos_advantage > 0 && dice.chance(effect_chance * 2.5) {
                let cap = 100 + s.soul_amplification * 10;
                if s.souls_stacks < cap {
                    s.souls_stacks += 1;
                    self.tally.effect_procs += 1;
                }
            }
        }
    }

    /// One regen tick.
    pub fn regen_tick(&mut self) {
        if self.hp >= self.max_hp || self.hp <= 0.0 {
            return;
        }
        let mut amount = self.regen;
        match &mut self.state {
            KindState::Ozzy(s) => {
                if s.empowered_ticks > 0 {
                    s.empowered_ticks -= 1;
                    amount *= 1.0 + s.soul_of_snek as f64 * 0.15;
                }
            }
            KindState::Knox(s) => {
                if s.block_regen_ticks > 0 {
                    s.block_regen_ticks -= 1;
                    amount *= 1.0 + s.fortification_elixir as f64 * 0.10;
                }
            }
            KindState::Borge(s) => {
                if s.lifedrain_inhalers > 0 {
                    amount += (self.max_hp - self.hp) * 0.0008 * s.lifedrain_inhalers as f64;
                }
            }
        }
        self.hp = (self.hp + amount).min(self.max_hp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::Build;

    struct FixedDice(f64);

    impl Dice for FixedDice {
        fn roll(&mut self) -> f64 {
            self.0
        }
    }

    fn hunter(kind: HunterKind) -> Hunter {
        let build = Build::minimal(kind, 10).expect("valid build");
        Hunter::from_build(&build, None)
    }

    #[test]
    fn derived_stats_are_positive() {
        for kind in HunterKind::ALL {
            let h = hunter(kind);
            assert!(h.max_hp > 0.0, "{kind:?}");
            assert!(h.power > 0.0, "{kind:?}");
            assert!(h.speed > 0.0, "{kind:?}");
        }
    }

    #[test]
    fn revive_fires_exactly_at_lethal_damage() {
        let mut h = hunter(HunterKind::Borge);
        h.max_revives = 1;
        let mut enemy = Enemy::regular(1, HunterKind::Borge);
        enemy.power = h.max_hp * 100.0;
        // Roll of 0.99 fails the evade and crit chances.
        let mut dice = FixedDice(0.99);
        h.receive_attack(&mut enemy, &mut dice);
        assert!(!h.is_dead());
        assert_eq!(h.revives_used, 1);
        assert!((h.hp - h.max_hp * 0.8).abs() < 1e-9);
        // Second lethal hit has no revive left.
        h.receive_attack(&mut enemy, &mut dice);
        assert!(h.is_dead());
    }

    #[test]
    fn sub_lethal_damage_consumes_no_revive() {
        let mut h = hunter(HunterKind::Borge);
        h.max_revives = 2;
        let mut enemy = Enemy::regular(1, HunterKind::Borge);
        enemy.power = 1.0;
        let mut dice = FixedDice(0.99);
        h.receive_attack(&mut enemy, &mut dice);
        assert_eq!(h.revives_used, 0);
    }

    #[test]
    fn knox_block_halves_damage() {
        let mut h = hunter(HunterKind::Knox);
        h.damage_reduction = 0.0;
        let before = h.hp;
        let mut enemy = Enemy::regular(1, HunterKind::Knox);
        enemy.power = 10.0;
        enemy.special_chance = 0.0;
        // Roll of 0.0 always blocks.
        let mut dice = FixedDice(0.0);
        h.receive_attack(&mut enemy, &mut dice);
        assert!((before - h.hp - 5.0).abs() < 1e-9);
    }

    #[test]
    fn trickster_charge_preempts_the_evade_roll() {
        let mut h = hunter(HunterKind::Ozzy);
        if let KindState::Ozzy(s) = &mut h.state {
            s.trickster_charges = 1;
        }
        let before = h.hp;
        let mut enemy = Enemy::regular(1, HunterKind::Ozzy);
        enemy.power = 50.0;
        let mut dice = FixedDice(0.99);
        h.receive_attack(&mut enemy, &mut dice);
        assert_eq!(h.hp, before);
        h.receive_attack(&mut enemy, &mut dice);
        assert!(h.hp < before);
    }

    #[test]
    fn attack_speed_proc_is_consumed_once() {
        let mut h = hunter(HunterKind::Borge);
        if let KindState::Borge(s) = &mut h.state {
            s.speed_buff = 1.0;
        }
        let boosted = h.attack_interval(false);
        let normal = h.attack_interval(false);
        assert!(boosted < normal);
        assert_eq!(normal, h.speed);
    }

    #[test]
    fn gem_nodes_raise_derived_stats() {
        use crate::build::Modifiers;
        use std::collections::BTreeMap;

        let base = hunter(HunterKind::Knox);
        let modifiers = Modifiers {
            gems: [
                ("creation_node_1".to_string(), 1),
                ("creation_node_2".to_string(), 5),
            ]
            .into_iter()
            .collect(),
            ..Modifiers::default()
        };
        let build = Build::new(
            HunterKind::Knox,
            10,
            BTreeMap::new(),
            BTreeMap::new(),
            modifiers,
        )
        .expect("valid build");
        let boosted = Hunter::from_build(&build, None);
        assert!(boosted.max_hp > base.max_hp);
        assert!(boosted.power > base.power);
        assert!(boosted.regen > base.regen);
    }

    #[test]
    fn spawn_effects_reduce_enemy_regen() {
        let mut h = hunter(HunterKind::Borge);
        h.omen_of_defeat = 5;
        let mut enemy = Enemy::regular(50, HunterKind::Borge);
        let before = enemy.regen;
        h.apply_spawn_effects(&mut enemy);
        assert!(enemy.regen < before);
    }
}
