//! Per-archetype allocation tables and economy coefficients.
//!
//! Everything a build can spend points on is described here: talent and
//! attribute ids, point costs, per-id maxima, prerequisite levels, spent-point
//! gates and mutual exclusions. The economy table carries the loot/xp
//! coefficients, which are deliberately data rather than code: they get
//! recalibrated against real measurements per archetype, so callers can load
//! a replacement table from a file instead of patching the engine.

use crate::build::HunterKind;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

/// Maximum supported character level.
pub const MAX_LEVEL: i32 = 500;

/// A talent node: flat cost of 1 point per level in practice, but the cost
/// field is kept so calibration files can change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalentSpec {
    pub cost: i32,
    pub max: i32,
}

/// An attribute node. `max: None` means unlimited (bounded only by budget).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub cost: i32,
    pub max: Option<i32>,
}

/// Loot/xp coefficients for one archetype. Loot accumulates as a geometric
/// series over cleared stages; xp is linear in stages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EconomyTable {
    /// Per-stage loot growth factor (> 1.0).
    pub stage_loot_mult: f64,
    /// Base per-stage loot at stage 1 for common/uncommon/rare.
    pub base_loot: [f64; 3],
    /// Base per-stage experience.
    pub base_xp: f64,
    /// Enemies spawned on a regular stage.
    pub enemies_per_stage: f64,
    /// Stage cap when the run config does not override it.
    pub default_max_stage: i32,
    /// Loot bonus per level of the timeless mastery attribute.
    pub timeless_mastery_rate: f64,
}

impl EconomyTable {
    /// Closed-form loot and xp totals for a finished run.
    ///
    /// Loot per rarity: `base * (m^stage - 1)/(m - 1) * enemies_per_stage * loot_mult`.
    /// Exact by construction; the per-stage loop never touches resources.
    pub fn totals(&self, final_stage: i32, loot_mult: f64, xp_mult: f64) -> (f64, f64, f64, f64) {
        let stage = final_stage.max(0) as f64;
        let m = self.stage_loot_mult;
        let geom_sum = if m > 1.0 {
            (m.powf(stage) - 1.0) / (m - 1.0)
        } else {
            stage
        };
        let factor = geom_sum * self.enemies_per_stage * loot_mult;
        let xp = self.base_xp * stage * xp_mult;
        (
            self.base_loot[0] * factor,
            self.base_loot[1] * factor,
            self.base_loot[2] * factor,
            xp,
        )
    }
}

/// Full allocation catalog for one archetype.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub kind: HunterKind,
    pub talents: BTreeMap<String, TalentSpec>,
    pub attributes: BTreeMap<String, AttributeSpec>,
    /// Prerequisite levels: id -> (other id -> minimum level there).
    #[serde(default)]
    pub dependencies: BTreeMap<String, BTreeMap<String, i32>>,
    /// Spent-point gates: id -> points that must be spent in *other* attributes.
    #[serde(default)]
    pub point_gates: BTreeMap<String, i32>,
    /// Mutually exclusive attribute pairs.
    #[serde(default)]
    pub exclusions: Vec<(String, String)>,
    pub economy: EconomyTable,
}

impl Catalog {
    /// The built-in catalog for an archetype.
    pub fn for_kind(kind: HunterKind) -> &'static Catalog {
        static BORGE: OnceLock<Catalog> = OnceLock::new();
        static OZZY: OnceLock<Catalog> = OnceLock::new();
        static KNOX: OnceLock<Catalog> = OnceLock::new();
        match kind {
            HunterKind::Borge => BORGE.get_or_init(Catalog::borge),
            HunterKind::Ozzy => OZZY.get_or_init(Catalog::ozzy),
            HunterKind::Knox => KNOX.get_or_init(Catalog::knox),
        }
    }

    /// Load a recalibrated catalog from a YAML or JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Catalog> {
        let content = std::fs::read_to_string(&path)?;
        let catalog = if path
            .as_ref()
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("json"))
        {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        Ok(catalog)
    }

    /// Talent points available at a level.
    pub fn talent_budget(&self, level: i32) -> i32 {
        level
    }

    /// Attribute points available at a level.
    pub fn attribute_budget(&self, level: i32) -> i32 {
        level * 3
    }

    /// Effective max level for an attribute, `None` when only the budget
    /// bounds it.
    pub fn attribute_max(&self, id: &str) -> Option<i32> {
        self.attributes.get(id).and_then(|spec| spec.max)
    }

    fn borge() -> Catalog {
        let talents = talent_table(&[
            ("death_is_my_companion", 2),
            ("life_of_the_hunt", 5),
            ("unfair_advantage", 5),
            ("impeccable_impacts", 10),
            ("omen_of_defeat", 10),
            ("call_me_lucky_loot", 10),
            ("presence_of_god", 15),
            ("fires_of_war", 15),
        ]);
        let attributes = attribute_table(&[
            ("soul_of_ares", 1, None),
            ("essence_of_ylith", 1, None),
            ("spartan_lineage", 2, Some(6)),
            ("timeless_mastery", 3, Some(5)),
            ("helltouch_barrier", 2, Some(10)),
            ("lifedrain_inhalers", 2, Some(10)),
            ("explosive_punches", 3, Some(6)),
            ("book_of_baal", 3, Some(6)),
            ("superior_sensors", 2, Some(6)),
            ("atlas_protocol", 3, Some(6)),
            ("weakspot_analysis", 2, Some(6)),
            ("born_for_battle", 5, Some(3)),
            ("soul_of_hermes", 2, Some(20)),
            ("soul_of_the_minotaur", 2, Some(20)),
        ]);
        let dependencies = dependency_table(&[
            ("essence_of_ylith", "soul_of_ares", 1),
            ("spartan_lineage", "essence_of_ylith", 1),
            ("timeless_mastery", "spartan_lineage", 1),
            ("helltouch_barrier", "soul_of_ares", 1),
            ("lifedrain_inhalers", "helltouch_barrier", 1),
            ("explosive_punches", "helltouch_barrier", 1),
            ("book_of_baal", "soul_of_ares", 1),
            ("superior_sensors", "book_of_baal", 1),
            ("atlas_protocol", "superior_sensors", 1),
            ("weakspot_analysis", "explosive_punches", 1),
            ("born_for_battle", "spartan_lineage", 1),
            ("soul_of_hermes", "weakspot_analysis", 1),
            ("soul_of_the_minotaur", "atlas_protocol", 1),
        ]);
        let point_gates = gate_table(&[
            ("atlas_protocol", 75),
            ("weakspot_analysis", 75),
            ("born_for_battle", 75),
            ("soul_of_hermes", 150),
            ("soul_of_the_minotaur", 150),
        ]);
        Catalog {
            kind: HunterKind::Borge,
            talents,
            attributes,
            dependencies,
            point_gates,
            exclusions: Vec::new(),
            economy: EconomyTable {
                stage_loot_mult: 1.051,
                base_loot: [30.74, 26.44, 19.92],
                base_xp: 1.64e12,
                enemies_per_stage: 10.0,
                default_max_stage: 300,
                timeless_mastery_rate: 0.14,
            },
        }
    }

    fn ozzy() -> Catalog {
        let talents = talent_table(&[
            ("death_is_my_companion", 2),
            ("tricksters_boon", 1),
            ("unfair_advantage", 5),
            ("thousand_needles", 10),
            ("omen_of_decay", 10),
            ("call_me_lucky_loot", 10),
            ("crippling_shots", 15),
            ("echo_bullets", 15),
        ]);
        let attributes = attribute_table(&[
            ("living_off_the_land", 1, None),
            ("exo_piercers", 1, None),
            ("timeless_mastery", 3, Some(5)),
            ("shimmering_scorpion", 3, Some(5)),
            ("wings_of_ibu", 2, Some(5)),
            ("extermination_protocol", 2, Some(5)),
            ("soul_of_snek", 3, Some(5)),
            ("vectid_elixir", 2, Some(10)),
            ("cycle_of_death", 3, Some(5)),
            ("gift_of_medusa", 3, Some(5)),
            ("deal_with_death", 5, Some(3)),
            ("dance_of_dashes", 3, Some(4)),
            ("blessings_of_the_cat", 2, Some(20)),
            ("blessings_of_the_scarab", 2, Some(20)),
            ("blessings_of_the_sisters", 15, Some(1)),
        ]);
        let dependencies = dependency_table(&[
            ("exo_piercers", "living_off_the_land", 1),
            ("timeless_mastery", "exo_piercers", 1),
            ("shimmering_scorpion", "exo_piercers", 1),
            ("wings_of_ibu", "living_off_the_land", 1),
            ("extermination_protocol", "wings_of_ibu", 1),
            ("soul_of_snek", "extermination_protocol", 1),
            ("vectid_elixir", "extermination_protocol", 1),
            ("cycle_of_death", "soul_of_snek", 1),
            ("dance_of_dashes", "shimmering_scorpion", 1),
            ("blessings_of_the_cat", "dance_of_dashes", 1),
            ("blessings_of_the_scarab", "dance_of_dashes", 1),
            ("blessings_of_the_sisters", "cycle_of_death", 1),
        ]);
        let point_gates = gate_table(&[
            ("gift_of_medusa", 88),
            ("deal_with_death", 88),
            ("dance_of_dashes", 88),
            ("blessings_of_the_cat", 148),
            ("blessings_of_the_scarab", 148),
            ("blessings_of_the_sisters", 178),
        ]);
        Catalog {
            kind: HunterKind::Ozzy,
            talents,
            attributes,
            dependencies,
            point_gates,
            exclusions: Vec::new(),
            economy: EconomyTable {
                stage_loot_mult: 1.059,
                base_loot: [11.1, 9.56, 7.2],
                base_xp: 9.66e10,
                enemies_per_stage: 10.0,
                default_max_stage: 210,
                timeless_mastery_rate: 0.16,
            },
        }
    }

    fn knox() -> Catalog {
        let talents = talent_table(&[
            ("death_is_my_companion", 2),
            ("calypsos_advantage", 5),
            ("unfair_advantage", 5),
            ("ghost_bullets", 15),
            ("omen_of_defeat", 10),
            ("call_me_lucky_loot", 10),
            ("presence_of_god", 10),
            ("finishing_move", 15),
        ]);
        let attributes = attribute_table(&[
            ("release_the_kraken", 1, None),
            ("space_pirate_armory", 2, Some(50)),
            ("soul_amplification", 1, Some(100)),
            ("serious_efficiency", 2, Some(5)),
            ("fortification_elixir", 2, Some(10)),
            ("a_pirates_life_for_knox", 3, Some(10)),
            ("dead_men_tell_no_tales", 2, Some(10)),
            ("passive_charge_tank", 4, Some(10)),
            ("shield_of_poseidon", 1, Some(10)),
            ("timeless_mastery", 3, Some(5)),
        ]);
        let dependencies = dependency_table(&[
            ("space_pirate_armory", "release_the_kraken", 1),
            ("soul_amplification", "release_the_kraken", 1),
            ("serious_efficiency", "release_the_kraken", 1),
            ("fortification_elixir", "release_the_kraken", 1),
            ("a_pirates_life_for_knox", "space_pirate_armory", 1),
            ("dead_men_tell_no_tales", "soul_amplification", 1),
            ("passive_charge_tank", "serious_efficiency", 1),
            ("shield_of_poseidon", "passive_charge_tank", 1),
            ("timeless_mastery", "fortification_elixir", 1),
        ]);
        Catalog {
            kind: HunterKind::Knox,
            talents,
            attributes,
            dependencies,
            point_gates: BTreeMap::new(),
            exclusions: Vec::new(),
            economy: EconomyTable {
                stage_loot_mult: 1.074,
                base_loot: [0.00348, 0.00302, 0.00228],
                base_xp: 728.0,
                enemies_per_stage: 10.0,
                default_max_stage: 100,
                timeless_mastery_rate: 0.14,
            },
        }
    }
}

fn talent_table(rows: &[(&str, i32)]) -> BTreeMap<String, TalentSpec> {
    rows.iter()
        .map(|&(id, max)| (id.to_string(), TalentSpec { cost: 1, max }))
        .collect()
}

fn attribute_table(rows: &[(&str, i32, Option<i32>)]) -> BTreeMap<String, AttributeSpec> {
    rows.iter()
        .map(|&(id, cost, max)| (id.to_string(), AttributeSpec { cost, max }))
        .collect()
}

fn dependency_table(rows: &[(&str, &str, i32)]) -> BTreeMap<String, BTreeMap<String, i32>> {
    let mut table: BTreeMap<String, BTreeMap<String, i32>> = BTreeMap::new();
    for &(id, prerequisite, level) in rows {
        table
            .entry(id.to_string())
            .or_default()
            .insert(prerequisite.to_string(), level);
    }
    table
}

fn gate_table(rows: &[(&str, i32)]) -> BTreeMap<String, i32> {
    rows.iter().map(|&(id, pts)| (id.to_string(), pts)).collect()
}
