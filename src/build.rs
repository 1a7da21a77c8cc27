//! Immutable character builds and their validation.
//!
//! A [`Build`] is the unit the whole crate operates on: one point allocation
//! for one archetype at one level. Construction validates every allocation
//! invariant up front, so any `Build` the engines or the optimizer ever see
//! is valid by construction. Mutation always goes through
//! [`Build::with_allocations`], which produces a fresh validated value.

use crate::catalog::{Catalog, MAX_LEVEL};
use crate::error::{Result, ValidationError};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// The closed set of character archetypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HunterKind {
    Borge,
    Ozzy,
    Knox,
}

impl HunterKind {
    pub const ALL: [HunterKind; 3] = [HunterKind::Borge, HunterKind::Ozzy, HunterKind::Knox];

    pub fn name(self) -> &'static str {
        match self {
            HunterKind::Borge => "Borge",
            HunterKind::Ozzy => "Ozzy",
            HunterKind::Knox => "Knox",
        }
    }
}

impl fmt::Display for HunterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Build files in the wild carry the kind in whatever casing the exporting
// tool used, so matching is case-insensitive.
impl<'de> Deserialize<'de> for HunterKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "borge" => Ok(HunterKind::Borge),
            "ozzy" => Ok(HunterKind::Ozzy),
            "knox" => Ok(HunterKind::Knox),
            _ => Err(serde::de::Error::unknown_variant(
                &s,
                &["borge", "ozzy", "knox"],
            )),
        }
    }
}

/// Auxiliary modifier maps: everything outside the point-budgeted talent and
/// attribute allocations. The `bonuses` map is the account-wide state shared
/// across archetypes, passed in explicitly so simulations stay pure functions
/// of their inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default)]
    pub stats: BTreeMap<String, i32>,
    #[serde(default)]
    pub relics: BTreeMap<String, i32>,
    #[serde(default)]
    pub inscryptions: BTreeMap<String, i32>,
    #[serde(default)]
    pub gadgets: BTreeMap<String, i32>,
    #[serde(default)]
    pub gems: BTreeMap<String, i32>,
    #[serde(default)]
    pub bonuses: BTreeMap<String, serde_json::Value>,
}

/// On-disk layout. Supports both the nested form
/// `{ "meta": { "hunter": ..., "level": ... }, ... }` and the flat form the
/// GUI exports, `{ "hunter": ..., "level": ..., ... }`.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildFile {
    #[serde(default)]
    meta: Option<Meta>,
    #[serde(default)]
    hunter: Option<HunterKind>,
    #[serde(default)]
    level: Option<i32>,
    #[serde(default)]
    talents: BTreeMap<String, i32>,
    #[serde(default)]
    attributes: BTreeMap<String, i32>,
    #[serde(flatten)]
    modifiers: Modifiers,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Meta {
    hunter: HunterKind,
    level: i32,
}

/// One validated character configuration. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BuildFile")]
pub struct Build {
    #[serde(rename = "hunter")]
    kind: HunterKind,
    level: i32,
    talents: BTreeMap<String, i32>,
    attributes: BTreeMap<String, i32>,
    #[serde(flatten)]
    modifiers: Modifiers,
}

impl TryFrom<BuildFile> for Build {
    type Error = ValidationError;

    fn try_from(file: BuildFile) -> std::result::Result<Self, ValidationError> {
        let (kind, level) = match file.meta {
            Some(meta) => (meta.hunter, meta.level),
            None => (
                file.hunter.unwrap_or(HunterKind::Borge),
                file.level.unwrap_or(1),
            ),
        };
        Build::new(kind, level, file.talents, file.attributes, file.modifiers)
    }
}

impl Build {
    /// Construct and validate a build. Every invariant violation is reported
    /// as a [`ValidationError`]; nothing is ever silently clamped.
    pub fn new(
        kind: HunterKind,
        level: i32,
        talents: BTreeMap<String, i32>,
        attributes: BTreeMap<String, i32>,
        modifiers: Modifiers,
    ) -> std::result::Result<Build, ValidationError> {
        let talents = strip_zeros(talents);
        let attributes = strip_zeros(attributes);
        validate(kind, level, &talents, &attributes, &modifiers)?;
        Ok(Build {
            kind,
            level,
            talents,
            attributes,
            modifiers,
        })
    }

    /// A build with no discretionary points spent.
    pub fn minimal(kind: HunterKind, level: i32) -> std::result::Result<Build, ValidationError> {
        Build::new(
            kind,
            level,
            BTreeMap::new(),
            BTreeMap::new(),
            Modifiers::default(),
        )
    }

    /// New build with the same kind, level and modifiers but different
    /// allocations. Used by the optimizer for crossover and mutation; the
    /// offspring is re-validated from scratch.
    pub fn with_allocations(
        &self,
        talents: BTreeMap<String, i32>,
        attributes: BTreeMap<String, i32>,
    ) -> std::result::Result<Build, ValidationError> {
        Build::new(
            self.kind,
            self.level,
            talents,
            attributes,
            self.modifiers.clone(),
        )
    }

    /// Load from a YAML or JSON file. Parse failures and invariant
    /// violations stay distinct error kinds.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Build> {
        let content = std::fs::read_to_string(&path)?;
        let file: BuildFile = if path
            .as_ref()
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("json"))
        {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        Ok(Build::try_from(file)?)
    }

    pub fn from_json(json: &str) -> Result<Build> {
        let file: BuildFile = serde_json::from_str(json)?;
        Ok(Build::try_from(file)?)
    }

    pub fn kind(&self) -> HunterKind {
        self.kind
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn catalog(&self) -> &'static Catalog {
        Catalog::for_kind(self.kind)
    }

    pub fn talents(&self) -> &BTreeMap<String, i32> {
        &self.talents
    }

    pub fn modifiers(&self) -> &Modifiers {
        &self.modifiers
    }

    pub fn attributes(&self) -> &BTreeMap<String, i32> {
        &self.attributes
    }

    pub fn talent(&self, id: &str) -> i32 {
        self.talents.get(id).copied().unwrap_or(0)
    }

    pub fn attribute(&self, id: &str) -> i32 {
        self.attributes.get(id).copied().unwrap_or(0)
    }

    pub fn stat(&self, id: &str) -> i32 {
        self.modifiers.stats.get(id).copied().unwrap_or(0)
    }

    pub fn relic(&self, id: &str) -> i32 {
        self.modifiers.relics.get(id).copied().unwrap_or(0)
    }

    pub fn inscryption(&self, id: &str) -> i32 {
        self.modifiers.inscryptions.get(id).copied().unwrap_or(0)
    }

    pub fn gadget(&self, id: &str) -> i32 {
        self.modifiers.gadgets.get(id).copied().unwrap_or(0)
    }

    pub fn gem(&self, id: &str) -> i32 {
        self.modifiers.gems.get(id).copied().unwrap_or(0)
    }

    pub fn bonus_int(&self, id: &str) -> i32 {
        self.modifiers
            .bonuses
            .get(id)
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .unwrap_or(0)
    }

    pub fn bonus_float(&self, id: &str) -> f64 {
        self.modifiers
            .bonuses
            .get(id)
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    }

    pub fn bonus_flag(&self, id: &str) -> bool {
        self.modifiers
            .bonuses
            .get(id)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Re-run the construction-time invariant checks. Used by the batch
    /// runner so a batch fails atomically instead of producing partial stats.
    pub fn revalidate(&self) -> std::result::Result<(), ValidationError> {
        validate(
            self.kind,
            self.level,
            &self.talents,
            &self.attributes,
            &self.modifiers,
        )
    }

    /// Canonical key over the point allocations, for deduplicating builds
    /// that differ only in map ordering or zero entries.
    pub fn allocation_key(&self) -> String {
        let mut key = String::with_capacity(64);
        key.push_str(self.kind.name());
        key.push('@');
        key.push_str(&self.level.to_string());
        for (id, lvl) in &self.talents {
            key.push(';');
            key.push_str(id);
            key.push('=');
            key.push_str(&lvl.to_string());
        }
        key.push('|');
        for (id, lvl) in &self.attributes {
            key.push(';');
            key.push_str(id);
            key.push('=');
            key.push_str(&lvl.to_string());
        }
        key
    }

    /// Combined loot multiplier from every static bonus source.
    pub fn loot_multiplier(&self) -> f64 {
        let economy = &self.catalog().economy;
        let mut mult = 1.0;

        let timeless = self.attribute("timeless_mastery");
        if timeless > 0 {
            mult *= 1.0 + timeless as f64 * economy.timeless_mastery_rate;
        }

        let shard_milestone = self.bonus_int("shard_milestone");
        if shard_milestone > 0 {
            mult *= 1.02_f64.powi(shard_milestone);
        }

        let manifestation = self.relic("manifestation_core_titan");
        if manifestation > 0 {
            mult *= 1.05_f64.powi(manifestation.min(100));
        }

        match self.kind {
            HunterKind::Borge => {
                let i14 = self.inscryption("i14");
                if i14 > 0 {
                    mult *= 1.1_f64.powi(i14);
                }
                let i44 = self.inscryption("i44");
                if i44 > 0 {
                    mult *= 1.08_f64.powi(i44);
                }
            }
            HunterKind::Ozzy => {
                let i32_lvl = self.inscryption("i32");
                if i32_lvl > 0 {
                    mult *= 1.5_f64.powi(i32_lvl);
                }
            }
            HunterKind::Knox => {}
        }

        // Gadgets compound: (1 + 0.5%)^level with a 2% tier bump every 10 levels.
        let gadget_loot = |level: i32| -> f64 {
            if level <= 0 {
                return 1.0;
            }
            1.005_f64.powi(level) * 1.02_f64.powi(level / 10)
        };
        mult *= gadget_loot(self.gadget("anchor_of_ages"));
        match self.kind {
            HunterKind::Borge => mult *= gadget_loot(self.gadget("wrench_of_gore")),
            HunterKind::Ozzy => mult *= gadget_loot(self.gadget("zaptron_533")),
            HunterKind::Knox => {}
        }

        let attraction = self.gem("attraction_node_3");
        if attraction > 0 {
            mult *= 1.0 + attraction as f64 * 0.25;
        }

        let diamond_loot = self.bonus_int("diamond_loot");
        if diamond_loot > 0 {
            mult *= 1.0 + diamond_loot as f64 * 0.025;
        }
        if self.bonus_flag("iap_travpack") {
            mult *= 1.25;
        }
        let ultima = self.bonus_float("ultima_multiplier");
        if ultima > 0.0 {
            mult *= ultima;
        }

        mult
    }

    /// Combined experience multiplier.
    pub fn xp_multiplier(&self) -> f64 {
        let mut mult = 1.0;
        match self.kind {
            HunterKind::Borge => {
                let mephisto = self.relic("book_of_mephisto");
                if mephisto > 0 {
                    mult *= 2.0_f64.powi(mephisto.min(8));
                }
            }
            HunterKind::Ozzy => {
                let i33 = self.inscryption("i33");
                if i33 > 0 {
                    mult *= 1.75_f64.powi(i33);
                }
            }
            HunterKind::Knox => {}
        }
        mult
    }
}

fn strip_zeros(map: BTreeMap<String, i32>) -> BTreeMap<String, i32> {
    map.into_iter().filter(|&(_, lvl)| lvl != 0).collect()
}

fn validate(
    kind: HunterKind,
    level: i32,
    talents: &BTreeMap<String, i32>,
    attributes: &BTreeMap<String, i32>,
    modifiers: &Modifiers,
) -> std::result::Result<(), ValidationError> {
    let catalog = Catalog::for_kind(kind);

    if !(1..=MAX_LEVEL).contains(&level) {
        return Err(ValidationError::LevelOutOfRange {
            level,
            max: MAX_LEVEL,
        });
    }

    let mut talent_spent = 0;
    for (id, &lvl) in talents {
        let spec = catalog
            .talents
            .get(id)
            .ok_or_else(|| ValidationError::UnknownId {
                slot: "talent",
                id: id.clone(),
                kind: kind.name(),
            })?;
        if lvl < 0 || lvl > spec.max {
            return Err(ValidationError::OverMax {
                id: id.clone(),
                level: lvl,
                max: spec.max,
            });
        }
        talent_spent += lvl * spec.cost;
    }
    let talent_budget = catalog.talent_budget(level);
    if talent_spent > talent_budget {
        return Err(ValidationError::TalentBudgetExceeded {
            spent: talent_spent,
            budget: talent_budget,
        });
    }
    // Talent unlock gates. The built-in tables carry none, but recalibrated
    // catalogs may, so the rule is enforced symmetrically with attributes.
    for (id, &lvl) in talents {
        if lvl == 0 {
            continue;
        }
        if let Some(deps) = catalog.dependencies.get(id) {
            for (prerequisite, &required) in deps {
                if catalog.talents.contains_key(prerequisite)
                    && talents.get(prerequisite).copied().unwrap_or(0) < required
                {
                    return Err(ValidationError::PrerequisiteUnmet {
                        id: id.clone(),
                        prerequisite: prerequisite.clone(),
                        required,
                    });
                }
            }
        }
    }

    let mut attr_spent = 0;
    for (id, &lvl) in attributes {
        let spec = catalog
            .attributes
            .get(id)
            .ok_or_else(|| ValidationError::UnknownId {
                slot: "attribute",
                id: id.clone(),
                kind: kind.name(),
            })?;
        if lvl < 0 {
            return Err(ValidationError::OverMax {
                id: id.clone(),
                level: lvl,
                max: spec.max.unwrap_or(i32::MAX),
            });
        }
        if let Some(max) = spec.max {
            if lvl > max {
                return Err(ValidationError::OverMax {
                    id: id.clone(),
                    level: lvl,
                    max,
                });
            }
        }
        attr_spent += lvl * spec.cost;
    }
    let attr_budget = catalog.attribute_budget(level);
    if attr_spent > attr_budget {
        return Err(ValidationError::AttributeBudgetExceeded {
            spent: attr_spent,
            budget: attr_budget,
        });
    }

    // Unlock gates: prerequisite levels, spent-point gates, exclusions.
    for (id, &lvl) in attributes {
        if lvl == 0 {
            continue;
        }
        if let Some(deps) = catalog.dependencies.get(id) {
            for (prerequisite, &required) in deps {
                if attributes.get(prerequisite).copied().unwrap_or(0) < required {
                    return Err(ValidationError::PrerequisiteUnmet {
                        id: id.clone(),
                        prerequisite: prerequisite.clone(),
                        required,
                    });
                }
            }
        }
        if let Some(&required) = catalog.point_gates.get(id) {
            let spent_elsewhere: i32 = attributes
                .iter()
                .filter(|(other, _)| other.as_str() != id)
                .map(|(other, &l)| l * catalog.attributes.get(other).map_or(0, |s| s.cost))
                .sum();
            if spent_elsewhere < required {
                return Err(ValidationError::PointGateUnmet {
                    id: id.clone(),
                    required,
                    spent: spent_elsewhere,
                });
            }
        }
    }
    for (a, b) in &catalog.exclusions {
        let has_a = attributes.get(a).copied().unwrap_or(0) > 0;
        let has_b = attributes.get(b).copied().unwrap_or(0) > 0;
        if has_a && has_b {
            return Err(ValidationError::MutuallyExclusive {
                a: a.clone(),
                b: b.clone(),
            });
        }
    }

    for (id, &lvl) in modifiers
        .stats
        .iter()
        .chain(&modifiers.relics)
        .chain(&modifiers.inscryptions)
        .chain(&modifiers.gadgets)
        .chain(&modifiers.gems)
    {
        if lvl < 0 {
            return Err(ValidationError::OverMax {
                id: id.clone(),
                level: lvl,
                max: 0,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc(pairs: &[(&str, i32)]) -> BTreeMap<String, i32> {
        pairs.iter().map(|&(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn minimal_build_is_valid_for_every_kind() {
        for kind in HunterKind::ALL {
            assert!(Build::minimal(kind, 1).is_ok());
        }
    }

    #[test]
    fn talent_budget_is_enforced() {
        let err = Build::new(
            HunterKind::Borge,
            3,
            alloc(&[("presence_of_god", 4)]),
            BTreeMap::new(),
            Modifiers::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::TalentBudgetExceeded { spent: 4, budget: 3 }));
    }

    #[test]
    fn attribute_budget_is_three_times_level() {
        let err = Build::new(
            HunterKind::Borge,
            2,
            BTreeMap::new(),
            alloc(&[("soul_of_ares", 7)]),
            Modifiers::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::AttributeBudgetExceeded { spent: 7, budget: 6 }));
    }

    #[test]
    fn attribute_cost_is_weighted() {
        // spartan_lineage costs 2 per level and needs its prerequisites.
        let build = Build::new(
            HunterKind::Borge,
            10,
            BTreeMap::new(),
            alloc(&[
                ("soul_of_ares", 1),
                ("essence_of_ylith", 1),
                ("spartan_lineage", 6),
            ]),
            Modifiers::default(),
        );
        assert!(build.is_ok(), "{build:?}");
        let err = Build::new(
            HunterKind::Borge,
            4,
            BTreeMap::new(),
            alloc(&[
                ("soul_of_ares", 1),
                ("essence_of_ylith", 1),
                ("spartan_lineage", 6),
            ]),
            Modifiers::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::AttributeBudgetExceeded { .. }));
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let err = Build::new(
            HunterKind::Knox,
            5,
            alloc(&[("impeccable_impacts", 1)]),
            BTreeMap::new(),
            Modifiers::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownId { slot: "talent", .. }));
    }

    #[test]
    fn prerequisite_gates_hold() {
        let err = Build::new(
            HunterKind::Borge,
            10,
            BTreeMap::new(),
            alloc(&[("essence_of_ylith", 1)]),
            Modifiers::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::PrerequisiteUnmet { .. }));
    }

    #[test]
    fn point_gates_hold() {
        // dance_of_dashes needs 88 points spent elsewhere.
        let err = Build::new(
            HunterKind::Ozzy,
            40,
            BTreeMap::new(),
            alloc(&[
                ("living_off_the_land", 1),
                ("exo_piercers", 1),
                ("shimmering_scorpion", 1),
                ("dance_of_dashes", 1),
            ]),
            Modifiers::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::PointGateUnmet { .. }));
    }

    #[test]
    fn kind_parses_case_insensitively() {
        let build: Build =
            serde_json::from_str(r#"{"hunter": "BORGE", "level": 3}"#).expect("parse");
        assert_eq!(build.kind(), HunterKind::Borge);
    }

    #[test]
    fn nested_and_flat_layouts_agree() {
        let nested: Build = serde_yaml::from_str(
            "meta:\n  hunter: ozzy\n  level: 12\ntalents:\n  unfair_advantage: 2\n",
        )
        .expect("nested");
        let flat: Build =
            serde_yaml::from_str("hunter: Ozzy\nlevel: 12\ntalents:\n  unfair_advantage: 2\n")
                .expect("flat");
        assert_eq!(nested.allocation_key(), flat.allocation_key());
    }

    #[test]
    fn serialized_build_round_trips() {
        let build = Build::new(
            HunterKind::Borge,
            20,
            alloc(&[("impeccable_impacts", 5)]),
            alloc(&[("soul_of_ares", 10)]),
            Modifiers::default(),
        )
        .expect("valid");
        let json = serde_json::to_string(&build).expect("serialize");
        let back = Build::from_json(&json).expect("reparse");
        assert_eq!(build, back);
    }
}
