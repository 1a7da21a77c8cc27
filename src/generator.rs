//! Random sampling of the valid allocation space.
//!
//! A random walk drops one point at a time onto a uniformly chosen node
//! that can legally accept it, so every intermediate state (and therefore
//! the final allocation) honors budgets, per-node maxima, prerequisite
//! levels, spent-point gates and exclusions. The walk takes a caller-owned
//! RNG so tier seeding stays reproducible under a fixed top-level seed.

use crate::build::{Build, HunterKind, Modifiers};
use crate::catalog::Catalog;
use crate::error::ValidationError;
use rand::rngs::SmallRng;
use rand::Rng;
use std::collections::BTreeMap;

pub struct BuildGenerator {
    catalog: &'static Catalog,
    kind: HunterKind,
    level: i32,
    talent_budget: i32,
    attribute_budget: i32,
    /// Budget-derived caps for unlimited attributes, so the walk spreads
    /// points instead of sinking the whole budget into one node.
    unlimited_caps: BTreeMap<String, i32>,
    /// Carried into every generated build.
    modifiers: Modifiers,
}

impl BuildGenerator {
    pub fn new(kind: HunterKind, level: i32) -> BuildGenerator {
        Self::with_modifiers(kind, level, Modifiers::default())
    }

    /// Generator whose builds carry a baseline's gear and account bonuses.
    pub fn with_modifiers(kind: HunterKind, level: i32, modifiers: Modifiers) -> BuildGenerator {
        let catalog = Catalog::for_kind(kind);
        let talent_budget = catalog.talent_budget(level);
        let attribute_budget = catalog.attribute_budget(level);

        let unlimited: Vec<&String> = catalog
            .attributes
            .iter()
            .filter(|(_, spec)| spec.max.is_none())
            .map(|(id, _)| id)
            .collect();
        let limited_cost: i32 = catalog
            .attributes
            .values()
            .filter_map(|spec| spec.max.map(|max| max * spec.cost))
            .sum();
        let mut unlimited_caps = BTreeMap::new();
        if !unlimited.is_empty() {
            let remaining = (attribute_budget - limited_cost).max(unlimited.len() as i32);
            let per_node = (remaining / unlimited.len() as i32).max(1);
            for id in unlimited {
                unlimited_caps.insert(id.clone(), per_node);
            }
        }

        BuildGenerator {
            catalog,
            kind,
            level,
            talent_budget,
            attribute_budget,
            unlimited_caps,
            modifiers,
        }
    }

    fn attribute_cap(&self, id: &str) -> i32 {
        match self.catalog.attribute_max(id) {
            Some(max) => max,
            None => self.unlimited_caps.get(id).copied().unwrap_or(250),
        }
    }

    /// One uniformly random valid build.
    pub fn random_build(&self, rng: &mut SmallRng) -> Result<Build, ValidationError> {
        let talents = self.walk_talents(rng);
        let attributes = self.walk_attributes(rng);
        Build::new(
            self.kind,
            self.level,
            talents,
            attributes,
            self.modifiers.clone(),
        )
    }

    fn walk_talents(&self, rng: &mut SmallRng) -> BTreeMap<String, i32> {
        let mut allocation: BTreeMap<String, i32> = BTreeMap::new();
        let ids: Vec<&String> = self.catalog.talents.keys().collect();
        let mut remaining = self.talent_budget;

        while remaining > 0 {
            let open: Vec<&&String> = ids
                .iter()
                .filter(|id| {
                    let spec = &self.catalog.talents[id.as_str()];
                    spec.cost <= remaining
                        && allocation.get(id.as_str()).copied().unwrap_or(0) < spec.max
                })
                .collect();
            let Some(&&id) = pick(&open, rng) else { break };
            *allocation.entry(id.clone()).or_insert(0) += 1;
            remaining -= self.catalog.talents[id].cost;
        }
        allocation
    }

    fn walk_attributes(&self, rng: &mut SmallRng) -> BTreeMap<String, i32> {
        let mut allocation: BTreeMap<String, i32> = BTreeMap::new();
        let ids: Vec<&String> = self.catalog.attributes.keys().collect();
        let mut remaining = self.attribute_budget;

        loop {
            let open: Vec<&&String> = ids
                .iter()
                .filter(|id| self.can_take_point(id.as_str(), &allocation, remaining))
                .collect();
            let Some(&&id) = pick(&open, rng) else { break };
            *allocation.entry(id.clone()).or_insert(0) += 1;
            remaining -= self.catalog.attributes[id].cost;
        }
        allocation
    }

    fn can_take_point(
        &self,
        id: &str,
        allocation: &BTreeMap<String, i32>,
        remaining: i32,
    ) -> bool {
        let spec = &self.catalog.attributes[id];
        if spec.cost > remaining {
            return false;
        }
        if allocation.get(id).copied().unwrap_or(0) >= self.attribute_cap(id) {
            return false;
        }
        if let Some(deps) = self.catalog.dependencies.get(id) {
            for (prerequisite, &required) in deps {
                if allocation.get(prerequisite).copied().unwrap_or(0) < required {
                    return false;
                }
            }
        }
        if let Some(&gate) = self.catalog.point_gates.get(id) {
            let spent_elsewhere: i32 = allocation
                .iter()
                .filter(|(other, _)| other.as_str() != id)
                .map(|(other, &lvl)| lvl * self.catalog.attributes[other.as_str()].cost)
                .sum();
            if spent_elsewhere < gate {
                return false;
            }
        }
        for (a, b) in &self.catalog.exclusions {
            let other = if a.as_str() == id {
                b
            } else if b.as_str() == id {
                a
            } else {
                continue;
            };
            if allocation.get(other).copied().unwrap_or(0) > 0 {
                return false;
            }
        }
        true
    }
}

fn pick<'a, T>(options: &'a [T], rng: &mut SmallRng) -> Option<&'a T> {
    if options.is_empty() {
        None
    } else {
        Some(&options[rng.gen_range(0..options.len())])
    }
}
