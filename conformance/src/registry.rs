//! Scenario registry.
//!
//! An explicit value constructed at process start and passed by parameter
//! into the orchestrator. Nothing here is ambient or link-time: tests can
//! build a disposable registry from any slice of definitions.

use crate::scenario::{ScenarioDef, Side};

pub struct Registry {
    defs: Vec<&'static ScenarioDef>,
}

impl Registry {
    /// The full built-in scenario set, in a stable listing order.
    pub fn builtin() -> Self {
        Self {
            defs: crate::scenarios::all(),
        }
    }

    /// A registry over an arbitrary definition set.
    pub fn from_defs(defs: Vec<&'static ScenarioDef>) -> Self {
        Self { defs }
    }

    pub fn get(&self, name: &str) -> Option<&'static ScenarioDef> {
        self.defs.iter().copied().find(|def| def.name == name)
    }

    /// Definitions for one side, optionally narrowed to a `category.` name
    /// prefix.
    pub fn select(&self, side: Side, category: Option<&str>) -> Vec<&'static ScenarioDef> {
        self.defs
            .iter()
            .copied()
            .filter(|def| def.side == side)
            .filter(|def| match category {
                Some(category) => {
                    def.name == category || def.name.starts_with(&format!("{category}."))
                }
                None => true,
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static ScenarioDef> + '_ {
        self.defs.iter().copied()
    }
}
