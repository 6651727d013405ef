//! Selection of the page stack for the active states.

use super::definition::PageDefinition;
use super::registry::PageRegistry;
use crate::core::{ActiveStatePath, StateKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deepest-match page selection.
///
/// The active path is walked from the leaf up to the root and the first
/// state with a registered page wins, so a leaf's page always takes
/// priority over an ancestor's. The result holds at most one page.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivePageResolver;

impl ActivePageResolver {
    pub fn resolve<H, V>(
        path: &ActiveStatePath,
        registry: &PageRegistry<H, V>,
    ) -> Vec<PageDefinition<H, V>> {
        path.iter_leaf_first()
            .find_map(|state| registry.get(state))
            .cloned()
            .into_iter()
            .collect()
    }
}

/// Report that no active state has a registered page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoPageDiagnostic {
    /// Name of the registry that was searched
    pub registry: String,
    /// Active states at the time, root first
    pub active_states: Vec<StateKey>,
}

impl NoPageDiagnostic {
    pub fn new(registry: impl Into<String>, path: &ActiveStatePath) -> Self {
        Self {
            registry: registry.into(),
            active_states: path.as_slice().to_vec(),
        }
    }

    /// Label shown on the diagnostic page.
    pub fn title(&self) -> &'static str {
        "No page for active state"
    }
}

impl fmt::Display for NoPageDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let states: Vec<_> = self.active_states.iter().map(StateKey::name).collect();
        write!(
            f,
            "No page in '{}' matches any active state: [{}]",
            self.registry,
            states.join(", ")
        )
    }
}
