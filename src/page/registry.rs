//! State-to-page registry with duplicate detection.

use super::definition::PageDefinition;
use crate::core::StateKey;
use crate::data::ResolverCache;
use std::collections::{HashMap, HashSet};
use std::fmt;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;
use thiserror::Error;

/// Registry name used by top-level routers.
pub const PAGES: &str = "pages";

/// Registry name used by routers of nested machines.
pub const NESTED_PAGES: &str = "nestedStateTreePages";

/// Router configuration errors. These are raised at construction time,
/// before anything is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Duplicate pages in '{registry}' for state(s): {}", join_keys(.keys))]
    DuplicatePages {
        registry: String,
        keys: Vec<StateKey>,
    },
}

fn join_keys(keys: &[StateKey]) -> String {
    keys.iter()
        .map(StateKey::name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Pages keyed by the state they are bound to.
///
/// Read-only once constructed, so it can be shared between routers.
pub struct PageRegistry<H, V> {
    name: String,
    pages: HashMap<StateKey, PageDefinition<H, V>>,
    order: Vec<StateKey>,
    resolvers: ResolverCache,
}

impl<H, V> PageRegistry<H, V> {
    /// Build a registry, failing if two pages are bound to the same state.
    ///
    /// Every duplicated state is reported, not only the first one.
    ///
    /// ```rust
    /// use stateroute::page::{ConfigError, PageDefinition, PageRegistry, PAGES};
    /// use stateroute::testing::MemoryHandle;
    ///
    /// let pages: Vec<PageDefinition<MemoryHandle, String>> = vec![
    ///     PageDefinition::new("x", |_, _| "first".to_string()),
    ///     PageDefinition::new("x", |_, _| "second".to_string()),
    /// ];
    ///
    /// let error = PageRegistry::new(PAGES, pages).err().unwrap();
    /// assert_eq!(error.to_string(), "Duplicate pages in 'pages' for state(s): x");
    /// ```
    pub fn new(
        name: impl Into<String>,
        pages: Vec<PageDefinition<H, V>>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        check_unique(&name, &pages)?;

        let order = pages.iter().map(|p| p.state().clone()).collect();
        let pages = pages
            .into_iter()
            .map(|page| (page.state().clone(), page))
            .collect();
        Ok(Self {
            name,
            pages,
            order,
            resolvers: ResolverCache::new(),
        })
    }

    /// Attach the resolver cache the pages were built from.
    pub fn with_resolver_cache(mut self, resolvers: ResolverCache) -> Self {
        self.resolvers = resolvers;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, state: &StateKey) -> Option<&PageDefinition<H, V>> {
        self.pages.get(state)
    }

    pub fn contains(&self, state: &StateKey) -> bool {
        self.pages.contains_key(state)
    }

    /// Registered states, in registration order.
    pub fn states(&self) -> &[StateKey] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn resolver_cache(&self) -> &ResolverCache {
        &self.resolvers
    }
}

impl<H, V> fmt::Debug for PageRegistry<H, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageRegistry")
            .field("name", &self.name)
            .field("states", &self.order)
            .finish()
    }
}

/// Validate that every page is bound to a distinct state, accumulating
/// all duplicates.
fn check_unique<H, V>(registry: &str, pages: &[PageDefinition<H, V>]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    let checks: Vec<Validation<(), NonEmptyVec<StateKey>>> = pages
        .iter()
        .map(|page| {
            if seen.insert(page.state().clone()) {
                Validation::success(())
            } else {
                Validation::fail(page.state().clone())
            }
        })
        .collect();

    match Validation::all_vec(checks).map(|_| ()) {
        Validation::Success(()) => Ok(()),
        Validation::Failure(duplicates) => {
            let mut reported = HashSet::new();
            let keys = duplicates
                .iter()
                .filter(|key| reported.insert((*key).clone()))
                .cloned()
                .collect();
            Err(ConfigError::DuplicatePages {
                registry: registry.to_string(),
                keys,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryHandle;

    fn page(state: &'static str) -> PageDefinition<MemoryHandle, String> {
        PageDefinition::new(state, move |_, _| state.to_string())
    }

    #[test]
    fn distinct_pages_build() {
        let registry = PageRegistry::new(PAGES, vec![page("a"), page("b")]).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.name(), "pages");
        assert!(registry.contains(&StateKey::new("a")));
        assert!(registry.get(&StateKey::new("c")).is_none());
        assert_eq!(registry.states(), &[StateKey::new("a"), StateKey::new("b")]);
    }

    #[test]
    fn duplicate_page_names_key_and_registry() {
        let result = PageRegistry::new(NESTED_PAGES, vec![page("x"), page("y"), page("x")]);

        match result {
            Err(ConfigError::DuplicatePages { registry, keys }) => {
                assert_eq!(registry, "nestedStateTreePages");
                assert_eq!(keys, vec![StateKey::new("x")]);
            }
            Ok(_) => panic!("Expected duplicate page error"),
        }
    }

    #[test]
    fn all_duplicates_are_accumulated() {
        let result = PageRegistry::new(
            PAGES,
            vec![page("x"), page("x"), page("y"), page("y"), page("x")],
        );

        let error = result.err().unwrap();
        assert_eq!(
            error,
            ConfigError::DuplicatePages {
                registry: PAGES.to_string(),
                keys: vec![StateKey::new("x"), StateKey::new("y")],
            }
        );
        assert_eq!(
            error.to_string(),
            "Duplicate pages in 'pages' for state(s): x, y"
        );
    }

    #[test]
    fn empty_registry_is_allowed() {
        let registry: PageRegistry<MemoryHandle, String> =
            PageRegistry::new(PAGES, Vec::new()).unwrap();
        assert!(registry.is_empty());
    }
}
