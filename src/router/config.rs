//! Router configuration and the builder that validates it.

use super::child::ChildRouterDelegate;
use super::error::RouterError;
use super::nested::NestedRouterDelegate;
use super::outer::RouterDelegate;
use crate::core::{PopGuard, StateKey, DEFAULT_HISTORY_CAPACITY};
use crate::data::{DataResolver, ResolverCache};
use crate::machine::{ActiveState, StateMachine};
use crate::page::{PageDefinition, PageRegistry, NESTED_PAGES, PAGES};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Construction-time router options.
///
/// ```rust
/// use stateroute::router::RouterConfig;
///
/// let config: RouterConfig = serde_json::from_str(r#"{ "scaffold_pages": true }"#).unwrap();
/// assert!(config.scaffold_pages);
/// assert!(config.supports_final_page);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Wrap each page in common chrome
    pub scaffold_pages: bool,
    /// Show the machine's failed messages as an overlay on the page
    pub display_state_machine_errors: bool,
    /// Child and nested routers only: when false, reaching a final state
    /// without a page shows a blank page instead of a diagnostic
    pub supports_final_page: bool,
    /// Transitions retained in the router's history
    pub history_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            scaffold_pages: false,
            display_state_machine_errors: false,
            supports_final_page: true,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Builder for router delegates with a fluent API.
///
/// Pages are validated when the router is built; duplicates fail the
/// build before anything renders.
///
/// # Example
///
/// ```rust
/// use stateroute::page::PageDefinition;
/// use stateroute::router::RouterBuilder;
/// use stateroute::testing::{MemoryHandle, MemoryMachine};
///
/// let machine = MemoryMachine::builder()
///     .state("root")
///     .child("root", "enterText")
///     .initial("enterText")
///     .build();
///
/// let mut builder = RouterBuilder::<MemoryHandle, String>::new();
/// let text = builder.resolver::<String>(None);
/// let router = builder
///     .page(PageDefinition::new("enterText", |_, _| "Enter text".to_string()))
///     .page(PageDefinition::with_data("showUppercase", text, |_, t, _| t.to_uppercase()))
///     .scaffold_pages(true)
///     .build(machine);
///
/// assert!(router.is_ok());
/// ```
pub struct RouterBuilder<H, V> {
    registry: &'static str,
    pages: Vec<PageDefinition<H, V>>,
    config: RouterConfig,
    pop_guard: PopGuard,
    resolvers: ResolverCache,
}

impl<H: ActiveState, V: 'static> RouterBuilder<H, V> {
    /// Builder for a router over the `"pages"` registry.
    pub fn new() -> Self {
        Self::named(PAGES)
    }

    /// Builder for a router of a nested machine, over the
    /// `"nestedStateTreePages"` registry.
    pub fn nested() -> Self {
        Self::named(NESTED_PAGES)
    }

    fn named(registry: &'static str) -> Self {
        Self {
            registry,
            pages: Vec::new(),
            config: RouterConfig::default(),
            pop_guard: PopGuard::default(),
            resolvers: ResolverCache::new(),
        }
    }

    /// Resolver for `D` data, interned in this router's cache.
    pub fn resolver<D: Send + Sync + 'static>(
        &mut self,
        state: Option<StateKey>,
    ) -> DataResolver<D> {
        self.resolvers.resolver(state)
    }

    /// Add a page.
    pub fn page(mut self, page: PageDefinition<H, V>) -> Self {
        self.pages.push(page);
        self
    }

    /// Add multiple pages at once.
    pub fn pages(mut self, pages: impl IntoIterator<Item = PageDefinition<H, V>>) -> Self {
        self.pages.extend(pages);
        self
    }

    /// Replace every option at once.
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn scaffold_pages(mut self, enabled: bool) -> Self {
        self.config.scaffold_pages = enabled;
        self
    }

    pub fn display_state_machine_errors(mut self, enabled: bool) -> Self {
        self.config.display_state_machine_errors = enabled;
        self
    }

    pub fn supports_final_page(mut self, supported: bool) -> Self {
        self.config.supports_final_page = supported;
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.config.history_capacity = capacity;
        self
    }

    /// Guard consulted when the host pops a page.
    pub fn pop_guard(mut self, guard: PopGuard) -> Self {
        self.pop_guard = guard;
        self
    }

    fn registry(self) -> Result<(Arc<PageRegistry<H, V>>, RouterConfig, PopGuard), RouterError> {
        let registry =
            PageRegistry::new(self.registry, self.pages)?.with_resolver_cache(self.resolvers);
        Ok((Arc::new(registry), self.config, self.pop_guard))
    }

    /// Build a router that owns `machine`.
    pub fn build<M>(self, machine: M) -> Result<RouterDelegate<M, V>, RouterError>
    where
        M: StateMachine<Handle = H>,
    {
        let (registry, config, guard) = self.registry()?;
        Ok(RouterDelegate::new(machine, registry, config).with_pop_guard(guard))
    }

    /// Build a router that follows a machine owned by an enclosing router.
    pub fn build_child(self) -> Result<ChildRouterDelegate<H, V>, RouterError> {
        let (registry, config, guard) = self.registry()?;
        Ok(ChildRouterDelegate::new(registry, config).with_pop_guard(guard))
    }

    /// Build a router for the machine embedded in `nested_state`'s data.
    pub fn build_nested<M>(
        self,
        nested_state: impl Into<StateKey>,
    ) -> Result<NestedRouterDelegate<M, V>, RouterError>
    where
        M: StateMachine<Handle = H>,
    {
        let (registry, config, guard) = self.registry()?;
        Ok(NestedRouterDelegate::new(nested_state, registry, config).with_pop_guard(guard))
    }
}

impl<H: ActiveState, V: 'static> Default for RouterBuilder<H, V> {
    fn default() -> Self {
        Self::new()
    }
}
