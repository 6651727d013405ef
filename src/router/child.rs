//! Router following a machine owned by an enclosing router.

use super::config::RouterConfig;
use super::delegate::{drain, ready, PageHandle, PageKey, RouterCore};
use super::error::RouterError;
use super::subscription::SubscriptionStats;
use crate::core::{PopGuard, TransitionEvent, TransitionHistory};
use crate::machine::{ActiveState, MachineContext};
use crate::page::{NoPageDiagnostic, PageRegistry};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

const KIND: &str = "child";

/// Router whose active states come from an explicitly passed
/// [`MachineContext`]. It never starts or stops the machine.
pub struct ChildRouterDelegate<H: ActiveState, V> {
    core: RouterCore<H, V>,
    handle: Option<H>,
    transitions: Option<broadcast::Receiver<TransitionEvent>>,
}

impl<H: ActiveState, V> ChildRouterDelegate<H, V> {
    pub fn new(registry: Arc<PageRegistry<H, V>>, config: RouterConfig) -> Self {
        let mut core = RouterCore::new(registry, config, KIND);
        core.allow_blank_final(!core.config().supports_final_page);
        Self {
            core,
            handle: None,
            transitions: None,
        }
    }

    pub fn with_pop_guard(mut self, guard: PopGuard) -> Self {
        self.core.set_pop_guard(guard);
        self
    }

    /// Follow the machine in `context` and render its current states.
    pub fn attach(&mut self, context: &MachineContext<H>) {
        self.transitions = Some(context.subscribe_transitions());
        self.handle = Some(context.handle().clone());
        self.core.refresh(context.handle());
    }

    /// Stop following the machine and release the page's data.
    pub fn detach(&mut self) {
        self.transitions = None;
        self.handle = None;
        self.core.detach();
    }

    pub fn is_attached(&self) -> bool {
        self.handle.is_some()
    }

    /// Apply pending transitions and data emissions against `handle`, the
    /// enclosing router's current active states.
    ///
    /// Returns whether the page stack changed.
    pub fn poll(&mut self, handle: &H) -> bool {
        if !self.is_attached() {
            return false;
        }
        let drained = drain(&mut self.transitions, KIND);
        let transitioned = drained.lagged || !drained.events.is_empty();
        for event in drained.events {
            self.core.record_transition(event);
        }
        self.handle = Some(handle.clone());

        if transitioned || self.core.is_outdated(handle) {
            self.core.refresh(handle);
            true
        } else {
            self.core.poll_data(handle)
        }
    }

    /// Wait until a transition or data emission is pending.
    pub async fn wait_for_event(&mut self) {
        tokio::select! {
            () = ready(self.transitions.as_ref()) => {}
            () = self.core.changed() => {}
        }
    }

    /// Route paths belong to the top-level router.
    pub fn set_route_path(&mut self, _path: &str) -> Result<(), RouterError> {
        Err(RouterError::Unsupported {
            operation: "set_route_path",
            router: KIND,
        })
    }

    pub fn on_pop_requested(&mut self, page: &PageKey) -> bool {
        self.core.pop(page)
    }

    pub fn set_context_revision(&mut self, revision: u64) {
        if self.core.set_revision(revision) {
            if let Some(handle) = self.handle.clone() {
                self.core.refresh(&handle);
            }
        }
    }

    pub fn page_stack(&self) -> &[PageHandle<V>] {
        self.core.page_stack()
    }

    pub fn change_notifications(&self) -> watch::Receiver<u64> {
        self.core.change_notifications()
    }

    pub fn diagnostics(&self) -> &[NoPageDiagnostic] {
        self.core.diagnostics()
    }

    pub fn history(&self) -> &TransitionHistory {
        self.core.history()
    }

    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.core.stats()
    }

    pub fn config(&self) -> &RouterConfig {
        self.core.config()
    }

    pub fn registry(&self) -> &Arc<PageRegistry<H, V>> {
        self.core.registry()
    }
}

impl<H: ActiveState, V> fmt::Debug for ChildRouterDelegate<H, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildRouterDelegate")
            .field("attached", &self.is_attached())
            .field("core", &self.core)
            .finish()
    }
}
