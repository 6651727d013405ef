//! Router that owns its state machine.

use super::config::RouterConfig;
use super::delegate::{drain, ready, PageHandle, PageKey, RouterCore};
use super::error::RouterError;
use super::subscription::SubscriptionStats;
use crate::core::{FailedMessageEvent, PopGuard, StateKey, TransitionEvent, TransitionHistory};
use crate::machine::{ActiveState, MachineContext, MachineError, StateMachine};
use crate::page::{NoPageDiagnostic, PageRegistry};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

const KIND: &str = "outer";

/// Top-level router: starts and stops the machine and keeps the page
/// stack in step with its active states.
///
/// The delegate is driven by the host's event loop: call
/// [`wait_for_event`](Self::wait_for_event) to wait for something to
/// happen and [`poll`](Self::poll) to apply it.
pub struct RouterDelegate<M: StateMachine, V> {
    machine: Arc<M>,
    core: RouterCore<M::Handle, V>,
    initial: Option<StateKey>,
    handle: Option<M::Handle>,
    transitions: Option<broadcast::Receiver<TransitionEvent>>,
    failures: Option<broadcast::Receiver<FailedMessageEvent>>,
}

impl<M: StateMachine, V> RouterDelegate<M, V> {
    /// Router over `registry`. The page stack shows a loading page until
    /// [`start`](Self::start) completes.
    pub fn new(
        machine: M,
        registry: Arc<PageRegistry<M::Handle, V>>,
        config: RouterConfig,
    ) -> Self {
        Self {
            machine: Arc::new(machine),
            core: RouterCore::new(registry, config, KIND),
            initial: None,
            handle: None,
            transitions: None,
            failures: None,
        }
    }

    pub fn with_pop_guard(mut self, guard: PopGuard) -> Self {
        self.core.set_pop_guard(guard);
        self
    }

    /// Start in `state` instead of the machine's own initial state.
    pub fn with_initial_state(mut self, state: impl Into<StateKey>) -> Self {
        self.initial = Some(state.into());
        self
    }

    /// Start the machine and render its initial states.
    pub async fn start(&mut self) -> Result<(), RouterError> {
        if self.core.is_disposed() {
            return Err(RouterError::Stopped);
        }
        if self.handle.is_some() {
            return Err(MachineError::AlreadyStarted.into());
        }
        self.core.show_loading();

        // Subscribe first so no transition after start is missed.
        self.transitions = Some(self.machine.transitions());
        self.failures = Some(self.machine.failed_messages());

        let handle = match self.machine.start(self.initial.clone()).await {
            Ok(handle) => handle,
            Err(error) => {
                self.transitions = None;
                self.failures = None;
                return Err(error.into());
            }
        };
        info!(path = %handle.active_path(), "state machine started");
        self.core.refresh(&handle);
        self.handle = Some(handle);
        Ok(())
    }

    /// Stop the machine and release the page's data. A stopped router
    /// cannot be started again.
    pub async fn stop(&mut self) -> Result<(), RouterError> {
        if self.handle.is_none() {
            return Err(RouterError::NotStarted);
        }
        self.machine.stop().await?;
        self.handle = None;
        self.transitions = None;
        self.failures = None;
        self.core.dispose();
        info!("state machine stopped");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    /// Apply every pending transition, failure and data emission.
    ///
    /// Returns whether the page stack changed.
    pub fn poll(&mut self) -> bool {
        let Some(mut handle) = self.handle.clone() else {
            return false;
        };

        let drained = drain(&mut self.transitions, KIND);
        let transitioned = drained.lagged || !drained.events.is_empty();
        for event in drained.events {
            self.core.record_transition(event);
        }

        if transitioned {
            if let Some(current) = self.machine.current() {
                handle = current;
                self.handle = Some(handle.clone());
            }
        }

        let mut changed = false;
        for event in drain(&mut self.failures, KIND).events {
            changed |= self.core.record_failure(event);
        }

        if transitioned || self.core.is_outdated(&handle) {
            self.core.refresh(&handle);
            true
        } else {
            self.core.poll_data(&handle) || changed
        }
    }

    /// Wait until a transition, failed message or data emission is pending.
    pub async fn wait_for_event(&mut self) -> Result<(), RouterError> {
        if self.handle.is_none() {
            return Err(RouterError::NotStarted);
        }
        tokio::select! {
            () = ready(self.transitions.as_ref()) => {}
            () = ready(self.failures.as_ref()) => {}
            () = self.core.changed() => {}
        }
        Ok(())
    }

    /// Context for child routers following this machine.
    pub fn context(&self) -> Option<MachineContext<M::Handle>> {
        let handle = self.handle.clone()?;
        Some(MachineContext::new(handle, self.machine.transitions()))
    }

    /// Active states as of the last [`poll`](Self::poll).
    pub fn handle(&self) -> Option<&M::Handle> {
        self.handle.as_ref()
    }

    /// Deep links are not parsed; the path is accepted and ignored.
    pub fn set_route_path(&mut self, path: &str) -> Result<(), RouterError> {
        debug!(path, "ignoring route path");
        Ok(())
    }

    /// Handle a pop reported by the host. Returns whether it was accepted.
    pub fn on_pop_requested(&mut self, page: &PageKey) -> bool {
        self.core.pop(page)
    }

    /// Change the revision of the host's render dependencies. A new
    /// revision rebuilds the page's subscription.
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

    /// Generation counter bumped whenever the host should re-render.
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

    pub fn registry(&self) -> &Arc<PageRegistry<M::Handle, V>> {
        self.core.registry()
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }
}

impl<M: StateMachine, V> fmt::Debug for RouterDelegate<M, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterDelegate")
            .field("started", &self.handle.is_some())
            .field("core", &self.core)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataResolver;
    use crate::page::PageDefinition;
    use crate::router::{PageContent, RouterBuilder};
    use crate::testing::{MemoryHandle, MemoryMachine};
    use std::time::Duration;

    fn machine() -> MemoryMachine {
        MemoryMachine::builder()
            .state("root")
            .child("root", "enterText")
            .child("root", "showUppercase")
            .child("root", "unmapped")
            .initial("enterText")
            .build()
    }

    fn router(machine: MemoryMachine) -> RouterDelegate<MemoryMachine, String> {
        RouterBuilder::<MemoryHandle, String>::new()
            .page(PageDefinition::new("enterText", |_, _| "Enter text".to_string()))
            .page(PageDefinition::with_data(
                "showUppercase",
                DataResolver::<String>::nearest(),
                |_, text, _| text.to_uppercase(),
            ))
            .display_state_machine_errors(true)
            .build(machine)
            .unwrap()
    }

    fn shown(router: &RouterDelegate<MemoryMachine, String>) -> Option<&String> {
        router.page_stack()[0].content.view()
    }

    #[tokio::test]
    async fn loading_until_started() {
        let mut router = router(machine());
        assert_eq!(router.page_stack()[0].key, PageKey::Loading);

        router.start().await.unwrap();
        assert_eq!(shown(&router).map(String::as_str), Some("Enter text"));
    }

    #[tokio::test]
    async fn transition_rerenders_with_data() {
        let machine = machine();
        let mut router = router(machine.clone());
        router.start().await.unwrap();

        machine
            .go_to_with("showUppercase", String::from("hello"))
            .unwrap();
        assert!(router.poll());

        assert_eq!(shown(&router).map(String::as_str), Some("HELLO"));
        assert_eq!(router.history().len(), 1);
        assert_eq!(
            router.subscription_stats(),
            SubscriptionStats {
                subscribes: 2,
                unsubscribes: 1,
            }
        );
    }

    #[tokio::test]
    async fn data_emission_rerenders_in_place() {
        let machine = machine();
        let mut router = router(machine.clone());
        router.start().await.unwrap();
        machine
            .go_to_with("showUppercase", String::from("a"))
            .unwrap();
        router.poll();

        machine.set_data("showUppercase", String::from("b"));
        assert!(router.poll());
        assert_eq!(shown(&router).map(String::as_str), Some("B"));
        assert_eq!(router.subscription_stats().subscribes, 2);
    }

    #[tokio::test]
    async fn poll_without_events_changes_nothing() {
        let mut router = router(machine());
        router.start().await.unwrap();
        assert!(!router.poll());
    }

    #[tokio::test]
    async fn unmapped_state_shows_diagnostic() {
        let machine = machine();
        let mut router = router(machine.clone());
        router.start().await.unwrap();

        machine.go_to("unmapped").unwrap();
        router.poll();

        assert_eq!(router.diagnostics().len(), 1);
        assert!(matches!(router.page_stack()[0].content, PageContent::NoPage(_)));
        assert_eq!(
            router.page_stack()[0].key,
            PageKey::State(StateKey::new("unmapped"))
        );
    }

    #[tokio::test]
    async fn unchanged_unmapped_path_is_diagnosed_once() {
        let machine = machine();
        let mut router = router(machine.clone());
        router.start().await.unwrap();
        machine.go_to("unmapped").unwrap();
        router.poll();

        for revision in 1..=3 {
            router.set_context_revision(revision);
        }

        assert_eq!(router.diagnostics().len(), 1);
        assert!(matches!(router.page_stack()[0].content, PageContent::NoPage(_)));
    }

    #[tokio::test]
    async fn diagnostics_are_bounded_by_history_capacity() {
        let machine = machine();
        let mut router = RouterBuilder::<MemoryHandle, String>::new()
            .page(PageDefinition::new("enterText", |_, _| "Enter text".to_string()))
            .history_capacity(2)
            .build(machine.clone())
            .unwrap();
        router.start().await.unwrap();

        for _ in 0..3 {
            machine.go_to("unmapped").unwrap();
            router.poll();
            machine.go_to("enterText").unwrap();
            router.poll();
        }

        assert_eq!(router.diagnostics().len(), 2);
    }

    #[tokio::test]
    async fn failed_message_overlays_until_next_transition() {
        let machine = machine();
        let mut router = router(machine.clone());
        router.start().await.unwrap();

        machine.report_failure("submit", "rejected");
        assert!(router.poll());
        let overlay = router.page_stack()[0].overlay.as_ref().unwrap();
        assert_eq!(overlay.error, "rejected");

        machine
            .go_to_with("showUppercase", String::from("x"))
            .unwrap();
        router.poll();
        assert!(router.page_stack()[0].overlay.is_none());
    }

    #[tokio::test]
    async fn wait_for_event_wakes_on_transition() {
        let machine = machine();
        let mut router = router(machine.clone());
        router.start().await.unwrap();

        let driver = machine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            driver
                .go_to_with("showUppercase", String::from("late"))
                .unwrap();
        });

        tokio::time::timeout(Duration::from_secs(1), router.wait_for_event())
            .await
            .unwrap()
            .unwrap();
        assert!(router.poll());
        assert_eq!(shown(&router).map(String::as_str), Some("LATE"));
    }

    #[tokio::test]
    async fn route_paths_are_ignored() {
        let mut router = router(machine());
        router.start().await.unwrap();
        assert!(router.set_route_path("/anything").is_ok());
    }

    #[tokio::test]
    async fn pop_notifies_and_accepts() {
        let mut router = router(machine());
        router.start().await.unwrap();
        let mut notifications = router.change_notifications();
        let _ = notifications.borrow_and_update();

        let key = router.page_stack()[0].key.clone();
        assert!(router.on_pop_requested(&key));
        assert!(notifications.has_changed().unwrap());
    }

    #[tokio::test]
    async fn stop_is_terminal() {
        let mut router = router(machine());
        router.start().await.unwrap();
        router.stop().await.unwrap();

        assert!(!router.is_started());
        assert_eq!(router.subscription_stats().live(), 0);
        assert_eq!(router.page_stack()[0].key, PageKey::Blank);
        assert_eq!(router.start().await.err(), Some(RouterError::Stopped));
        assert_eq!(router.stop().await.err(), Some(RouterError::NotStarted));
    }

    #[tokio::test]
    async fn context_revision_resubscribes() {
        let mut router = router(machine());
        router.start().await.unwrap();

        router.set_context_revision(0);
        assert_eq!(router.subscription_stats().subscribes, 1);
        router.set_context_revision(1);
        assert_eq!(router.subscription_stats().subscribes, 2);
    }
}
