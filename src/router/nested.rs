//! Router for a machine embedded in the data of an enclosing state.
//!
//! The nested machine only exists while its enclosing state is active. As
//! soon as the enclosing machine leaves that state the router releases
//! everything it holds and renders nothing further, even if the nested
//! machine's own final transition is still queued.

use super::config::RouterConfig;
use super::delegate::{drain, ready, PageHandle, PageKey, RouterCore};
use super::error::RouterError;
use super::subscription::SubscriptionStats;
use crate::core::{PopGuard, StateKey, TransitionEvent, TransitionHistory};
use crate::machine::{ActiveState, MachineContext, NestedMachineHandle, StateMachine};
use crate::page::{NoPageDiagnostic, PageRegistry};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::debug;

const KIND: &str = "nested";

/// Connection to the nested machine while its enclosing state is active.
struct Connection<M: StateMachine> {
    machine: NestedMachineHandle<M>,
    handle: M::Handle,
    /// Cleared once the nested machine reaches a final state
    transitions: Option<broadcast::Receiver<TransitionEvent>>,
}

/// Router over the machine stored as [`NestedMachineHandle`] data of
/// `nested_state` in an enclosing machine.
pub struct NestedRouterDelegate<M: StateMachine, V> {
    nested_state: StateKey,
    core: RouterCore<M::Handle, V>,
    outer_transitions: Option<broadcast::Receiver<TransitionEvent>>,
    attached: bool,
    connection: Option<Connection<M>>,
}

impl<M: StateMachine, V> NestedRouterDelegate<M, V> {
    pub fn new(
        nested_state: impl Into<StateKey>,
        registry: Arc<PageRegistry<M::Handle, V>>,
        config: RouterConfig,
    ) -> Self {
        let mut core = RouterCore::new(registry, config, KIND);
        core.allow_blank_final(!core.config().supports_final_page);
        // Nothing is loading until the enclosing state is entered.
        core.detach();
        Self {
            nested_state: nested_state.into(),
            core,
            outer_transitions: None,
            attached: false,
            connection: None,
        }
    }

    pub fn with_pop_guard(mut self, guard: PopGuard) -> Self {
        self.core.set_pop_guard(guard);
        self
    }

    /// Follow the enclosing machine in `context`.
    pub fn attach<H: ActiveState>(&mut self, context: &MachineContext<H>) {
        self.outer_transitions = Some(context.subscribe_transitions());
        self.attached = true;
        self.poll(context.handle());
    }

    /// Stop following the enclosing machine and release the nested one.
    pub fn detach(&mut self) {
        self.outer_transitions = None;
        self.attached = false;
        self.disconnect();
    }

    /// Apply pending transitions of both machines and data emissions.
    /// `outer` is the enclosing machine's current active states.
    ///
    /// Returns whether the page stack changed. Leaving the enclosing state
    /// releases the nested machine without a change notification.
    pub fn poll<H: ActiveState>(&mut self, outer: &H) -> bool {
        if !self.attached {
            return false;
        }

        // `left` holds when the drained events end outside the enclosing
        // state, whatever `outer` still shows.
        let (mut exited, mut left) = (false, false);
        for event in drain(&mut self.outer_transitions, KIND).events {
            if event.exits(&self.nested_state) {
                exited = true;
                left = true;
            }
            if self.enters(&event, outer) {
                left = false;
            }
        }
        if exited && self.connection.is_some() {
            debug!(state = %self.nested_state, "enclosing state exited; releasing nested machine");
            self.disconnect();
        }
        if left {
            return false;
        }
        if !outer.is_in_state(&self.nested_state) {
            if self.connection.is_some() {
                self.disconnect();
            }
            return false;
        }

        if self.connection.is_none() {
            return self.connect(outer);
        }
        self.poll_nested()
    }

    /// Wait until either machine transitions or the page's data changes.
    pub async fn wait_for_event(&mut self) {
        let nested = self
            .connection
            .as_ref()
            .and_then(|connection| connection.transitions.as_ref());
        tokio::select! {
            () = ready(self.outer_transitions.as_ref()) => {}
            () = ready(nested) => {}
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
            if let Some(connection) = &self.connection {
                let handle = connection.handle.clone();
                self.core.refresh(&handle);
            }
        }
    }

    pub fn nested_state(&self) -> &StateKey {
        &self.nested_state
    }

    /// Whether the nested machine is currently followed.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
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

    pub fn registry(&self) -> &Arc<PageRegistry<M::Handle, V>> {
        self.core.registry()
    }

    fn connect<H: ActiveState>(&mut self, outer: &H) -> bool {
        let machine = outer
            .data_stream::<NestedMachineHandle<M>>(Some(&self.nested_state))
            .and_then(|stream| stream.current().ok());
        let Some(machine) = machine else {
            debug!(state = %self.nested_state, "nested machine handle not found; showing blank page");
            return self.show_blank_once();
        };
        let machine = (*machine).clone();

        // Subscribe before reading the current states so nothing is missed.
        let transitions = machine.transitions();
        let Some(handle) = machine.current() else {
            debug!(state = %self.nested_state, "nested machine is not running; showing blank page");
            return self.show_blank_once();
        };

        debug!(state = %self.nested_state, path = %handle.active_path(), "following nested machine");
        self.core.refresh(&handle);
        self.connection = Some(Connection {
            machine,
            handle,
            transitions: Some(transitions),
        });
        true
    }

    fn poll_nested(&mut self) -> bool {
        let Some(connection) = self.connection.as_mut() else {
            return false;
        };

        let drained = drain(&mut connection.transitions, KIND);
        let transitioned = drained.lagged || !drained.events.is_empty();
        for event in drained.events {
            if event.is_to_final_state {
                debug!(state = %event.to, "nested machine reached a final state; no longer listening");
                connection.transitions = None;
            }
            self.core.record_transition(event);
        }

        if transitioned {
            // Only the nested machine is consulted here; the enclosing
            // state's data may already be gone.
            if let Some(current) = connection.machine.current() {
                connection.handle = current;
            }
            let handle = connection.handle.clone();
            self.core.refresh(&handle);
            true
        } else {
            let handle = connection.handle.clone();
            self.core.poll_data(&handle)
        }
    }

    /// Whether `event` lands in the enclosing state or below it.
    fn enters<H: ActiveState>(&self, event: &TransitionEvent, outer: &H) -> bool {
        if event.to == self.nested_state {
            return true;
        }
        outer
            .active_path()
            .iter()
            .skip_while(|state| **state != self.nested_state)
            .any(|state| *state == event.to)
    }

    fn disconnect(&mut self) {
        self.connection = None;
        self.core.detach();
    }

    fn show_blank_once(&mut self) -> bool {
        if self.core.page_stack().first().map(|page| &page.key) == Some(&PageKey::Blank) {
            return false;
        }
        self.core.show_blank();
        true
    }
}

impl<M: StateMachine, V> fmt::Debug for NestedRouterDelegate<M, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NestedRouterDelegate")
            .field("nested_state", &self.nested_state)
            .field("connected", &self.connection.is_some())
            .field("core", &self.core)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageDefinition;
    use crate::router::{PageContent, RouterBuilder};
    use crate::testing::{MemoryHandle, MemoryMachine};

    fn outer() -> MemoryMachine {
        MemoryMachine::builder()
            .state("app")
            .child("app", "home")
            .child("app", "wizard")
            .initial("home")
            .build()
    }

    fn inner() -> MemoryMachine {
        MemoryMachine::builder()
            .state("flow")
            .child("flow", "step1")
            .child("flow", "step2")
            .final_state("flow", "done")
            .initial("step1")
            .build()
    }

    fn router() -> NestedRouterDelegate<MemoryMachine, String> {
        RouterBuilder::<MemoryHandle, String>::nested()
            .page(PageDefinition::new("step1", |_, _| "Step 1".to_string()))
            .page(PageDefinition::new("step2", |_, _| "Step 2".to_string()))
            .supports_final_page(false)
            .build_nested("wizard")
            .unwrap()
    }

    fn view(router: &NestedRouterDelegate<MemoryMachine, String>) -> Option<&str> {
        router.page_stack()[0].content.view().map(String::as_str)
    }

    async fn entered(outer: &MemoryMachine, inner: &MemoryMachine) -> MemoryHandle {
        inner.start(None).await.unwrap();
        outer
            .go_to_with("wizard", NestedMachineHandle::new(inner.clone()))
            .unwrap()
    }

    #[tokio::test]
    async fn follows_nested_machine_while_enclosing_state_is_active() {
        let (outer_machine, inner_machine) = (outer(), inner());
        let start = outer_machine.start(None).await.unwrap();
        let mut router = router();
        router.attach(&MachineContext::new(start, outer_machine.transitions()));
        assert!(!router.is_connected());

        let handle = entered(&outer_machine, &inner_machine).await;
        assert!(router.poll(&handle));
        assert_eq!(view(&router), Some("Step 1"));

        inner_machine.go_to("step2").unwrap();
        assert!(router.poll(&handle));
        assert_eq!(view(&router), Some("Step 2"));
    }

    #[tokio::test]
    async fn leaving_enclosing_state_detaches_silently() {
        let (outer_machine, inner_machine) = (outer(), inner());
        let start = outer_machine.start(None).await.unwrap();
        let mut router = router();
        router.attach(&MachineContext::new(start, outer_machine.transitions()));
        let handle = entered(&outer_machine, &inner_machine).await;
        router.poll(&handle);

        let mut notifications = router.change_notifications();
        let _ = notifications.borrow_and_update();

        // Nested machine finishes and the enclosing machine leaves in the same tick.
        inner_machine.go_to("done").unwrap();
        let home = outer_machine.go_to("home").unwrap();
        assert!(!router.poll(&home));

        assert!(!router.is_connected());
        assert_eq!(router.page_stack()[0].key, PageKey::Blank);
        assert!(!notifications.has_changed().unwrap());
        assert_eq!(router.subscription_stats().live(), 0);
        assert!(router.history().is_empty());
    }

    #[tokio::test]
    async fn stale_outer_handle_does_not_reconnect_after_exit() {
        let (outer_machine, inner_machine) = (outer(), inner());
        let start = outer_machine.start(None).await.unwrap();
        let mut router = router();
        router.attach(&MachineContext::new(start, outer_machine.transitions()));
        let in_wizard = entered(&outer_machine, &inner_machine).await;
        router.poll(&in_wizard);

        let mut notifications = router.change_notifications();
        let _ = notifications.borrow_and_update();

        inner_machine.go_to("done").unwrap();
        outer_machine.go_to("home").unwrap();
        // The host still holds the handle from before the exit.
        assert!(!router.poll(&in_wizard));

        assert!(!router.is_connected());
        assert_eq!(router.page_stack()[0].key, PageKey::Blank);
        assert!(!notifications.has_changed().unwrap());
        assert_eq!(
            router.subscription_stats(),
            SubscriptionStats {
                subscribes: 1,
                unsubscribes: 1,
            }
        );
    }

    #[tokio::test]
    async fn exit_and_reentry_in_one_poll_reconnects() {
        let (outer_machine, inner_machine) = (outer(), inner());
        let start = outer_machine.start(None).await.unwrap();
        let mut router = router();
        router.attach(&MachineContext::new(start, outer_machine.transitions()));
        let in_wizard = entered(&outer_machine, &inner_machine).await;
        router.poll(&in_wizard);

        outer_machine.go_to("home").unwrap();
        let again = outer_machine
            .go_to_with("wizard", NestedMachineHandle::new(inner_machine.clone()))
            .unwrap();
        assert!(router.poll(&again));
        assert!(router.is_connected());
        assert_eq!(view(&router), Some("Step 1"));
    }

    #[tokio::test]
    async fn attaching_outside_enclosing_state_shows_blank() {
        let outer_machine = outer();
        let start = outer_machine.start(None).await.unwrap();
        let mut router = router();
        router.attach(&MachineContext::new(start, outer_machine.transitions()));

        assert!(!router.is_connected());
        assert_eq!(router.page_stack()[0].key, PageKey::Blank);
    }

    #[tokio::test]
    async fn missing_handle_shows_transient_blank_page() {
        let outer_machine = outer();
        let start = outer_machine.start(None).await.unwrap();
        let mut router = router();
        router.attach(&MachineContext::new(start, outer_machine.transitions()));

        let handle = outer_machine.go_to("wizard").unwrap();
        router.poll(&handle);
        assert!(!router.is_connected());
        assert_eq!(router.page_stack()[0].content, PageContent::Blank);
        assert!(!router.poll(&handle));
        assert!(router.diagnostics().is_empty());
    }

    #[tokio::test]
    async fn final_nested_state_renders_blank_and_stops_listening() {
        let (outer_machine, inner_machine) = (outer(), inner());
        let start = outer_machine.start(None).await.unwrap();
        let mut router = router();
        router.attach(&MachineContext::new(start, outer_machine.transitions()));
        let handle = entered(&outer_machine, &inner_machine).await;
        router.poll(&handle);

        inner_machine.go_to("done").unwrap();
        assert!(router.poll(&handle));
        assert_eq!(router.page_stack()[0].key, PageKey::Blank);
        assert!(router.diagnostics().is_empty());

        // Transitions after the final state are not observed.
        inner_machine.go_to("step1").unwrap();
        assert!(!router.poll(&handle));
        assert_eq!(router.history().len(), 1);
    }

    #[tokio::test]
    async fn reentering_enclosing_state_reconnects() {
        let (outer_machine, inner_machine) = (outer(), inner());
        let start = outer_machine.start(None).await.unwrap();
        let mut router = router();
        router.attach(&MachineContext::new(start, outer_machine.transitions()));
        let handle = entered(&outer_machine, &inner_machine).await;
        router.poll(&handle);

        let home = outer_machine.go_to("home").unwrap();
        router.poll(&home);
        assert!(!router.is_connected());

        let again = outer_machine
            .go_to_with("wizard", NestedMachineHandle::new(inner_machine.clone()))
            .unwrap();
        assert!(router.poll(&again));
        assert!(router.is_connected());
        assert_eq!(view(&router), Some("Step 1"));
        assert_eq!(
            router.subscription_stats(),
            SubscriptionStats {
                subscribes: 2,
                unsubscribes: 1,
            }
        );
    }

    #[test]
    fn route_paths_are_unsupported() {
        let mut router = router();
        assert!(matches!(
            router.set_route_path("/wizard"),
            Err(RouterError::Unsupported { router: "nested", .. })
        ));
    }
}
