//! In-memory state machine for tests and demos.
//!
//! [`MemoryMachine`] is a test double, not an engine: it has no message
//! dispatch and no guards. Tests move it between states explicitly with
//! [`go_to`](MemoryMachine::go_to) and publish state data directly.
//!
//! # Example
//!
//! ```rust
//! use stateroute::machine::{ActiveState, StateMachine};
//! use stateroute::testing::MemoryMachine;
//!
//! # tokio_test_block(async {
//! let machine = MemoryMachine::builder()
//!     .state("root")
//!     .child("root", "enterText")
//!     .child("root", "showUppercase")
//!     .initial("enterText")
//!     .build();
//!
//! let handle = machine.start(None).await.unwrap();
//! assert_eq!(handle.active_path().leaf().name(), "enterText");
//!
//! let handle = machine
//!     .go_to_with("showUppercase", String::from("HELLO"))
//!     .unwrap();
//! assert_eq!(handle.active_path().to_string(), "root > showUppercase");
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use crate::core::{ActiveStatePath, FailedMessageEvent, StateKey, TransitionEvent};
use crate::machine::{ActiveState, DataSender, DataStream, MachineError, StateMachine};
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Static shape of the state tree.
#[derive(Debug, Default)]
struct StateTree {
    parents: HashMap<StateKey, Option<StateKey>>,
    finals: HashSet<StateKey>,
    initial: Option<StateKey>,
}

impl StateTree {
    fn path_to(&self, leaf: &StateKey) -> Result<ActiveStatePath, MachineError> {
        let mut states = Vec::new();
        let mut current = Some(leaf.clone());
        while let Some(state) = current {
            let parent = self
                .parents
                .get(&state)
                .ok_or_else(|| MachineError::UnknownState(state.clone()))?;
            current = parent.clone();
            states.push(state);
        }
        states.reverse();
        ActiveStatePath::new(states).map_err(|e| MachineError::Engine(e.to_string()))
    }
}

/// Mutable part of the machine.
#[derive(Default)]
struct Shared {
    path: Option<ActiveStatePath>,
    started: bool,
    data: HashMap<(StateKey, TypeId), Box<dyn Any + Send + Sync>>,
}

impl Shared {
    fn sender<D: Send + Sync + 'static>(&self, state: &StateKey) -> Option<&DataSender<D>> {
        self.data
            .get(&(state.clone(), TypeId::of::<D>()))
            .and_then(|slot| slot.downcast_ref::<DataSender<D>>())
    }

    fn publish<D: Send + Sync + 'static>(&mut self, state: StateKey, value: D) {
        match self.sender::<D>(&state) {
            Some(sender) => sender.send(value),
            None => {
                let sender = DataSender::new(state.clone(), value);
                self.data
                    .insert((state, TypeId::of::<D>()), Box::new(sender));
            }
        }
    }

    /// Drop every data slot of `states`, completing their streams.
    fn clear(&mut self, states: &[StateKey]) {
        self.data.retain(|(state, _), _| !states.contains(state));
    }
}

struct Inner {
    tree: StateTree,
    shared: Mutex<Shared>,
    transitions: broadcast::Sender<TransitionEvent>,
    failures: broadcast::Sender<FailedMessageEvent>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builder for a [`MemoryMachine`]'s state tree.
#[derive(Debug, Default)]
pub struct MemoryMachineBuilder {
    tree: StateTree,
}

impl MemoryMachineBuilder {
    /// Add a top-level state.
    pub fn state(mut self, name: impl Into<StateKey>) -> Self {
        self.tree.parents.insert(name.into(), None);
        self
    }

    /// Add a state below `parent`.
    pub fn child(mut self, parent: impl Into<StateKey>, name: impl Into<StateKey>) -> Self {
        self.tree.parents.insert(name.into(), Some(parent.into()));
        self
    }

    /// Add a final state below `parent`.
    pub fn final_state(mut self, parent: impl Into<StateKey>, name: impl Into<StateKey>) -> Self {
        let name = name.into();
        self.tree.finals.insert(name.clone());
        self.child(parent, name)
    }

    /// State entered by `start(None)`.
    pub fn initial(mut self, name: impl Into<StateKey>) -> Self {
        self.tree.initial = Some(name.into());
        self
    }

    pub fn build(self) -> MemoryMachine {
        let (transitions, _) = broadcast::channel(EVENT_CAPACITY);
        let (failures, _) = broadcast::channel(EVENT_CAPACITY);
        MemoryMachine {
            inner: Arc::new(Inner {
                tree: self.tree,
                shared: Mutex::new(Shared::default()),
                transitions,
                failures,
            }),
        }
    }
}

/// In-memory hierarchical machine. Clones share the same machine.
#[derive(Clone)]
pub struct MemoryMachine {
    inner: Arc<Inner>,
}

impl MemoryMachine {
    pub fn builder() -> MemoryMachineBuilder {
        MemoryMachineBuilder::default()
    }

    /// Move to `target`, exiting every active state not on its path.
    pub fn go_to(&self, target: impl Into<StateKey>) -> Result<MemoryHandle, MachineError> {
        self.transition(target.into(), |_, _| {})
    }

    /// Move to `target` and publish `value` as its data before the
    /// transition is announced.
    pub fn go_to_with<D: Send + Sync + 'static>(
        &self,
        target: impl Into<StateKey>,
        value: D,
    ) -> Result<MemoryHandle, MachineError> {
        self.transition(target.into(), move |shared, target| {
            shared.publish(target.clone(), value)
        })
    }

    /// Publish `value` as the `D` data of `state`.
    pub fn set_data<D: Send + Sync + 'static>(&self, state: impl Into<StateKey>, value: D) {
        self.inner.lock().publish(state.into(), value);
    }

    /// Declare a `D` data slot on `state` with nothing published yet.
    pub fn declare_data<D: Send + Sync + 'static>(&self, state: impl Into<StateKey>) {
        let state = state.into();
        let sender: DataSender<D> = DataSender::empty(state.clone());
        self.inner
            .lock()
            .data
            .insert((state, TypeId::of::<D>()), Box::new(sender));
    }

    /// Publish a failure on the `D` data of `state`.
    pub fn fail_data<D: Send + Sync + 'static>(
        &self,
        state: impl Into<StateKey>,
        message: impl Into<String>,
    ) {
        if let Some(sender) = self.inner.lock().sender::<D>(&state.into()) {
            sender.fail(message);
        }
    }

    /// Complete the `D` data stream of `state`.
    pub fn close_data<D: Send + Sync + 'static>(&self, state: impl Into<StateKey>) {
        self.inner
            .lock()
            .data
            .remove(&(state.into(), TypeId::of::<D>()));
    }

    /// Announce that the current state failed to process `message`.
    pub fn report_failure(&self, message: impl Into<String>, error: impl Into<String>) {
        let state = match &self.inner.lock().path {
            Some(path) => path.leaf().clone(),
            None => return,
        };
        let _ = self
            .inner
            .failures
            .send(FailedMessageEvent::new(state, message, error));
    }

    fn handle(&self, path: ActiveStatePath) -> MemoryHandle {
        MemoryHandle {
            is_final: self.inner.tree.finals.contains(path.leaf()),
            path,
            machine: Arc::clone(&self.inner),
        }
    }

    fn transition<F>(&self, target: StateKey, seed: F) -> Result<MemoryHandle, MachineError>
    where
        F: FnOnce(&mut Shared, &StateKey),
    {
        let next = self.inner.tree.path_to(&target)?;
        let event = {
            let mut shared = self.inner.lock();
            if !shared.started {
                return Err(MachineError::NotStarted);
            }
            let previous = shared.path.take().ok_or(MachineError::NotStarted)?;

            // Re-entering the target exits it too.
            let exit_path: Vec<StateKey> = previous
                .iter_leaf_first()
                .filter(|state| !next.contains(state) || **state == target)
                .cloned()
                .collect();
            shared.clear(&exit_path);
            seed(&mut *shared, &target);
            shared.path = Some(next.clone());

            let event = TransitionEvent::new(previous.leaf().clone(), target, exit_path);
            if self.inner.tree.finals.contains(next.leaf()) {
                event.into_final()
            } else {
                event
            }
        };
        let _ = self.inner.transitions.send(event);
        Ok(self.handle(next))
    }

    fn start_now(&self, initial: Option<StateKey>) -> Result<MemoryHandle, MachineError> {
        let mut shared = self.inner.lock();
        if shared.started {
            return Err(MachineError::AlreadyStarted);
        }
        let initial = initial
            .or_else(|| self.inner.tree.initial.clone())
            .ok_or(MachineError::NoInitialState)?;
        let path = self.inner.tree.path_to(&initial)?;
        shared.started = true;
        shared.path = Some(path.clone());
        drop(shared);
        Ok(self.handle(path))
    }

    fn stop_now(&self) -> Result<(), MachineError> {
        let mut shared = self.inner.lock();
        if !shared.started {
            return Err(MachineError::NotStarted);
        }
        shared.started = false;
        Ok(())
    }
}

impl StateMachine for MemoryMachine {
    type Handle = MemoryHandle;

    fn start(
        &self,
        initial: Option<StateKey>,
    ) -> impl Future<Output = Result<MemoryHandle, MachineError>> + Send {
        std::future::ready(self.start_now(initial))
    }

    fn stop(&self) -> impl Future<Output = Result<(), MachineError>> + Send {
        std::future::ready(self.stop_now())
    }

    fn is_started(&self) -> bool {
        self.inner.lock().started
    }

    fn current(&self) -> Option<MemoryHandle> {
        let shared = self.inner.lock();
        if !shared.started {
            return None;
        }
        let path = shared.path.clone()?;
        drop(shared);
        Some(self.handle(path))
    }

    fn transitions(&self) -> broadcast::Receiver<TransitionEvent> {
        self.inner.transitions.subscribe()
    }

    fn failed_messages(&self) -> broadcast::Receiver<FailedMessageEvent> {
        self.inner.failures.subscribe()
    }
}

impl fmt::Debug for MemoryMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.inner.lock();
        f.debug_struct("MemoryMachine")
            .field("started", &shared.started)
            .field("path", &shared.path)
            .finish()
    }
}

/// Snapshot of a [`MemoryMachine`]'s active states.
///
/// The path is fixed at the time the handle was taken. Data lookups read
/// the machine's live data, so the data of states exited since then is
/// gone.
#[derive(Clone)]
pub struct MemoryHandle {
    path: ActiveStatePath,
    is_final: bool,
    machine: Arc<Inner>,
}

impl ActiveState for MemoryHandle {
    fn active_path(&self) -> ActiveStatePath {
        self.path.clone()
    }

    fn is_final(&self) -> bool {
        self.is_final
    }

    fn data_stream<D: Send + Sync + 'static>(
        &self,
        state: Option<&StateKey>,
    ) -> Option<DataStream<D>> {
        let shared = self.machine.lock();
        match state {
            Some(state) => shared.sender::<D>(state).map(DataSender::subscribe),
            None => self
                .path
                .iter_leaf_first()
                .find_map(|state| shared.sender::<D>(state))
                .map(DataSender::subscribe),
        }
    }
}

impl fmt::Debug for MemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHandle")
            .field("path", &self.path)
            .field("is_final", &self.is_final)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> MemoryMachine {
        MemoryMachine::builder()
            .state("root")
            .child("root", "form")
            .child("form", "field")
            .child("root", "review")
            .final_state("root", "done")
            .initial("field")
            .build()
    }

    #[tokio::test]
    async fn start_enters_initial_state() {
        let machine = machine();
        let handle = machine.start(None).await.unwrap();

        assert!(machine.is_started());
        assert_eq!(handle.active_path().to_string(), "root > form > field");
        assert!(handle.is_in_state(&StateKey::new("form")));
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let machine = machine();
        machine.start(None).await.unwrap();
        assert_eq!(
            machine.start(None).await.err(),
            Some(MachineError::AlreadyStarted)
        );
    }

    #[tokio::test]
    async fn start_without_initial_fails() {
        let machine = MemoryMachine::builder().state("root").build();
        assert_eq!(
            machine.start(None).await.err(),
            Some(MachineError::NoInitialState)
        );
    }

    #[tokio::test]
    async fn go_to_reports_exited_states_leaf_first() {
        let machine = machine();
        machine.start(None).await.unwrap();
        let mut transitions = machine.transitions();

        machine.go_to("review").unwrap();
        let event = transitions.try_recv().unwrap();

        assert_eq!(event.from.name(), "field");
        assert_eq!(event.to.name(), "review");
        assert_eq!(event.exit_path, vec![StateKey::new("field"), StateKey::new("form")]);
        assert!(!event.is_to_final_state);
    }

    #[tokio::test]
    async fn final_state_is_flagged() {
        let machine = machine();
        machine.start(None).await.unwrap();
        let mut transitions = machine.transitions();

        let handle = machine.go_to("done").unwrap();
        assert!(handle.is_final());
        assert!(transitions.try_recv().unwrap().is_to_final_state);
    }

    #[tokio::test]
    async fn exiting_a_state_completes_its_data() {
        let machine = machine();
        machine.set_data("form", 1u32);
        let handle = machine.start(None).await.unwrap();
        let mut stream = handle.data_stream::<u32>(None).unwrap();

        let after = machine.go_to("review").unwrap();
        assert!(matches!(
            stream.poll_next(),
            crate::machine::StreamPoll::Closed { .. }
        ));
        assert!(after.data_stream::<u32>(None).is_none());
    }

    #[tokio::test]
    async fn data_is_published_before_transition_is_announced() {
        let machine = machine();
        machine.start(None).await.unwrap();
        let mut transitions = machine.transitions();

        machine.go_to_with("review", String::from("HELLO")).unwrap();
        transitions.try_recv().unwrap();

        let handle = machine.current().unwrap();
        let stream = handle.data_stream::<String>(None).unwrap();
        assert_eq!(stream.current().unwrap().as_str(), "HELLO");
    }

    #[tokio::test]
    async fn go_to_unknown_state_fails() {
        let machine = machine();
        machine.start(None).await.unwrap();
        assert_eq!(
            machine.go_to("missing").err(),
            Some(MachineError::UnknownState(StateKey::new("missing")))
        );
    }

    #[tokio::test]
    async fn stop_clears_current() {
        let machine = machine();
        machine.start(None).await.unwrap();
        machine.stop().await.unwrap();

        assert!(machine.current().is_none());
        assert_eq!(machine.go_to("review").err(), Some(MachineError::NotStarted));
        assert_eq!(machine.stop().await.err(), Some(MachineError::NotStarted));
    }

    #[tokio::test]
    async fn failures_are_broadcast() {
        let machine = machine();
        machine.start(None).await.unwrap();
        let mut failures = machine.failed_messages();

        machine.report_failure("submit", "validation failed");
        let event = failures.try_recv().unwrap();
        assert_eq!(event.state.name(), "field");
        assert_eq!(event.error, "validation failed");
    }
}
