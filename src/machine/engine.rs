//! Interface to the hierarchical state machine engine.
//!
//! The router never drives transitions itself. It reads the active-state
//! path, looks up per-state data streams, and listens to the engine's
//! transition and failure notifications.

use super::error::MachineError;
use super::stream::DataStream;
use crate::core::{ActiveStatePath, FailedMessageEvent, StateKey, TransitionEvent};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Snapshot of the machine's active states.
///
/// Handles are cheap to clone and are passed to page builders so pages can
/// interact with the machine.
pub trait ActiveState: Clone + Send + Sync + 'static {
    /// Active states from root to leaf.
    fn active_path(&self) -> ActiveStatePath;

    /// Whether `key` is currently active.
    fn is_in_state(&self, key: &StateKey) -> bool {
        self.active_path().contains(key)
    }

    /// Whether the active leaf is a final state.
    fn is_final(&self) -> bool {
        false
    }

    /// Data stream of type `D`.
    ///
    /// With `Some(state)`, the stream carried by that state. With `None`,
    /// the stream of the nearest active state, leaf first, carrying data of
    /// type `D`. A returned stream must have a current value.
    fn data_stream<D: Send + Sync + 'static>(
        &self,
        state: Option<&StateKey>,
    ) -> Option<DataStream<D>>;
}

/// A hierarchical state machine the router can start, stop and observe.
pub trait StateMachine: Send + Sync + 'static {
    type Handle: ActiveState;

    /// Start the machine, in `initial` or in its configured initial state.
    fn start(
        &self,
        initial: Option<StateKey>,
    ) -> impl Future<Output = Result<Self::Handle, MachineError>> + Send;

    /// Stop the machine.
    fn stop(&self) -> impl Future<Output = Result<(), MachineError>> + Send;

    fn is_started(&self) -> bool;

    /// Handle to the current active states, if started.
    fn current(&self) -> Option<Self::Handle>;

    /// Transitions, in the order the machine performs them.
    fn transitions(&self) -> broadcast::Receiver<TransitionEvent>;

    /// Messages the machine failed to process.
    fn failed_messages(&self) -> broadcast::Receiver<FailedMessageEvent>;
}

/// Data value of a state that embeds another machine.
///
/// The outer machine owns the handle in the state's data slot; routers only
/// borrow it while that state is active.
pub struct NestedMachineHandle<M> {
    machine: Arc<M>,
}

impl<M: StateMachine> NestedMachineHandle<M> {
    pub fn new(machine: M) -> Self {
        Self {
            machine: Arc::new(machine),
        }
    }

    pub fn from_arc(machine: Arc<M>) -> Self {
        Self { machine }
    }

    /// Active states of the nested machine, if it is running.
    pub fn current(&self) -> Option<M::Handle> {
        self.machine.current()
    }

    /// Transitions of the nested machine.
    pub fn transitions(&self) -> broadcast::Receiver<TransitionEvent> {
        self.machine.transitions()
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }
}

impl<M> Clone for NestedMachineHandle<M> {
    fn clone(&self) -> Self {
        Self {
            machine: Arc::clone(&self.machine),
        }
    }
}

impl<M> fmt::Debug for NestedMachineHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NestedMachineHandle")
            .field("machine", &std::any::type_name::<M>())
            .finish()
    }
}

/// Explicitly passed machine context for child and nested routers.
///
/// Carries the enclosing router's active-state handle and a transition
/// receiver that child routers clone their own subscription from.
pub struct MachineContext<H> {
    handle: H,
    transitions: broadcast::Receiver<TransitionEvent>,
}

impl<H: ActiveState> MachineContext<H> {
    pub fn new(handle: H, transitions: broadcast::Receiver<TransitionEvent>) -> Self {
        Self {
            handle,
            transitions,
        }
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    /// New receiver for transitions emitted from now on.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<TransitionEvent> {
        self.transitions.resubscribe()
    }
}

impl<H: ActiveState> Clone for MachineContext<H> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            transitions: self.transitions.resubscribe(),
        }
    }
}

impl<H> fmt::Debug for MachineContext<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineContext").finish_non_exhaustive()
    }
}
