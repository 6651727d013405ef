//! Core value types shared by every router component.
//!
//! This module contains the plain data of the routing engine:
//! - State identifiers and active-state paths
//! - Transition and failure events reported by the engine
//! - Bounded transition history
//! - Pop guards
//!
//! Nothing in this module performs I/O or holds subscriptions.

mod guard;
mod history;
mod key;

pub use guard::PopGuard;
pub use history::{
    FailedMessageEvent, TransitionEvent, TransitionHistory, DEFAULT_HISTORY_CAPACITY,
};
pub use key::{ActiveStatePath, PathError, StateKey};
