//! The state machine engine as seen by the router.
//!
//! # Key Concepts
//!
//! - **ActiveState**: read-only view of the active-state path and per-state data
//! - **StateMachine**: start/stop plus transition and failure notifications
//! - **Data streams**: `watch`-backed streams whose current value is always readable
//! - **Nested machines**: a machine stored as the data of an outer state

mod engine;
mod error;
mod stream;

pub use engine::{ActiveState, MachineContext, NestedMachineHandle, StateMachine};
pub use error::{DataError, MachineError};
pub use stream::{DataSender, DataStream, Emission, StreamPoll};
