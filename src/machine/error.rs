//! Errors reported by the engine and by data streams.

use crate::core::StateKey;
use thiserror::Error;

/// Errors surfaced by a [`StateMachine`](super::StateMachine) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachineError {
    #[error("State machine is already started")]
    AlreadyStarted,

    #[error("State machine is not started")]
    NotStarted,

    #[error("No initial state specified")]
    NoInitialState,

    #[error("Unknown state '{0}'")]
    UnknownState(StateKey),

    #[error("State machine failed: {0}")]
    Engine(String),
}

/// Errors carried by a data stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    /// The publisher reported a failure; the stream stays failed until it
    /// publishes a new value.
    #[error("Data stream for state '{state}' failed: {message}")]
    StreamFailed { state: StateKey, message: String },

    /// Nothing has been published on the stream yet.
    #[error("Data stream for state '{state}' has no current value")]
    NoCurrentValue { state: StateKey },
}
