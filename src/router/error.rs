//! Errors raised by router delegates.

use crate::machine::MachineError;
use crate::page::ConfigError;
use thiserror::Error;

/// Errors that can occur when building or driving a router.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Machine(#[from] MachineError),

    #[error("{operation} is not supported by {router} routers")]
    Unsupported {
        operation: &'static str,
        router: &'static str,
    },

    #[error("Router is not started. Call .start() first")]
    NotStarted,

    #[error("Router has been stopped and cannot be restarted")]
    Stopped,
}
