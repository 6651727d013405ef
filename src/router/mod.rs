//! Router delegates: keep a page stack in step with a machine.
//!
//! Three variants share one engine and differ in where the active states
//! come from:
//!
//! - [`RouterDelegate`] owns the machine and starts/stops it
//! - [`ChildRouterDelegate`] follows a machine passed in a [`MachineContext`](crate::machine::MachineContext)
//! - [`NestedRouterDelegate`] follows a machine stored in an enclosing state's data
//!
//! Routers are built with [`RouterBuilder`], which validates the pages
//! before anything renders.

mod child;
mod config;
mod delegate;
mod error;
mod nested;
mod outer;
mod subscription;

pub use child::ChildRouterDelegate;
pub use config::{RouterBuilder, RouterConfig};
pub use delegate::{PageContent, PageHandle, PageKey};
pub use error::RouterError;
pub use nested::NestedRouterDelegate;
pub use outer::RouterDelegate;
pub use subscription::{SubscriptionLifecycleController, SubscriptionStats, SyncOutcome};
