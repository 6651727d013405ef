//! Pages: what to show for which state.
//!
//! - [`PageDefinition`] binds a state to a builder and the data it reads
//! - [`PageRegistry`] holds at most one page per state
//! - [`ActivePageResolver`] picks the deepest registered page for the active states

mod definition;
mod registry;
mod resolve;

pub(crate) use definition::LiveView;
pub use definition::{PageDefinition, RenderContext};
pub use registry::{ConfigError, PageRegistry, NESTED_PAGES, PAGES};
pub use resolve::{ActivePageResolver, NoPageDiagnostic};
