//! Data resolution and combination.
//!
//! - [`DataResolver`] finds a state's data stream for the active states
//! - [`ResolverSet`] / [`StreamSet`] group resolvers and streams by position
//! - [`CombinedViewModel`] keeps the latest value of every position

mod combined;
mod resolver;
mod set;

pub use combined::{CombinedUpdate, CombinedViewModel};
pub use resolver::{DataResolver, ResolveError, ResolverCache, ResolverKey, TypeTag};
pub use set::{DataArity, ResolverSet, StreamSet};
