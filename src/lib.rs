//! Stateroute: page routing driven by a hierarchical state machine
//!
//! Stateroute binds the active states of a hierarchical state machine to a
//! declarative page stack. The machine decides where the application is;
//! the router decides what to show for it.
//!
//! # Core Concepts
//!
//! - **Pages**: each page is bound to one state and declares the state data
//!   it reads through typed resolvers
//! - **Deepest match**: when several active states have pages, the one
//!   closest to the active leaf wins
//! - **Combined data**: a page's data streams are combined into one value
//!   that is rebuilt whenever any of them emits
//! - **Subscriptions**: a page's data is subscribed once and rebuilt only
//!   when the page, its resolvers or its render context change
//!
//! # Example
//!
//! ```rust
//! use stateroute::data::DataResolver;
//! use stateroute::page::PageDefinition;
//! use stateroute::router::RouterBuilder;
//! use stateroute::testing::{MemoryHandle, MemoryMachine};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let machine = MemoryMachine::builder()
//!     .state("root")
//!     .child("root", "enterText")
//!     .child("root", "showUppercase")
//!     .initial("enterText")
//!     .build();
//!
//! let mut router = RouterBuilder::<MemoryHandle, String>::new()
//!     .page(PageDefinition::new("enterText", |_, _| "Enter some text".to_string()))
//!     .page(PageDefinition::with_data(
//!         "showUppercase",
//!         DataResolver::<String>::nearest(),
//!         |_, text, _| text.to_uppercase(),
//!     ))
//!     .build(machine.clone())
//!     .unwrap();
//!
//! router.start().await.unwrap();
//! machine.go_to_with("showUppercase", String::from("hello")).unwrap();
//! router.poll();
//!
//! let page = &router.page_stack()[0];
//! assert_eq!(page.content.view().map(String::as_str), Some("HELLO"));
//! # });
//! ```

pub mod core;
pub mod data;
pub mod machine;
pub mod page;
pub mod router;
pub mod testing;

// Re-export commonly used types
pub use core::{ActiveStatePath, StateKey, TransitionEvent};
pub use data::DataResolver;
pub use machine::{ActiveState, StateMachine};
pub use page::{PageDefinition, PageRegistry};
pub use router::{PageHandle, RouterBuilder, RouterConfig, RouterDelegate, RouterError};
