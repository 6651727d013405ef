//! Typed lookup of a state's data stream.

use crate::core::StateKey;
use crate::machine::{ActiveState, DataStream};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

/// Static type identity of a resolver's data.
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<D: 'static>() -> Self {
        Self {
            id: TypeId::of::<D>(),
            name: std::any::type_name::<D>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl Hash for TypeTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Identity of a resolver: the state it reads from (or `None` for the
/// nearest data-carrying ancestor) and the data type it reads.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResolverKey {
    pub state: Option<StateKey>,
    pub data_type: TypeTag,
}

impl fmt::Display for ResolverKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            Some(state) => write!(f, "{}<{}>", state, self.data_type.name),
            None => write!(f, "*<{}>", self.data_type.name),
        }
    }
}

/// Why a resolver produced no stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("State '{state}' is not active; cannot read {data_type} data")]
    Inactive {
        state: StateKey,
        data_type: &'static str,
    },

    #[error("No active state carries {data_type} data{}", for_state(.state))]
    NotFound {
        state: Option<StateKey>,
        data_type: &'static str,
    },

    /// The engine returned a stream without a current value.
    #[error("Data stream of '{state}' ({data_type}) has no current value")]
    NoCurrentValue {
        state: StateKey,
        data_type: &'static str,
    },
}

fn for_state(state: &Option<StateKey>) -> String {
    state
        .as_ref()
        .map(|s| format!(" for state '{s}'"))
        .unwrap_or_default()
}

/// Resolves the data stream of type `D` for the current active states.
///
/// Two resolvers are equal when they read the same state (or both read the
/// nearest ancestor) and the same data type. Routers rely on this to skip
/// resubscribing when a page's resolvers did not change.
///
/// ```rust
/// use stateroute::data::DataResolver;
///
/// let a = DataResolver::<String>::for_state("showUppercase");
/// let b = DataResolver::<String>::for_state("showUppercase");
/// let c = DataResolver::<u32>::for_state("showUppercase");
///
/// assert_eq!(a, b);
/// assert_ne!(a.key(), c.key());
/// ```
pub struct DataResolver<D> {
    key: Arc<ResolverKey>,
    _marker: PhantomData<fn() -> D>,
}

impl<D: Send + Sync + 'static> DataResolver<D> {
    /// Resolver for the nearest active state carrying `D`, leaf first.
    pub fn nearest() -> Self {
        Self::from_key(Arc::new(ResolverKey {
            state: None,
            data_type: TypeTag::of::<D>(),
        }))
    }

    /// Resolver for the `D` data of a specific ancestor-or-self state.
    pub fn for_state(state: impl Into<StateKey>) -> Self {
        Self::from_key(Arc::new(ResolverKey {
            state: Some(state.into()),
            data_type: TypeTag::of::<D>(),
        }))
    }

    fn from_key(key: Arc<ResolverKey>) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }

    /// Resolve against the active states in `handle`.
    pub fn resolve<H: ActiveState>(&self, handle: &H) -> Result<DataStream<D>, ResolveError> {
        let data_type = self.key.data_type.name;
        if let Some(state) = &self.key.state {
            if !handle.is_in_state(state) {
                return Err(ResolveError::Inactive {
                    state: state.clone(),
                    data_type,
                });
            }
        }

        let stream = handle
            .data_stream::<D>(self.key.state.as_ref())
            .ok_or_else(|| ResolveError::NotFound {
                state: self.key.state.clone(),
                data_type,
            })?;

        if !stream.has_value() {
            error!(
                state = %stream.source(),
                data_type,
                "engine returned a data stream without a current value"
            );
            return Err(ResolveError::NoCurrentValue {
                state: stream.source().clone(),
                data_type,
            });
        }
        Ok(stream)
    }
}

impl<D> DataResolver<D> {
    pub fn key(&self) -> &ResolverKey {
        &self.key
    }

    pub fn state(&self) -> Option<&StateKey> {
        self.key.state.as_ref()
    }
}

impl<D> Clone for DataResolver<D> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            _marker: PhantomData,
        }
    }
}

impl<D> PartialEq for DataResolver<D> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.key, &other.key) || self.key == other.key
    }
}

impl<D> Eq for DataResolver<D> {}

impl<D> fmt::Debug for DataResolver<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataResolver({})", self.key)
    }
}

/// Memoization table for resolvers, scoped to one router configuration.
///
/// Equal `(state, type)` pairs are interned so that the resolvers handed
/// out share one key allocation.
#[derive(Debug, Default)]
pub struct ResolverCache {
    entries: HashMap<ResolverKey, Arc<ResolverKey>>,
}

impl ResolverCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interned resolver for `D` data of `state`, or of the nearest
    /// data-carrying ancestor when `state` is `None`.
    pub fn resolver<D: Send + Sync + 'static>(
        &mut self,
        state: Option<StateKey>,
    ) -> DataResolver<D> {
        let key = ResolverKey {
            state,
            data_type: TypeTag::of::<D>(),
        };
        let interned = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(key));
        DataResolver::from_key(Arc::clone(interned))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
