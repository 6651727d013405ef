//! Declarative binding of a state to a page builder.

use crate::core::StateKey;
use crate::data::{
    CombinedUpdate, CombinedViewModel, DataArity, DataResolver, ResolveError, ResolverKey,
    ResolverSet, StreamSet,
};
use crate::machine::{ActiveState, DataError};
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Context handed to page builders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderContext {
    /// State the page is bound to
    pub state: StateKey,
    /// Whether the host wraps the page in common chrome
    pub scaffold: bool,
    /// Revision of the host's render dependencies; a change resubscribes
    pub revision: u64,
}

/// Reusable binding of one state to a view builder and the data it reads.
///
/// Pages are built once when the router is configured and shared for the
/// router's lifetime.
///
/// # Example
///
/// ```rust
/// use stateroute::data::DataResolver;
/// use stateroute::page::PageDefinition;
/// use stateroute::testing::MemoryHandle;
///
/// let enter: PageDefinition<MemoryHandle, String> =
///     PageDefinition::new("enterText", |_ctx, _machine| "Enter some text".to_string());
///
/// let show: PageDefinition<MemoryHandle, String> = PageDefinition::with_data(
///     "showUppercase",
///     DataResolver::<String>::nearest(),
///     |_ctx, text, _machine| format!("Uppercase: {text}"),
/// );
///
/// assert_eq!(enter.resolver_keys().len(), 0);
/// assert_eq!(show.resolver_keys().len(), 1);
/// ```
pub struct PageDefinition<H, V> {
    state: StateKey,
    factory: Arc<dyn PageFactory<H, V>>,
}

impl<H: ActiveState, V: 'static> PageDefinition<H, V> {
    /// Page that reads no data.
    pub fn new<F>(state: impl Into<StateKey>, builder: F) -> Self
    where
        F: Fn(&RenderContext, &H) -> V + Send + Sync + 'static,
    {
        Self::with_resolvers(state, (), move |ctx: &RenderContext, (): (), handle: &H| {
            builder(ctx, handle)
        })
    }

    /// Page that reads one data value.
    pub fn with_data<A, F>(state: impl Into<StateKey>, a: DataResolver<A>, builder: F) -> Self
    where
        A: Send + Sync + 'static,
        F: Fn(&RenderContext, Arc<A>, &H) -> V + Send + Sync + 'static,
    {
        Self::with_resolvers(state, (a,), move |ctx: &RenderContext, (a,): (Arc<A>,), handle: &H| {
            builder(ctx, a, handle)
        })
    }

    /// Page that reads two data values.
    pub fn with_data2<A, B, F>(
        state: impl Into<StateKey>,
        a: DataResolver<A>,
        b: DataResolver<B>,
        builder: F,
    ) -> Self
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
        F: Fn(&RenderContext, Arc<A>, Arc<B>, &H) -> V + Send + Sync + 'static,
    {
        Self::with_resolvers(
            state,
            (a, b),
            move |ctx: &RenderContext, (a, b): (Arc<A>, Arc<B>), handle: &H| {
                builder(ctx, a, b, handle)
            },
        )
    }

    /// Page that reads three data values.
    pub fn with_data3<A, B, C, F>(
        state: impl Into<StateKey>,
        a: DataResolver<A>,
        b: DataResolver<B>,
        c: DataResolver<C>,
        builder: F,
    ) -> Self
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
        C: Send + Sync + 'static,
        F: Fn(&RenderContext, Arc<A>, Arc<B>, Arc<C>, &H) -> V + Send + Sync + 'static,
    {
        Self::with_resolvers(
            state,
            (a, b, c),
            move |ctx: &RenderContext, (a, b, c): (Arc<A>, Arc<B>, Arc<C>), handle: &H| {
                builder(ctx, a, b, c, handle)
            },
        )
    }

    /// Page reading any tuple of resolvers; the builder receives the
    /// matching tuple of values.
    pub fn with_resolvers<R, F>(state: impl Into<StateKey>, resolvers: R, builder: F) -> Self
    where
        R: ResolverSet<H>,
        F: Fn(&RenderContext, <R::Streams as StreamSet>::Values, &H) -> V + Send + Sync + 'static,
    {
        let keys = resolvers.keys();
        Self {
            state: state.into(),
            factory: Arc::new(TypedFactory {
                resolvers,
                keys,
                builder: Arc::new(builder),
            }),
        }
    }
}

impl<H, V> PageDefinition<H, V> {
    pub fn state(&self) -> &StateKey {
        &self.state
    }

    /// Keys of the declared resolvers, in builder order.
    pub fn resolver_keys(&self) -> &[ResolverKey] {
        self.factory.resolver_keys()
    }

    pub fn arity(&self) -> DataArity {
        DataArity::from_len(self.resolver_keys().len())
    }

    /// Resolve the page's data and start combining it.
    pub(crate) fn subscribe(&self, handle: &H) -> Result<Box<dyn LiveView<H, V>>, ResolveError> {
        self.factory.subscribe(&self.state, handle)
    }
}

impl<H, V> Clone for PageDefinition<H, V> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<H, V> fmt::Debug for PageDefinition<H, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageDefinition")
            .field("state", &self.state)
            .field("resolvers", &self.factory.resolver_keys())
            .finish()
    }
}

/// Type-erased page construction, so pages of any arity share a registry.
trait PageFactory<H, V>: Send + Sync {
    fn resolver_keys(&self) -> &[ResolverKey];

    fn subscribe(
        &self,
        owner: &StateKey,
        handle: &H,
    ) -> Result<Box<dyn LiveView<H, V>>, ResolveError>;
}

/// A subscribed page: its combined data plus the builder to render it.
pub(crate) trait LiveView<H, V>: Send {
    fn poll(&mut self) -> CombinedUpdate;

    fn changed(&mut self) -> BoxFuture<'_, ()>;

    fn render(&self, ctx: &RenderContext, handle: &H) -> Result<V, DataError>;

    fn emissions(&self) -> u64;

    fn sources(&self) -> &[StateKey];
}

struct TypedFactory<R, F> {
    resolvers: R,
    keys: Vec<ResolverKey>,
    builder: Arc<F>,
}

impl<H, V, R, F> PageFactory<H, V> for TypedFactory<R, F>
where
    H: ActiveState,
    V: 'static,
    R: ResolverSet<H>,
    F: Fn(&RenderContext, <R::Streams as StreamSet>::Values, &H) -> V + Send + Sync + 'static,
{
    fn resolver_keys(&self) -> &[ResolverKey] {
        &self.keys
    }

    fn subscribe(
        &self,
        owner: &StateKey,
        handle: &H,
    ) -> Result<Box<dyn LiveView<H, V>>, ResolveError> {
        let streams = self.resolvers.resolve(handle)?;
        Ok(Box::new(TypedView {
            model: CombinedViewModel::subscribe(streams, owner.clone()),
            builder: Arc::clone(&self.builder),
        }))
    }
}

struct TypedView<S: StreamSet, F> {
    model: CombinedViewModel<S>,
    builder: Arc<F>,
}

impl<H, V, S, F> LiveView<H, V> for TypedView<S, F>
where
    S: StreamSet,
    F: Fn(&RenderContext, S::Values, &H) -> V + Send + Sync + 'static,
{
    fn poll(&mut self) -> CombinedUpdate {
        self.model.poll()
    }

    fn changed(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(self.model.changed())
    }

    fn render(&self, ctx: &RenderContext, handle: &H) -> Result<V, DataError> {
        match self.model.latest() {
            Ok(values) => Ok((self.builder)(ctx, values.clone(), handle)),
            Err(error) => Err(error.clone()),
        }
    }

    fn emissions(&self) -> u64 {
        self.model.emissions()
    }

    fn sources(&self) -> &[StateKey] {
        self.model.sources()
    }
}
