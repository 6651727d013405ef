//! Fixed-arity groups of resolvers and the streams they resolve to.
//!
//! A page declares its data as a tuple of [`DataResolver`]s. Resolving the
//! tuple yields a tuple of [`DataStream`]s whose current values are handed
//! to the page builder as a tuple of `Arc`s, one per position. The empty
//! tuple is the "no data" case and goes through the same machinery.

use super::resolver::{DataResolver, ResolveError, ResolverKey};
use crate::core::StateKey;
use crate::machine::{ActiveState, DataError, DataStream, StreamPoll};
use futures_util::future::{select_all, BoxFuture};
use std::sync::Arc;

/// Number of data values a page consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataArity {
    None,
    One,
    Two,
    Three,
    Many(usize),
}

impl DataArity {
    pub fn from_len(len: usize) -> Self {
        match len {
            0 => Self::None,
            1 => Self::One,
            2 => Self::Two,
            3 => Self::Three,
            n => Self::Many(n),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
            Self::Many(n) => *n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tuple of resolvers declared by a page.
pub trait ResolverSet<H: ActiveState>: Send + Sync + 'static {
    type Streams: StreamSet;

    /// Keys of every position, in order.
    fn keys(&self) -> Vec<ResolverKey>;

    /// Resolve every position; fails on the first position that cannot resolve.
    fn resolve(&self, handle: &H) -> Result<Self::Streams, ResolveError>;
}

/// Tuple of live data streams.
pub trait StreamSet: Send + 'static {
    /// Current value of every position.
    type Values: Clone + Send + Sync;

    const LEN: usize;

    /// State each position reads from.
    fn sources(&self) -> Vec<StateKey>;

    /// Latest value of every position; the first failed position wins.
    fn current(&self) -> Result<Self::Values, DataError>;

    /// Poll every position without waiting.
    fn poll_each(&mut self) -> Vec<StreamPoll>;

    /// Wait until any open position emits or closes.
    fn changed(&mut self) -> BoxFuture<'_, ()>;
}

impl<H: ActiveState> ResolverSet<H> for () {
    type Streams = ();

    fn keys(&self) -> Vec<ResolverKey> {
        Vec::new()
    }

    fn resolve(&self, _handle: &H) -> Result<Self::Streams, ResolveError> {
        Ok(())
    }
}

impl StreamSet for () {
    type Values = ();

    const LEN: usize = 0;

    fn sources(&self) -> Vec<StateKey> {
        Vec::new()
    }

    fn current(&self) -> Result<Self::Values, DataError> {
        Ok(())
    }

    fn poll_each(&mut self) -> Vec<StreamPoll> {
        Vec::new()
    }

    fn changed(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(std::future::pending::<()>())
    }
}

macro_rules! tuple_sets {
    ($len:expr; $($ty:ident $var:ident $idx:tt),+) => {
        impl<H: ActiveState, $($ty: Send + Sync + 'static),+> ResolverSet<H>
            for ($(DataResolver<$ty>,)+)
        {
            type Streams = ($(DataStream<$ty>,)+);

            fn keys(&self) -> Vec<ResolverKey> {
                vec![$(self.$idx.key().clone()),+]
            }

            fn resolve(&self, handle: &H) -> Result<Self::Streams, ResolveError> {
                Ok(($(self.$idx.resolve(handle)?,)+))
            }
        }

        impl<$($ty: Send + Sync + 'static),+> StreamSet for ($(DataStream<$ty>,)+) {
            type Values = ($(Arc<$ty>,)+);

            const LEN: usize = $len;

            fn sources(&self) -> Vec<StateKey> {
                vec![$(self.$idx.source().clone()),+]
            }

            fn current(&self) -> Result<Self::Values, DataError> {
                Ok(($(self.$idx.current()?,)+))
            }

            fn poll_each(&mut self) -> Vec<StreamPoll> {
                vec![$(self.$idx.poll_next()),+]
            }

            fn changed(&mut self) -> BoxFuture<'_, ()> {
                let ($($var,)+) = self;
                let mut waits: Vec<BoxFuture<'_, ()>> = Vec::new();
                $(
                    if !$var.is_closed() {
                        waits.push(Box::pin($var.changed()));
                    }
                )+
                Box::pin(async move {
                    if waits.is_empty() {
                        std::future::pending::<()>().await;
                    } else {
                        select_all(waits).await;
                    }
                })
            }
        }
    };
}

tuple_sets!(1; A a 0);
tuple_sets!(2; A a 0, B b 1);
tuple_sets!(3; A a 0, B b 1, C c 2);
tuple_sets!(4; A a 0, B b 1, C c 2, E e 3);
tuple_sets!(5; A a 0, B b 1, C c 2, E e 3, F f 4);
tuple_sets!(6; A a 0, B b 1, C c 2, E e 3, F f 4, G g 5);
