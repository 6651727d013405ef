//! Value streams attached to data-carrying states.
//!
//! The engine publishes a state's data through a [`DataSender`]; the router
//! reads it through a [`DataStream`]. Both sides share a `tokio::sync::watch`
//! channel, so the latest value is always synchronously readable and a
//! dropped sender completes the stream without losing its last value.

use super::error::DataError;
use crate::core::StateKey;
use std::sync::Arc;
use tokio::sync::watch;

/// Latest emission on a data stream.
#[derive(Debug)]
pub enum Emission<D> {
    /// Nothing published yet
    Empty,
    /// Most recent value
    Value(Arc<D>),
    /// Most recent emission was a failure
    Failed(DataError),
}

/// Outcome of a non-blocking [`DataStream::poll_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPoll {
    /// No emission since the last poll
    Pending,
    /// A new emission is available
    Ready,
    /// The publisher went away; `updated` tells whether an emission arrived
    /// since the last poll. Reported once.
    Closed { updated: bool },
}

/// Publishing side of a state's data stream.
///
/// ```rust
/// use stateroute::core::StateKey;
/// use stateroute::machine::DataSender;
///
/// let sender = DataSender::new(StateKey::new("showUppercase"), String::from("HELLO"));
/// let stream = sender.subscribe();
///
/// assert_eq!(stream.current().unwrap().as_str(), "HELLO");
/// assert_eq!(stream.source().name(), "showUppercase");
/// ```
#[derive(Debug)]
pub struct DataSender<D> {
    source: StateKey,
    tx: watch::Sender<Emission<D>>,
}

impl<D> DataSender<D> {
    /// Create a sender whose stream starts with `initial`.
    pub fn new(source: StateKey, initial: D) -> Self {
        let (tx, _rx) = watch::channel(Emission::Value(Arc::new(initial)));
        Self { source, tx }
    }

    /// Create a sender with nothing published yet.
    pub fn empty(source: StateKey) -> Self {
        let (tx, _rx) = watch::channel(Emission::Empty);
        Self { source, tx }
    }

    pub fn source(&self) -> &StateKey {
        &self.source
    }

    /// Publish a new value.
    pub fn send(&self, value: D) {
        self.tx.send_replace(Emission::Value(Arc::new(value)));
    }

    /// Publish a failure.
    pub fn fail(&self, message: impl Into<String>) {
        self.tx.send_replace(Emission::Failed(DataError::StreamFailed {
            state: self.source.clone(),
            message: message.into(),
        }));
    }

    /// Open a stream positioned at the current emission.
    pub fn subscribe(&self) -> DataStream<D> {
        DataStream::new(self.source.clone(), self.tx.subscribe())
    }

    /// Number of open streams.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// What a stream last handed out, used to detect a final emission that
/// raced with the sender being dropped.
#[derive(Debug)]
enum Seen<D> {
    Empty,
    Value(Arc<D>),
    Failed,
}

impl<D> Seen<D> {
    fn of(emission: &Emission<D>) -> Self {
        match emission {
            Emission::Empty => Seen::Empty,
            Emission::Value(value) => Seen::Value(Arc::clone(value)),
            Emission::Failed(_) => Seen::Failed,
        }
    }

    fn matches(&self, emission: &Emission<D>) -> bool {
        match (self, emission) {
            (Seen::Empty, Emission::Empty) | (Seen::Failed, Emission::Failed(_)) => true,
            (Seen::Value(seen), Emission::Value(current)) => Arc::ptr_eq(seen, current),
            _ => false,
        }
    }
}

/// Reading side of a state's data stream.
#[derive(Debug)]
pub struct DataStream<D> {
    source: StateKey,
    rx: watch::Receiver<Emission<D>>,
    seen: Seen<D>,
    woken: bool,
    closed: bool,
}

impl<D> DataStream<D> {
    fn new(source: StateKey, rx: watch::Receiver<Emission<D>>) -> Self {
        let seen = Seen::of(&rx.borrow());
        Self {
            source,
            rx,
            seen,
            woken: false,
            closed: false,
        }
    }

    /// State whose data this stream carries.
    pub fn source(&self) -> &StateKey {
        &self.source
    }

    /// Whether a value (or failure) has been published.
    pub fn has_value(&self) -> bool {
        !matches!(&*self.rx.borrow(), Emission::Empty)
    }

    /// Latest value, or the failure that replaced it.
    pub fn current(&self) -> Result<Arc<D>, DataError> {
        match &*self.rx.borrow() {
            Emission::Value(value) => Ok(Arc::clone(value)),
            Emission::Failed(error) => Err(error.clone()),
            Emission::Empty => Err(DataError::NoCurrentValue {
                state: self.source.clone(),
            }),
        }
    }

    /// Whether completion has already been reported by [`poll_next`](Self::poll_next).
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Check for a new emission without waiting.
    pub fn poll_next(&mut self) -> StreamPoll {
        if self.closed {
            return StreamPoll::Pending;
        }
        let woken = std::mem::take(&mut self.woken);
        match self.rx.has_changed() {
            Ok(changed) if changed || woken => {
                self.mark_seen();
                StreamPoll::Ready
            }
            Ok(_) => StreamPoll::Pending,
            Err(_) => {
                self.closed = true;
                let updated = woken || !self.seen.matches(&self.rx.borrow());
                self.mark_seen();
                StreamPoll::Closed { updated }
            }
        }
    }

    /// Wait until the stream emits or its publisher goes away.
    ///
    /// The emission stays pending for the next [`poll_next`](Self::poll_next).
    pub async fn changed(&mut self) {
        if self.closed {
            return std::future::pending::<()>().await;
        }
        if self.rx.changed().await.is_ok() {
            self.woken = true;
        }
    }

    fn mark_seen(&mut self) {
        self.seen = Seen::of(&self.rx.borrow_and_update());
    }
}
