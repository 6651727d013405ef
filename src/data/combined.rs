//! Combine-latest over a page's data streams.
//!
//! A [`CombinedViewModel`] holds the latest value of every stream a page
//! reads. Any emission replaces the combined value wholesale with the
//! latest value of every position; positions that did not emit keep their
//! previous value.
//!
//! # Termination
//!
//! - A failed input is surfaced once. The model then stays failed and
//!   ignores later emissions.
//! - The model completes only when a stream belonging to the owning
//!   state (the page's own state) completes. Completion of an ancestor's
//!   stream is logged and its last value kept.

use super::set::StreamSet;
use crate::core::StateKey;
use crate::machine::{DataError, StreamPoll};
use tracing::{debug, warn};

/// Outcome of [`CombinedViewModel::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CombinedUpdate {
    /// Nothing changed
    Idle,
    /// A new combined value is available
    Emitted,
    /// An input failed; reported once
    Failed(DataError),
    /// The owning state's stream completed; reported once
    Completed,
}

/// Latest-value snapshot over a tuple of data streams.
pub struct CombinedViewModel<S: StreamSet> {
    streams: S,
    owner: StateKey,
    sources: Vec<StateKey>,
    latest: Result<S::Values, DataError>,
    completed: Vec<bool>,
    finished: bool,
    emissions: u64,
}

impl<S: StreamSet> CombinedViewModel<S> {
    /// Snapshot every stream's current value and start tracking emissions.
    ///
    /// The initial combined value is available immediately; there is no
    /// intermediate loading state.
    pub fn subscribe(streams: S, owner: StateKey) -> Self {
        let sources = streams.sources();
        let latest = streams.current();
        if let Err(error) = &latest {
            warn!(state = %owner, %error, "data stream failed before first render");
        }
        Self {
            completed: vec![false; sources.len()],
            streams,
            owner,
            sources,
            latest,
            finished: false,
            emissions: 1,
        }
    }

    /// Apply pending emissions.
    pub fn poll(&mut self) -> CombinedUpdate {
        if self.latest.is_err() || self.finished {
            return CombinedUpdate::Idle;
        }

        let mut changed = false;
        let mut owner_completed = false;
        for (position, poll) in self.streams.poll_each().into_iter().enumerate() {
            match poll {
                StreamPoll::Pending => {}
                StreamPoll::Ready => changed = true,
                StreamPoll::Closed { updated } => {
                    changed |= updated;
                    self.completed[position] = true;
                    if self.sources[position] == self.owner {
                        owner_completed = true;
                    } else {
                        debug!(
                            state = %self.owner,
                            source = %self.sources[position],
                            "ancestor data stream completed; keeping last value"
                        );
                    }
                }
            }
        }

        if changed {
            match self.streams.current() {
                Ok(values) => {
                    self.latest = Ok(values);
                    self.emissions += 1;
                }
                Err(error) => {
                    warn!(state = %self.owner, %error, "data stream failed");
                    self.latest = Err(error.clone());
                    return CombinedUpdate::Failed(error);
                }
            }
        }

        if owner_completed {
            debug!(state = %self.owner, "owning data stream completed");
            self.finished = true;
            return CombinedUpdate::Completed;
        }

        if changed {
            CombinedUpdate::Emitted
        } else {
            CombinedUpdate::Idle
        }
    }

    /// Wait until an input emits. Never resolves once the model failed or
    /// completed.
    pub async fn changed(&mut self) {
        if self.latest.is_err() || self.finished {
            return std::future::pending::<()>().await;
        }
        self.streams.changed().await;
    }

    /// Latest combined value, or the failure that ended the model.
    pub fn latest(&self) -> Result<&S::Values, &DataError> {
        self.latest.as_ref()
    }

    pub fn error(&self) -> Option<&DataError> {
        self.latest.as_ref().err()
    }

    pub fn is_completed(&self) -> bool {
        self.finished
    }

    /// Whether the input at `position` has completed.
    pub fn is_position_completed(&self, position: usize) -> bool {
        self.completed.get(position).copied().unwrap_or(false)
    }

    /// Combined values produced so far, including the initial snapshot.
    pub fn emissions(&self) -> u64 {
        self.emissions
    }

    pub fn owner(&self) -> &StateKey {
        &self.owner
    }

    /// State each position reads from.
    pub fn sources(&self) -> &[StateKey] {
        &self.sources
    }
}
