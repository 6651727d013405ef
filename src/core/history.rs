//! Transition events and the history a router keeps of them.
//!
//! The engine reports every transition as a [`TransitionEvent`]. Routers
//! record the events they observe in a bounded [`TransitionHistory`] so
//! that diagnostics can show how the machine reached its current state.

use super::key::StateKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Default number of transitions a [`TransitionHistory`] retains.
pub const DEFAULT_HISTORY_CAPACITY: usize = 64;

/// Record of a single machine transition.
///
/// # Example
///
/// ```rust
/// use stateroute::core::{StateKey, TransitionEvent};
///
/// let event = TransitionEvent::new(
///     StateKey::new("enterText"),
///     StateKey::new("showUppercase"),
///     vec![StateKey::new("enterText")],
/// );
///
/// assert!(event.exits(&StateKey::new("enterText")));
/// assert!(!event.is_to_final_state);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// Leaf state before the transition
    pub from: StateKey,
    /// Leaf state after the transition
    pub to: StateKey,
    /// States exited by the transition, innermost first
    pub exit_path: Vec<StateKey>,
    /// Whether `to` is a final state
    pub is_to_final_state: bool,
    /// When the transition occurred
    pub timestamp: DateTime<Utc>,
}

impl TransitionEvent {
    /// Create a non-final transition stamped with the current time.
    pub fn new(from: StateKey, to: StateKey, exit_path: Vec<StateKey>) -> Self {
        Self {
            from,
            to,
            exit_path,
            is_to_final_state: false,
            timestamp: Utc::now(),
        }
    }

    /// Mark the transition as reaching a final state.
    pub fn into_final(mut self) -> Self {
        self.is_to_final_state = true;
        self
    }

    /// Whether `key` was exited by this transition.
    pub fn exits(&self, key: &StateKey) -> bool {
        self.exit_path.contains(key)
    }
}

/// Notification that the machine failed to process a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailedMessageEvent {
    /// Leaf state that was handling the message
    pub state: StateKey,
    /// Description of the message that failed
    pub message: String,
    /// The failure reported by the engine
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl FailedMessageEvent {
    pub fn new(state: StateKey, message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Ordered, bounded history of observed transitions.
///
/// `record` returns a new history with the transition appended; when the
/// capacity is exceeded the oldest transitions are dropped.
///
/// # Example
///
/// ```rust
/// use stateroute::core::{StateKey, TransitionEvent, TransitionHistory};
///
/// let history = TransitionHistory::new();
/// let history = history.record(TransitionEvent::new(
///     StateKey::new("a"),
///     StateKey::new("b"),
///     vec![StateKey::new("a")],
/// ));
/// let history = history.record(TransitionEvent::new(
///     StateKey::new("b"),
///     StateKey::new("c"),
///     vec![StateKey::new("b")],
/// ));
///
/// let path: Vec<_> = history.get_path().iter().map(|k| k.name()).collect();
/// assert_eq!(path, vec!["a", "b", "c"]);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionHistory {
    capacity: usize,
    transitions: VecDeque<TransitionEvent>,
}

impl Default for TransitionHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransitionHistory {
    /// Create an empty history with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Create an empty history retaining at most `capacity` transitions.
    ///
    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            transitions: VecDeque::new(),
        }
    }

    /// Record a transition, returning a new history.
    pub fn record(&self, transition: TransitionEvent) -> Self {
        let mut transitions = self.transitions.clone();
        transitions.push_back(transition);
        while transitions.len() > self.capacity {
            transitions.pop_front();
        }
        Self {
            capacity: self.capacity,
            transitions,
        }
    }

    /// Leaf states traversed: the first recorded `from`, then every `to`.
    pub fn get_path(&self) -> Vec<&StateKey> {
        let mut path = Vec::new();
        if let Some(first) = self.transitions.front() {
            path.push(&first.from);
        }
        for transition in &self.transitions {
            path.push(&transition.to);
        }
        path
    }

    /// Time between the first and last retained transitions.
    pub fn duration(&self) -> Option<Duration> {
        if let (Some(first), Some(last)) = (self.transitions.front(), self.transitions.back()) {
            let duration = last.timestamp.signed_duration_since(first.timestamp);
            duration.to_std().ok()
        } else {
            None
        }
    }

    pub fn last(&self) -> Option<&TransitionEvent> {
        self.transitions.back()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// All retained transitions, oldest first.
    pub fn transitions(&self) -> impl Iterator<Item = &TransitionEvent> {
        self.transitions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(from: &'static str, to: &'static str) -> TransitionEvent {
        TransitionEvent::new(
            StateKey::from_static(from),
            StateKey::from_static(to),
            vec![StateKey::from_static(from)],
        )
    }

    #[test]
    fn new_history_is_empty() {
        let history = TransitionHistory::new();
        assert!(history.is_empty());
        assert!(history.get_path().is_empty());
        assert!(history.last().is_none());
    }

    #[test]
    fn record_does_not_mutate_original() {
        let history = TransitionHistory::new();
        let recorded = history.record(event("a", "b"));

        assert_eq!(history.len(), 0);
        assert_eq!(recorded.len(), 1);
    }

    #[test]
    fn path_follows_recorded_order() {
        let history = TransitionHistory::new()
            .record(event("a", "b"))
            .record(event("b", "c"));

        let names: Vec<_> = history.get_path().into_iter().map(StateKey::name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn capacity_drops_oldest_transitions() {
        let history = TransitionHistory::with_capacity(2)
            .record(event("a", "b"))
            .record(event("b", "c"))
            .record(event("c", "d"));

        assert_eq!(history.len(), 2);
        assert_eq!(history.get_path()[0].name(), "b");
        assert_eq!(history.last().unwrap().to.name(), "d");
    }

    #[test]
    fn zero_capacity_still_keeps_latest() {
        let history = TransitionHistory::with_capacity(0).record(event("a", "b"));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn duration_needs_transitions() {
        let history = TransitionHistory::new();
        assert!(history.duration().is_none());

        let history = history.record(event("a", "b")).record(event("b", "c"));
        assert!(history.duration().is_some());
    }

    #[test]
    fn final_transition_is_flagged() {
        let event = event("a", "done").into_final();
        assert!(event.is_to_final_state);
        assert!(event.exits(&StateKey::from_static("a")));
        assert!(!event.exits(&StateKey::from_static("done")));
    }

    #[test]
    fn events_serialize() {
        let event = event("a", "b");
        let json = serde_json::to_string(&event).unwrap();
        let back: TransitionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
