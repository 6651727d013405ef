//! Guard predicates for page pops.
//!
//! When the hosting navigator reports that the user popped a page, the
//! router consults a [`PopGuard`] to decide whether the pop is accepted.
//! With a single-page stack the default guard accepts every pop.

use super::key::StateKey;
use std::fmt;
use std::sync::Arc;

/// Pure predicate that decides whether a page bound to a state may be popped.
///
/// # Example
///
/// ```rust
/// use stateroute::core::{PopGuard, StateKey};
///
/// let guard = PopGuard::new(|state: &StateKey| state.name() != "checkout");
///
/// assert!(guard.check(&StateKey::new("browse")));
/// assert!(!guard.check(&StateKey::new("checkout")));
/// assert!(PopGuard::accept_all().check(&StateKey::new("checkout")));
/// ```
#[derive(Clone)]
pub struct PopGuard {
    predicate: Arc<dyn Fn(&StateKey) -> bool + Send + Sync>,
}

impl PopGuard {
    /// Create a guard from a pure predicate function.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&StateKey) -> bool + Send + Sync + 'static,
    {
        PopGuard {
            predicate: Arc::new(predicate),
        }
    }

    /// Guard that accepts every pop.
    pub fn accept_all() -> Self {
        Self::new(|_| true)
    }

    /// Check whether popping the page for `state` is accepted.
    pub fn check(&self, state: &StateKey) -> bool {
        (self.predicate)(state)
    }
}

impl Default for PopGuard {
    fn default() -> Self {
        Self::accept_all()
    }
}

impl fmt::Debug for PopGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_guard_accepts_everything() {
        let guard = PopGuard::default();
        assert!(guard.check(&StateKey::new("a")));
        assert!(guard.check(&StateKey::new("b")));
    }

    #[test]
    fn guard_applies_predicate() {
        let guard = PopGuard::new(|s: &StateKey| s.name().starts_with("modal"));

        assert!(guard.check(&StateKey::new("modalConfirm")));
        assert!(!guard.check(&StateKey::new("home")));
    }

    #[test]
    fn guard_is_deterministic() {
        let state = StateKey::new("home");
        let guard = PopGuard::new(|s: &StateKey| s.name().len() > 3);

        assert_eq!(guard.check(&state), guard.check(&state));
    }

    #[test]
    fn cloned_guard_shares_predicate() {
        let guard = PopGuard::new(|s: &StateKey| s.name() == "x");
        let cloned = guard.clone();
        assert!(cloned.check(&StateKey::new("x")));
        assert!(!cloned.check(&StateKey::new("y")));
    }
}
