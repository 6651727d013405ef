//! State identifiers and active-state paths.
//!
//! A [`StateKey`] names one node of the machine's state tree. The engine
//! reports the currently active nodes as an [`ActiveStatePath`], ordered
//! from the root down to the active leaf.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Opaque identifier for a node in the state tree.
///
/// Keys compare by value, hash by value and are cheap to clone. Keys
/// known at compile time can be declared as constants:
///
/// ```rust
/// use stateroute::core::StateKey;
///
/// const ENTER_TEXT: StateKey = StateKey::from_static("enterText");
///
/// assert_eq!(ENTER_TEXT, StateKey::new("enterText"));
/// assert_eq!(ENTER_TEXT.name(), "enterText");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateKey(Cow<'static, str>);

impl StateKey {
    /// Create a key from any string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Create a key from a static string, usable in `const` items.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// The state's name for display/logging.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateKey({})", self.0)
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for StateKey {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

impl From<String> for StateKey {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Errors raised when constructing an [`ActiveStatePath`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("Active state path must contain at least one state")]
    Empty,
}

/// Root-to-leaf sequence of the currently active states.
///
/// A path is produced by the engine on every transition and never mutated
/// afterwards. It always holds at least one state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<StateKey>", into = "Vec<StateKey>")]
pub struct ActiveStatePath {
    states: Vec<StateKey>,
}

impl ActiveStatePath {
    /// Build a path from root-to-leaf states.
    ///
    /// ```rust
    /// use stateroute::core::{ActiveStatePath, PathError, StateKey};
    ///
    /// let path = ActiveStatePath::new(vec![StateKey::new("root"), StateKey::new("leaf")]).unwrap();
    /// assert_eq!(path.leaf().name(), "leaf");
    ///
    /// assert_eq!(ActiveStatePath::new(Vec::new()), Err(PathError::Empty));
    /// ```
    pub fn new(states: Vec<StateKey>) -> Result<Self, PathError> {
        if states.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self { states })
    }

    /// Outermost active state.
    pub fn root(&self) -> &StateKey {
        &self.states[0]
    }

    /// Innermost (most specific) active state.
    pub fn leaf(&self) -> &StateKey {
        &self.states[self.states.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Always false; kept for API symmetry with slices.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, key: &StateKey) -> bool {
        self.states.contains(key)
    }

    /// States from root to leaf.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &StateKey> {
        self.states.iter()
    }

    /// States from leaf to root.
    pub fn iter_leaf_first(&self) -> impl Iterator<Item = &StateKey> {
        self.states.iter().rev()
    }

    pub fn as_slice(&self) -> &[StateKey] {
        &self.states
    }

    /// Names of all active states, root first.
    pub fn names(&self) -> Vec<String> {
        self.states.iter().map(|k| k.name().to_string()).collect()
    }
}

impl TryFrom<Vec<StateKey>> for ActiveStatePath {
    type Error = PathError;

    fn try_from(states: Vec<StateKey>) -> Result<Self, Self::Error> {
        Self::new(states)
    }
}

impl From<ActiveStatePath> for Vec<StateKey> {
    fn from(path: ActiveStatePath) -> Self {
        path.states
    }
}

impl fmt::Display for ActiveStatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(" > "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(names: &[&'static str]) -> ActiveStatePath {
        ActiveStatePath::new(names.iter().map(|&n| StateKey::from_static(n)).collect()).unwrap()
    }

    #[test]
    fn keys_compare_by_value() {
        let owned = StateKey::new(String::from("idle"));
        let borrowed = StateKey::from_static("idle");

        assert_eq!(owned, borrowed);
        assert_ne!(owned, StateKey::new("busy"));
    }

    #[test]
    fn keys_hash_by_value() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(StateKey::new("idle"));
        assert!(set.contains(&StateKey::from_static("idle")));
    }

    #[test]
    fn key_serializes_as_plain_string() {
        let key = StateKey::from_static("enterText");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"enterText\"");

        let back: StateKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn empty_path_is_rejected() {
        assert_eq!(ActiveStatePath::new(Vec::new()), Err(PathError::Empty));
    }

    #[test]
    fn root_and_leaf_are_the_path_ends() {
        let path = path(&["root", "a", "b"]);
        assert_eq!(path.root().name(), "root");
        assert_eq!(path.leaf().name(), "b");
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn leaf_first_iteration_is_reversed() {
        let path = path(&["root", "a", "b"]);
        let names: Vec<_> = path.iter_leaf_first().map(StateKey::name).collect();
        assert_eq!(names, vec!["b", "a", "root"]);
    }

    #[test]
    fn display_joins_names() {
        assert_eq!(path(&["root", "a"]).to_string(), "root > a");
    }

    #[test]
    fn deserializing_empty_path_fails() {
        let result: Result<ActiveStatePath, _> = serde_json::from_str("[]");
        assert!(result.is_err());

        let ok: ActiveStatePath = serde_json::from_str("[\"root\"]").unwrap();
        assert_eq!(ok.leaf().name(), "root");
    }
}
