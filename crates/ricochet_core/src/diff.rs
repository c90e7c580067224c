//! Sparse frame-to-input overlay.

use crate::input::Input;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map;

/// Sparse, ordered mapping from frame number to input
///
/// Represents an override layered on a baseline (a recorded movie or a parent
/// transaction). Keys are unique per layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDiff {
    frames: BTreeMap<u64, Input>,
}

impl InputDiff {
    /// Create an empty diff
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The input override at `frame`, if any
    #[must_use]
    pub fn get(&self, frame: u64) -> Option<Input> {
        self.frames.get(&frame).copied()
    }

    /// Set the input at `frame`, replacing any existing override
    pub fn set(&mut self, frame: u64, input: Input) {
        self.frames.insert(frame, input);
    }

    /// Earliest overridden frame
    #[must_use]
    pub fn first_frame(&self) -> Option<u64> {
        self.frames.keys().next().copied()
    }

    /// Latest overridden frame
    #[must_use]
    pub fn last_frame(&self) -> Option<u64> {
        self.frames.keys().next_back().copied()
    }

    /// Remove all overrides at or after `frame`
    pub fn trim_from(&mut self, frame: u64) {
        self.frames.split_off(&frame);
    }

    /// Remove all overrides strictly after `frame`
    pub fn trim_after(&mut self, frame: u64) {
        if let Some(next) = frame.checked_add(1) {
            self.frames.split_off(&next);
        }
    }

    /// Absorb another diff, overriding on key collision
    pub fn splice(&mut self, other: InputDiff) {
        self.frames.extend(other.frames);
    }

    /// Number of overridden frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frames are overridden
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Remove all overrides
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Iterate overrides in frame order
    pub fn iter(&self) -> btree_map::Iter<'_, u64, Input> {
        self.frames.iter()
    }
}

impl FromIterator<(u64, Input)> for InputDiff {
    fn from_iter<I: IntoIterator<Item = (u64, Input)>>(iter: I) -> Self {
        Self {
            frames: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a InputDiff {
    type Item = (&'a u64, &'a Input);
    type IntoIter = btree_map::Iter<'a, u64, Input>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::buttons;

    fn sample() -> InputDiff {
        [
            (5, Input::new(buttons::A, 10, 0)),
            (7, Input::new(0, -20, 30)),
            (12, Input::new(buttons::B, 0, 0)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_get_set() {
        let mut diff = InputDiff::new();
        assert!(diff.is_empty());
        diff.set(3, Input::new(buttons::Z, 0, 0));
        assert_eq!(diff.get(3), Some(Input::new(buttons::Z, 0, 0)));
        assert_eq!(diff.get(4), None);
    }

    #[test]
    fn test_first_last_frame() {
        let diff = sample();
        assert_eq!(diff.first_frame(), Some(5));
        assert_eq!(diff.last_frame(), Some(12));
        assert_eq!(InputDiff::new().first_frame(), None);
    }

    #[test]
    fn test_trim_from() {
        let mut diff = sample();
        diff.trim_from(7);
        assert_eq!(diff.len(), 1);
        assert!(diff.get(7).is_none());
        assert!(diff.get(5).is_some());
    }

    #[test]
    fn test_trim_after() {
        let mut diff = sample();
        diff.trim_after(7);
        assert_eq!(diff.len(), 2);
        assert!(diff.get(7).is_some());
        assert!(diff.get(12).is_none());
    }

    #[test]
    fn test_splice_overrides_collisions() {
        let mut parent = sample();
        let mut child = InputDiff::new();
        child.set(7, Input::new(buttons::START, 0, 0));
        child.set(20, Input::neutral());
        parent.splice(child);
        assert_eq!(parent.len(), 4);
        assert_eq!(parent.get(7), Some(Input::new(buttons::START, 0, 0)));
        assert_eq!(parent.last_frame(), Some(20));
    }

    #[test]
    fn test_splice_idempotent() {
        let mut a = sample();
        let before = a.clone();
        a.splice(before.clone());
        assert_eq!(a, before);
    }
}
