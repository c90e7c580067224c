//! Memoized per-frame derived state on top of the replay engine.

use crate::engine::ReplayEngine;
use ricochet_core::{CoreError, CoreResult, Simulation};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Invalidation callbacks the engine drives on frame-keyed caches
///
/// Implementations hold entries keyed by (level identity, frame) and react
/// to input edits, commits, and level teardown.
pub trait FrameCache {
    /// Drop entries for `level` at or after `frame`
    fn invalidate_from(&self, level: u64, frame: u64);
    /// Rekey entries from a committed child level to its parent
    fn move_level(&self, from: u64, to: u64);
    /// Drop all entries for a discarded level
    fn drop_level(&self, level: u64);
}

struct TrackerInner<T> {
    cache: RefCell<HashMap<(u64, u64), T>>,
}

impl<T> FrameCache for TrackerInner<T> {
    fn invalidate_from(&self, level: u64, frame: u64) {
        self.cache
            .borrow_mut()
            .retain(|(l, f), _| *l != level || *f < frame);
    }

    fn move_level(&self, from: u64, to: u64) {
        let mut cache = self.cache.borrow_mut();
        let frames: Vec<u64> = cache
            .keys()
            .filter(|(l, _)| *l == from)
            .map(|(_, f)| *f)
            .collect();
        for frame in frames {
            if let Some(value) = cache.remove(&(from, frame)) {
                cache.entry((to, frame)).or_insert(value);
            }
        }
    }

    fn drop_level(&self, level: u64) {
        self.cache.borrow_mut().retain(|(l, _), _| *l != level);
    }
}

/// Lazily memoized per-frame derived state
///
/// Computes `tracker(frame)` on first request through a caller closure,
/// keyed by (owning level, frame). The closure receives the previous frame's
/// value so streaming state machines (phase trackers, running extrema) build
/// forward incrementally instead of recomputing from scratch. Attach the
/// tracker to an engine so input edits invalidate the right entries.
pub struct Tracker<T> {
    inner: Rc<TrackerInner<T>>,
}

impl<T: Clone + 'static> Tracker<T> {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(TrackerInner {
                cache: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Register with an engine for invalidation callbacks
    pub fn attach<S: Simulation>(&self, engine: &mut ReplayEngine<S>) {
        let weak: std::rc::Weak<TrackerInner<T>> = Rc::downgrade(&self.inner);
        engine.attach_cache(weak);
    }

    /// Number of memoized entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.cache.borrow().len()
    }

    /// Whether nothing is memoized
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.cache.borrow().is_empty()
    }

    /// Derived state at `frame`, computing any missing prefix first
    ///
    /// `derive(engine, frame, prev)` may use the full replay engine; `prev`
    /// is the derived state at `frame - 1` (None at the engine's start
    /// frame). Lookups check levels innermost-out; an outer level's entries
    /// are reused only up to the earliest frame any inner level has edited,
    /// past that they describe a history this level no longer sees.
    ///
    /// # Errors
    ///
    /// Propagates errors from `derive`.
    pub fn get<S, F>(
        &self,
        engine: &mut ReplayEngine<S>,
        frame: u64,
        mut derive: F,
    ) -> CoreResult<T>
    where
        S: Simulation,
        F: FnMut(&mut ReplayEngine<S>, u64, Option<&T>) -> CoreResult<T>,
    {
        if let Some(value) = self.lookup(engine, frame) {
            return Ok(value);
        }

        // Walk back to the nearest memoized predecessor, then fill forward.
        let start_frame = engine.start_frame();
        let mut from = frame;
        let mut prev: Option<T> = None;
        while from > start_frame {
            if let Some(value) = self.lookup(engine, from - 1) {
                prev = Some(value);
                break;
            }
            from -= 1;
        }

        let innermost = engine.innermost_level_id();
        let mut current: Option<T> = None;
        for f in from..=frame {
            let value = derive(engine, f, prev.as_ref())?;
            self.inner
                .cache
                .borrow_mut()
                .insert((innermost, f), value.clone());
            prev = Some(value.clone());
            current = Some(value);
        }
        current.ok_or(CoreError::Internal {
            message: "tracker computed no value".to_string(),
        })
    }

    fn lookup<S: Simulation>(&self, engine: &ReplayEngine<S>, frame: u64) -> Option<T> {
        let cache = self.inner.cache.borrow();
        for (level, bound) in engine.level_bounds() {
            if frame > bound {
                continue;
            }
            if let Some(value) = cache.get(&(level, frame)) {
                return Some(value.clone());
            }
        }
        None
    }
}

impl<T: Clone + 'static> Default for Tracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::script::Adhoc;
    use ricochet_core::{Input, InputDiff, MemorySim};

    fn engine() -> ReplayEngine<MemorySim> {
        ReplayEngine::new(MemorySim::new(), InputDiff::new(), EngineConfig::default()).unwrap()
    }

    /// Running maximum of pos_x, derived incrementally
    fn max_x(
        engine: &mut ReplayEngine<MemorySim>,
        frame: u64,
        prev: Option<&i64>,
    ) -> CoreResult<i64> {
        engine.load(frame)?;
        let bytes = engine.read("pos_x")?;
        let x = i64::from_le_bytes(bytes.as_slice().try_into().unwrap_or_default());
        Ok(prev.map_or(x, |p| x.max(*p)))
    }

    #[test]
    fn test_lazy_memoization() {
        let mut engine = engine();
        let tracker = Tracker::new();
        tracker.attach(&mut engine);

        engine.set_inputs(0, Input::new(0, 10, 0));
        engine.set_inputs(1, Input::new(0, -30, 0));

        let v = tracker.get(&mut engine, 3, max_x).unwrap();
        assert_eq!(v, 10); // peak at frame 1 state
        assert_eq!(tracker.len(), 4); // frames 0..=3 filled

        // Second request hits the cache without recomputing
        let again = tracker.get(&mut engine, 3, |_, _, _| {
            panic!("should not recompute")
        });
        assert_eq!(again.unwrap(), 10);
    }

    #[test]
    fn test_input_edit_invalidates_suffix() {
        let mut engine = engine();
        let tracker = Tracker::new();
        tracker.attach(&mut engine);

        engine.set_inputs(0, Input::new(0, 10, 0));
        let _ = tracker.get(&mut engine, 4, max_x).unwrap();
        assert_eq!(tracker.len(), 5);

        engine.set_inputs(2, Input::new(0, 50, 0));
        // Entries at or after frame 2 are gone
        assert_eq!(tracker.len(), 2);

        let v = tracker.get(&mut engine, 4, max_x).unwrap();
        assert_eq!(v, 60); // 10 then +50 at frame 3 state
    }

    #[test]
    fn test_streaming_uses_previous_value() {
        let mut engine = engine();
        let tracker = Tracker::new();
        tracker.attach(&mut engine);

        // Count frames seen, proving prev threads through
        let count = tracker
            .get(&mut engine, 5, |_, _, prev: Option<&u64>| {
                Ok(prev.copied().unwrap_or(0) + 1)
            })
            .unwrap();
        assert_eq!(count, 6);
    }

    #[test]
    fn test_child_edit_hides_outer_entries() {
        let mut engine = engine();
        let tracker = Tracker::new();
        tracker.attach(&mut engine);

        // The outer level memoizes under neutral inputs
        let v = tracker.get(&mut engine, 3, max_x).unwrap();
        assert_eq!(v, 0);

        engine
            .execute(&mut Adhoc(|e: &mut ReplayEngine<MemorySim>| {
                e.set_inputs(0, Input::new(0, 50, 0));
                // The edit at frame 0 makes the outer entries invisible from
                // here on; the value must be recomputed, not reused
                let v = tracker.get(e, 3, max_x)?;
                assert_eq!(v, 50);
                Ok(true)
            }))
            .unwrap();

        // Back outside, the outer entries are visible again
        let v = tracker.get(&mut engine, 3, |_, _, _| {
            panic!("outer entries should still be memoized")
        });
        assert_eq!(v.unwrap(), 0);
    }

    #[test]
    fn test_detached_tracker_stops_receiving() {
        let mut engine = engine();
        {
            let tracker: Tracker<u64> = Tracker::new();
            tracker.attach(&mut engine);
        }
        // Dropped tracker; edits must not panic
        engine.set_inputs(0, Input::new(0, 1, 0));
    }
}
