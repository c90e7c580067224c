//! Transactional replay engine over a deterministic simulation.
//!
//! Calling code speculatively mutates input history inside nested levels and
//! either commits the mutation into its caller or discards it with full state
//! rollback. Snapshots are taken lazily, guided by the slot store's cost
//! model, and a desync flag forces hard restores whenever the simulation's
//! state may no longer match the recorded cursor.

use crate::script::Script;
use crate::slot::{CostModel, SlotHandle, SlotStore};
use crate::status::{RunReport, RunStatus, Stage};
use crate::tracker::FrameCache;
use ricochet_core::{CoreError, CoreResult, Input, InputDiff, Simulation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::rc::Weak;
use std::time::Instant;
use tracing::debug;

/// Replay engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Byte budget for the snapshot store
    pub slot_budget_bytes: usize,
}

impl EngineConfig {
    /// Set the snapshot byte budget
    #[must_use]
    pub fn with_slot_budget(mut self, bytes: usize) -> Self {
        self.slot_budget_bytes = bytes;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slot_budget_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Where a frame's effective input came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputSource {
    /// A speculation level's own diff
    Diff,
    /// The recorded movie baseline
    Movie,
    /// The neutral default past the end of all layers
    Default,
}

/// Resolved input for a frame, with provenance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputsMeta {
    /// The effective input
    pub input: Input,
    /// Frame it applies to
    pub frame: u64,
    /// Identity of the level that owns the resolution
    pub owner: u64,
    /// Kind of layer it resolved from
    pub source: InputSource,
}

/// One nested speculation level
struct Level {
    id: u64,
    entry_frame: u64,
    diff: InputDiff,
    saves: BTreeMap<u64, SlotHandle>,
    inputs_cache: HashMap<u64, InputsMeta>,
    /// Frames replayed since this level last snapshotted
    replayed_since_save: u64,
    status: RunStatus,
}

impl Level {
    fn new(id: u64, entry_frame: u64) -> Self {
        Self {
            id,
            entry_frame,
            diff: InputDiff::new(),
            saves: BTreeMap::new(),
            inputs_cache: HashMap::new(),
            replayed_since_save: 0,
            status: RunStatus::new(),
        }
    }
}

/// Transactional replay engine
///
/// Generic over any [`Simulation`] capability. One engine owns one private
/// simulation instance; nothing here is shared across threads.
pub struct ReplayEngine<S: Simulation> {
    sim: S,
    movie: InputDiff,
    store: SlotStore,
    levels: Vec<Level>,
    /// Initial snapshot, held outside the budget so it always validates
    start_blob: Vec<u8>,
    start_frame: u64,
    next_level_id: u64,
    desynced: bool,
    caches: Vec<Weak<dyn FrameCache>>,
}

impl<S: Simulation> ReplayEngine<S> {
    /// Create an engine over a simulation and a recorded movie baseline
    ///
    /// Takes the initial snapshot immediately; the frame at construction is
    /// the engine's floor.
    ///
    /// # Errors
    ///
    /// Returns error if the initial state cannot be captured.
    pub fn new(mut sim: S, movie: InputDiff, config: EngineConfig) -> CoreResult<Self> {
        let start_blob = sim.save_state()?;
        let start_frame = sim.current_frame();
        Ok(Self {
            sim,
            movie,
            store: SlotStore::new(config.slot_budget_bytes),
            levels: vec![Level::new(0, start_frame)],
            start_blob,
            start_frame,
            next_level_id: 1,
            desynced: false,
            caches: Vec::new(),
        })
    }

    /// Current simulation frame
    #[must_use]
    pub fn current_frame(&self) -> u64 {
        self.sim.current_frame()
    }

    /// The frame the engine was constructed at
    #[must_use]
    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    /// Whether state may not match the recorded cursor
    #[must_use]
    pub fn is_desynced(&self) -> bool {
        self.desynced
    }

    /// The recorded movie baseline
    #[must_use]
    pub fn movie(&self) -> &InputDiff {
        &self.movie
    }

    /// Operation counters and stage flags of the innermost level
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.levels.last().map(|l| l.status.clone()).unwrap_or_default()
    }

    /// The innermost level's diff
    #[must_use]
    pub fn diff(&self) -> &InputDiff {
        // A root level always exists
        self.levels.last().map(|l| &l.diff).unwrap_or(&self.movie)
    }

    /// Read a named simulation field
    ///
    /// # Errors
    ///
    /// Propagates simulation faults (fatal).
    pub fn read(&self, field: &str) -> CoreResult<Vec<u8>> {
        self.sim.read(field)
    }

    /// Write a named simulation field
    ///
    /// # Errors
    ///
    /// Propagates simulation faults (fatal).
    pub fn write(&mut self, field: &str, bytes: &[u8]) -> CoreResult<()> {
        self.sim.write(field, bytes)
    }

    /// Borrow the underlying simulation
    #[must_use]
    pub fn sim(&self) -> &S {
        &self.sim
    }

    /// Operation cost estimates driving the snapshot strategy
    #[must_use]
    pub fn costs(&self) -> &CostModel {
        self.store.costs()
    }

    /// Mutable cost estimates, letting callers seed measured durations
    pub fn costs_mut(&mut self) -> &mut CostModel {
        self.store.costs_mut()
    }

    /// Register a derived-state cache for invalidation callbacks
    pub fn attach_cache(&mut self, cache: Weak<dyn FrameCache>) {
        self.caches.push(cache);
    }

    /// Level identities, innermost first
    #[must_use]
    pub fn level_ids(&self) -> Vec<u64> {
        self.levels.iter().rev().map(|l| l.id).collect()
    }

    /// Identity of the innermost level
    #[must_use]
    pub fn innermost_level_id(&self) -> u64 {
        self.levels.last().map_or(0, |l| l.id)
    }

    /// Level identities paired with their visibility bound, innermost first
    ///
    /// An outer level's memoized data is only trustworthy up to the earliest
    /// frame any level inside it has overridden; frame-keyed caches apply
    /// these bounds when reading entries across levels.
    #[must_use]
    pub fn level_bounds(&self) -> Vec<(u64, u64)> {
        let mut bound = u64::MAX;
        let mut out = Vec::with_capacity(self.levels.len());
        for level in self.levels.iter().rev() {
            out.push((level.id, bound));
            if let Some(first) = level.diff.first_frame() {
                bound = bound.min(first);
            }
        }
        out
    }

    /// Override the input at `frame` in the innermost level
    ///
    /// Invalidates this level's snapshots and caches that depended on the
    /// frame.
    pub fn set_inputs(&mut self, frame: u64, input: Input) {
        let Some(level) = self.levels.last_mut() else {
            return;
        };
        let id = level.id;
        level.diff.set(frame, input);
        level.inputs_cache.remove(&frame);
        // Snapshots strictly after `frame` captured states downstream of it
        let stale: Vec<u64> = level
            .saves
            .range((Bound::Excluded(frame), Bound::Unbounded))
            .map(|(f, _)| *f)
            .collect();
        for f in stale {
            if let Some(handle) = self.levels.last_mut().and_then(|l| l.saves.remove(&f)) {
                self.store.free(handle);
            }
        }
        self.notify_caches(|c| c.invalidate_from(id, frame));
    }

    /// Resolve the effective input for `frame`
    ///
    /// # Errors
    ///
    /// Propagates simulation faults.
    pub fn get_inputs(&mut self, frame: u64) -> CoreResult<Input> {
        Ok(self.inputs_meta(frame)?.input)
    }

    /// Resolve the effective input and its provenance for `frame`
    ///
    /// Scans levels innermost to outermost (diff override first, then the
    /// memoized cache), falling through to the recorded movie and finally
    /// the neutral default. The result is memoized in the innermost level
    /// because this sits on the frame-advance hot path.
    ///
    /// # Errors
    ///
    /// Propagates simulation faults.
    pub fn inputs_meta(&mut self, frame: u64) -> CoreResult<InputsMeta> {
        let mut resolved = None;
        for level in self.levels.iter().rev() {
            if let Some(input) = level.diff.get(frame) {
                resolved = Some(InputsMeta {
                    input,
                    frame,
                    owner: level.id,
                    source: InputSource::Diff,
                });
                break;
            }
            if let Some(meta) = level.inputs_cache.get(&frame) {
                resolved = Some(*meta);
                break;
            }
        }
        let root = self.levels.first().map_or(0, |l| l.id);
        let meta = resolved.unwrap_or_else(|| match self.movie.get(frame) {
            Some(input) => InputsMeta {
                input,
                frame,
                owner: root,
                source: InputSource::Movie,
            },
            None => InputsMeta {
                input: Input::neutral(),
                frame,
                owner: root,
                source: InputSource::Default,
            },
        });
        if let Some(level) = self.levels.last_mut() {
            level.inputs_cache.insert(frame, meta);
        }
        Ok(meta)
    }

    /// Snapshot the current state into the innermost level
    ///
    /// # Errors
    ///
    /// Propagates simulation faults.
    pub fn save(&mut self) -> CoreResult<()> {
        let idx = self.levels.len().saturating_sub(1);
        self.snapshot_into(idx)?;
        if let Some(level) = self.levels.last_mut() {
            level.replayed_since_save = 0;
        }
        Ok(())
    }

    /// Position the simulation at `frame`
    ///
    /// Finds the latest valid snapshot at or before `frame`, searching own
    /// levels innermost-out without crossing earlier than the first frame
    /// any level's diff has touched (using such a snapshot would resume
    /// state computed under inputs that have since changed), falling back to
    /// the initial snapshot. Replays forward frame by frame from there,
    /// snapshotting opportunistically when the cost model says it pays.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FrameOutOfRange`] for frames before the start
    /// frame; propagates simulation faults.
    pub fn load(&mut self, frame: u64) -> CoreResult<()> {
        if frame < self.start_frame {
            return Err(CoreError::FrameOutOfRange {
                frame,
                cursor: self.start_frame,
            });
        }
        let cursor = self.sim.current_frame();
        if !self.desynced && cursor == frame {
            return Ok(());
        }

        let best = self.latest_save_at_or_before(frame);
        let hard_needed = self.desynced || cursor > frame;
        if self.desynced {
            debug!(frame, cursor, "desynced; forcing hard snapshot restore");
        }

        if hard_needed {
            match best {
                Some((slot_frame, level_idx)) => self.restore_slot(level_idx, slot_frame)?,
                None => self.restore_start()?,
            }
        } else if let Some((slot_frame, level_idx)) = best
            && slot_frame > cursor
            && self.store.costs().should_load(slot_frame - cursor)
        {
            self.restore_slot(level_idx, slot_frame)?;
        }
        self.desynced = false;

        while self.sim.current_frame() < frame {
            let meta = self.inputs_meta(self.sim.current_frame())?;
            self.advance_timed(meta.input)?;
            self.note_replayed()?;
        }
        Ok(())
    }

    /// Trim the innermost diff at and after `frame`, then position there
    ///
    /// # Errors
    ///
    /// Same conditions as [`load`](Self::load).
    pub fn rollback(&mut self, frame: u64) -> CoreResult<()> {
        self.trim_innermost(frame);
        self.load(frame)
    }

    /// Discard the innermost level's diff and snapshots, then position at
    /// `frame` from what remains underneath
    ///
    /// # Errors
    ///
    /// Same conditions as [`load`](Self::load).
    pub fn restore(&mut self, frame: u64) -> CoreResult<()> {
        self.clear_innermost();
        self.load(frame)
    }

    /// Discard pending overrides at or after the cursor, then advance to
    /// `frame` under the remaining input layers
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FrameOutOfRange`] if the cursor is already ahead.
    pub fn roll_forward(&mut self, frame: u64) -> CoreResult<()> {
        let cursor = self.sim.current_frame();
        if cursor > frame {
            return Err(CoreError::FrameOutOfRange { frame, cursor });
        }
        self.trim_innermost(cursor);
        self.load(frame)
    }

    /// Run `script` in a new speculation level, always restoring entry state
    ///
    /// # Errors
    ///
    /// Propagates fatal simulation faults; stage faults are recorded in the
    /// returned report instead.
    pub fn execute<T: Script<S>>(&mut self, script: &mut T) -> CoreResult<RunReport> {
        self.push_level();
        let fatal = self.run_stages(script);
        let report = self.revert();
        fatal?;
        report
    }

    /// Run `script` in a new level; commit its diff into the caller on success
    ///
    /// On success the child diff is spliced into this level at the touched
    /// range, stale caches and snapshots are invalidated, child snapshots
    /// move up, and the cursor lands just past the applied range. On failure
    /// this behaves exactly like [`execute`](Self::execute).
    ///
    /// # Errors
    ///
    /// Propagates fatal simulation faults.
    pub fn modify<T: Script<S>>(&mut self, script: &mut T) -> CoreResult<RunReport> {
        self.push_level();
        let fatal = self.run_stages(script);
        let succeeded =
            fatal.is_ok() && self.levels.last().is_some_and(|l| l.status.succeeded());
        let report = if succeeded {
            self.apply_child()
        } else {
            self.revert()
        };
        fatal?;
        report
    }

    /// Run `script` like [`execute`](Self::execute) but clear the report diff
    ///
    /// The dry-run result carries stage outcomes only, usable for
    /// inspection by comparator and terminator predicates.
    ///
    /// # Errors
    ///
    /// Propagates fatal simulation faults.
    pub fn test<T: Script<S>>(&mut self, script: &mut T) -> CoreResult<RunReport> {
        let mut report = self.execute(script)?;
        report.diff.clear();
        Ok(report)
    }

    /// Materialize the resolved inputs over `[from, to)` as a diff
    ///
    /// Neutral-default frames are left sparse.
    ///
    /// # Errors
    ///
    /// Propagates simulation faults.
    pub fn resolved_diff(&mut self, from: u64, to: u64) -> CoreResult<InputDiff> {
        let mut out = InputDiff::new();
        for frame in from..to {
            let meta = self.inputs_meta(frame)?;
            if !meta.input.is_neutral() {
                out.set(frame, meta.input);
            }
        }
        Ok(out)
    }

    // --- internals ---

    fn push_level(&mut self) {
        let id = self.next_level_id;
        self.next_level_id += 1;
        self.levels.push(Level::new(id, self.sim.current_frame()));
    }

    fn run_stages<T: Script<S>>(&mut self, script: &mut T) -> CoreResult<()> {
        let t = Instant::now();
        let result = script.validate(self);
        if !self.record_stage(Stage::Validating, result, t.elapsed())? {
            return Ok(());
        }
        let t = Instant::now();
        let result = script.execute(self);
        if !self.record_stage(Stage::Executing, result, t.elapsed())? {
            return Ok(());
        }
        let t = Instant::now();
        let result = script.assert(self);
        self.record_stage(Stage::Asserting, result, t.elapsed())?;
        Ok(())
    }

    fn record_stage(
        &mut self,
        stage: Stage,
        result: CoreResult<bool>,
        duration: std::time::Duration,
    ) -> CoreResult<bool> {
        let level = self.levels.last_mut().ok_or(CoreError::Internal {
            message: "no speculation level".to_string(),
        })?;
        let status = &mut level.status;
        let (passed_flag, fault_flag, duration_slot) = match stage {
            Stage::Validating => (
                &mut status.validated,
                &mut status.validation_faulted,
                &mut status.validation_duration,
            ),
            Stage::Executing => (
                &mut status.executed,
                &mut status.execution_faulted,
                &mut status.execution_duration,
            ),
            Stage::Asserting | Stage::Uninitialized | Stage::Complete => (
                &mut status.asserted,
                &mut status.assertion_faulted,
                &mut status.assertion_duration,
            ),
        };
        *duration_slot = duration;
        match result {
            Ok(passed) => {
                *passed_flag = passed;
                Ok(passed)
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                *fault_flag = true;
                *passed_flag = false;
                debug!(?stage, error = %err, "stage fault caught");
                Ok(false)
            }
        }
    }

    /// Discard the innermost level, restoring the caller's entry state
    fn revert(&mut self) -> CoreResult<RunReport> {
        let child = self.levels.pop().ok_or(CoreError::Internal {
            message: "level underflow on revert".to_string(),
        })?;
        let entry = child.entry_frame;
        let touched = child.status.frame_advances > 0
            || child.status.loads > 0
            || self.sim.current_frame() != entry;
        self.absorb_child(&child);

        // Snapshots taken before the child's first input override were
        // computed under inputs the caller still sees; they move up.
        let sync_bound = child.diff.first_frame().unwrap_or(u64::MAX);
        self.adopt_saves(child.saves, Some(sync_bound));
        self.notify_caches(|c| c.drop_level(child.id));

        if touched {
            self.desynced = true;
        }
        self.load(entry)?;
        Ok(RunReport {
            status: child.status,
            diff: child.diff,
        })
    }

    /// Commit the innermost level's diff into its caller
    fn apply_child(&mut self) -> CoreResult<RunReport> {
        let child = self.levels.pop().ok_or(CoreError::Internal {
            message: "level underflow on commit".to_string(),
        })?;
        let (Some(first), Some(last)) = (child.diff.first_frame(), child.diff.last_frame())
        else {
            // Nothing touched; an empty commit unwinds like execute
            self.levels.push(child);
            return self.revert();
        };
        self.absorb_child(&child);

        let parent_id = {
            let parent = self.levels.last_mut().ok_or(CoreError::Internal {
                message: "level underflow on commit".to_string(),
            })?;
            // Caller state at or after the first touched frame is stale
            let stale: Vec<u64> = parent
                .saves
                .range((Bound::Excluded(first), Bound::Unbounded))
                .map(|(f, _)| *f)
                .collect();
            for f in &stale {
                parent.saves.remove(f);
            }
            parent.inputs_cache.retain(|f, _| *f < first);
            parent.diff.splice(child.diff.clone());
            parent.replayed_since_save = 0;
            parent.id
        };
        self.notify_caches(|c| c.invalidate_from(parent_id, first));

        // All child snapshots were computed under the now-merged view
        self.adopt_saves(child.saves, None);
        self.notify_caches(|c| c.move_level(child.id, parent_id));

        // Cursor lands just past the applied range
        self.load(last + 1)?;
        Ok(RunReport {
            status: child.status,
            diff: child.diff,
        })
    }

    fn absorb_child(&mut self, child: &Level) {
        if let Some(parent) = self.levels.last_mut() {
            parent.status.absorb_counters(&child.status);
        }
    }

    /// Move child snapshots into the parent; `bound` keeps only frames at or
    /// below it (discarded-child case), `None` keeps everything
    fn adopt_saves(&mut self, saves: BTreeMap<u64, SlotHandle>, bound: Option<u64>) {
        for (frame, handle) in saves {
            let keep = bound.is_none_or(|b| frame <= b) && self.store.is_valid(&handle);
            if keep {
                if let Some(parent) = self.levels.last_mut()
                    && !parent.saves.contains_key(&frame)
                {
                    parent.saves.insert(frame, handle);
                    continue;
                }
            }
            self.store.free(handle);
        }
    }

    /// Latest valid snapshot at or before `frame`, with its level index
    fn latest_save_at_or_before(&self, frame: u64) -> Option<(u64, usize)> {
        let mut bound = frame;
        let mut best: Option<(u64, usize)> = None;
        for (idx, level) in self.levels.iter().enumerate().rev() {
            for (f, handle) in level.saves.range(..=bound).rev() {
                if self.store.is_valid(handle) {
                    if best.is_none_or(|(bf, _)| *f > bf) {
                        best = Some((*f, idx));
                    }
                    break;
                }
            }
            if let Some(first) = level.diff.first_frame() {
                bound = bound.min(first);
            }
        }
        best
    }

    fn restore_slot(&mut self, level_idx: usize, slot_frame: u64) -> CoreResult<()> {
        let t = Instant::now();
        let blob = {
            let handle =
                self.levels
                    .get(level_idx)
                    .and_then(|l| l.saves.get(&slot_frame))
                    .ok_or(CoreError::Internal {
                        message: "snapshot table entry vanished".to_string(),
                    })?;
            self.store.load(handle)?.to_vec()
        };
        self.sim.load_state(&blob)?;
        self.store.costs_mut().record_load(t.elapsed());
        if let Some(level) = self.levels.last_mut() {
            level.status.loads += 1;
            level.replayed_since_save = 0;
        }
        Ok(())
    }

    fn restore_start(&mut self) -> CoreResult<()> {
        let t = Instant::now();
        self.sim.load_state(&self.start_blob)?;
        self.store.costs_mut().record_load(t.elapsed());
        if let Some(level) = self.levels.last_mut() {
            level.status.loads += 1;
            level.replayed_since_save = 0;
        }
        Ok(())
    }

    fn advance_timed(&mut self, input: Input) -> CoreResult<()> {
        let t = Instant::now();
        self.sim.advance(input)?;
        self.store.costs_mut().record_advance(t.elapsed());
        if let Some(level) = self.levels.last_mut() {
            level.status.frame_advances += 1;
        }
        Ok(())
    }

    /// Track replay work; snapshot into the running level once the cost
    /// model says the gap is worth closing
    ///
    /// Opportunistic snapshots always land in the innermost level's own
    /// table: the captured state reflects that level's overrides, and the
    /// snapshot must not outlive a discarded level.
    fn note_replayed(&mut self) -> CoreResult<()> {
        let count = {
            let Some(level) = self.levels.last_mut() else {
                return Ok(());
            };
            level.replayed_since_save += 1;
            level.replayed_since_save
        };
        if self.store.costs().should_save(count) {
            let idx = self.levels.len().saturating_sub(1);
            self.snapshot_into(idx)?;
            if let Some(level) = self.levels.last_mut() {
                level.replayed_since_save = 0;
            }
        }
        Ok(())
    }

    fn snapshot_into(&mut self, level_idx: usize) -> CoreResult<()> {
        let t = Instant::now();
        let blob = self.sim.save_state()?;
        self.store.costs_mut().record_save(t.elapsed());
        let frame = self.sim.current_frame();
        let handle = self.store.save(blob);
        match self.levels.get_mut(level_idx) {
            Some(level) => {
                let old = level.saves.insert(frame, handle);
                if let Some(old) = old {
                    self.store.free(old);
                }
            }
            None => self.store.free(handle),
        }
        if let Some(level) = self.levels.last_mut() {
            level.status.saves += 1;
        }
        Ok(())
    }

    /// Drop the innermost level's overrides, snapshots, and memoized inputs
    /// at and after `frame`
    fn trim_innermost(&mut self, frame: u64) {
        let Some(level) = self.levels.last_mut() else {
            return;
        };
        let id = level.id;
        level.diff.trim_from(frame);
        level.inputs_cache.retain(|f, _| *f < frame);
        let stale: Vec<u64> = level
            .saves
            .range((Bound::Included(frame), Bound::Unbounded))
            .map(|(f, _)| *f)
            .collect();
        for f in stale {
            if let Some(handle) = self.levels.last_mut().and_then(|l| l.saves.remove(&f)) {
                self.store.free(handle);
            }
        }
        self.notify_caches(|c| c.invalidate_from(id, frame));
    }

    /// Drop everything the innermost level has layered on: all overrides,
    /// all snapshots, all memoized inputs
    fn clear_innermost(&mut self) {
        let Some(level) = self.levels.last_mut() else {
            return;
        };
        let id = level.id;
        let first = level.diff.first_frame();
        level.diff.clear();
        level.inputs_cache.clear();
        level.replayed_since_save = 0;
        let saves = std::mem::take(&mut level.saves);
        for (_, handle) in saves {
            self.store.free(handle);
        }
        if let Some(first) = first {
            self.notify_caches(|c| c.invalidate_from(id, first));
        }
    }

    fn notify_caches<F: Fn(&dyn FrameCache)>(&mut self, f: F) {
        self.caches.retain(|weak| match weak.upgrade() {
            Some(cache) => {
                f(cache.as_ref());
                true
            }
            None => false,
        });
    }
}
