//! Lineage storage.
//!
//! Accepted pellets form chains of segments. A segment records the stream
//! state its choices were drawn from, so any block can be reconstituted by
//! walking its tail segment back to the root and replaying each segment's
//! committed steps in order.

use tracing::debug;

/// One committed stretch of a lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Preceding segment, `None` for the root.
    pub parent: Option<usize>,
    /// Stream state at the start of this segment's first step.
    pub seed: u64,
    /// Committed choices recorded under this segment.
    pub steps: u32,
    /// Root distance, 0 for the root itself.
    pub depth: u32,
}

/// Replay recipe for one segment, in root-first chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentStep {
    /// Stream state to resume from.
    pub seed: u64,
    /// Committed choices to replay.
    pub steps: u32,
}

/// Slot arena holding every live segment in the run.
#[derive(Debug, Default)]
pub struct SegmentArena {
    slots: Vec<Option<Segment>>,
    free: Vec<usize>,
}

impl SegmentArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a segment, reusing a freed slot when one exists.
    pub fn alloc(&mut self, parent: Option<usize>, seed: u64, steps: u32) -> usize {
        let depth = parent
            .and_then(|p| self.get(p))
            .map_or(0, |parent| parent.depth + 1);
        let segment = Segment { parent, seed, steps, depth };
        if let Some(slot) = self.free.pop() {
            self.slots[slot] = Some(segment);
            slot
        } else {
            self.slots.push(Some(segment));
            self.slots.len() - 1
        }
    }

    /// Segment at `index`, `None` for freed or out-of-range slots.
    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Live segment count.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Whether no segments are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Root-first replay chain ending at `tail`.
    ///
    /// The root segment itself carries no steps and is skipped.
    pub fn chain(&self, tail: usize) -> Vec<SegmentStep> {
        let mut steps = Vec::new();
        let mut cursor = Some(tail);
        while let Some(index) = cursor
            && let Some(segment) = self.get(index)
        {
            if segment.steps > 0 {
                steps.push(SegmentStep { seed: segment.seed, steps: segment.steps });
            }
            cursor = segment.parent;
        }
        steps.reverse();
        steps
    }

    /// Frees every segment unreachable from `live_tails`.
    ///
    /// Reference counts are recomputed from scratch (one per child plus one
    /// per referencing tail), zero-count segments are freed, and freeing
    /// cascades to parents until a fixed point is reached. Returns the number
    /// of segments freed.
    pub fn collect(&mut self, live_tails: &[usize]) -> usize {
        let mut refs = vec![0u32; self.slots.len()];
        for slot in &self.slots {
            if let Some(segment) = slot
                && let Some(parent) = segment.parent
            {
                refs[parent] += 1;
            }
        }
        for tail in live_tails {
            if *tail < refs.len() {
                refs[*tail] += 1;
            }
        }

        let mut pending: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(index, slot)| slot.is_some() && refs[*index] == 0)
            .map(|(index, _)| index)
            .collect();

        let mut freed = 0;
        while let Some(index) = pending.pop() {
            let Some(segment) = self.slots[index].take() else {
                continue;
            };
            self.free.push(index);
            freed += 1;
            if let Some(parent) = segment.parent {
                refs[parent] -= 1;
                if refs[parent] == 0 && self.slots[parent].is_some() {
                    pending.push(parent);
                }
            }
        }
        if freed > 0 {
            debug!(freed, live = self.len(), "segment collection");
        }
        freed
    }
}

/// Parent link inside a worker's unmerged lineage buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRef {
    /// Segment already in the shared arena.
    Shared(usize),
    /// Segment still in this worker's local buffer.
    Local(usize),
}

/// Tail reference carried by a block before and after merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailRef {
    /// Tail already in the shared arena.
    Shared(usize),
    /// Tail still in a worker's local buffer.
    Local(usize),
}

/// Segment pending merge into the shared arena.
#[derive(Debug, Clone, Copy)]
pub struct LocalSegment {
    /// Preceding segment, shared or local.
    pub parent: ParentRef,
    /// Stream state at the start of this segment's first step.
    pub seed: u64,
    /// Committed choices recorded under this segment.
    pub steps: u32,
}

/// Per-worker lineage buffer, drained at every merge.
///
/// Local parents always precede their children, so a merge can remap the
/// buffer into the shared arena in a single forward pass.
#[derive(Debug, Default)]
pub struct LocalArena {
    segments: Vec<LocalSegment>,
}

impl LocalArena {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a segment, returning its local index.
    pub fn alloc(&mut self, parent: ParentRef, seed: u64, steps: u32) -> usize {
        self.segments.push(LocalSegment { parent, seed, steps });
        self.segments.len() - 1
    }

    /// Buffered segment count.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the buffer holds no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Empties the buffer in allocation order.
    pub fn drain(&mut self) -> std::vec::Drain<'_, LocalSegment> {
        self.segments.drain(..)
    }
}
