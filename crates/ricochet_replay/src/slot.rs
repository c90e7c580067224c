//! Budgeted snapshot storage with a cost model for lazy snapshotting.

use ricochet_core::{CoreError, CoreResult};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

/// Owning handle to a stored snapshot
///
/// Deliberately move-only: a snapshot belongs to exactly one layer's table at
/// a time, and commits transfer the handle rather than copying the blob.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    id: u64,
}

struct SlotEntry {
    blob: Vec<u8>,
}

/// Exponential-moving-average costs of the three state operations
///
/// Drives the save/load predicates: snapshotting is only worth its cost when
/// it displaces enough predicted frame replays.
#[derive(Debug, Clone)]
pub struct CostModel {
    avg_advance_ns: f64,
    avg_save_ns: f64,
    avg_load_ns: f64,
    seeded_advance: bool,
    seeded_save: bool,
    seeded_load: bool,
}

const EMA_ALPHA: f64 = 0.2;

impl CostModel {
    fn new() -> Self {
        // Unseeded defaults assume a save/load is worth about a hundred
        // frame advances, refined as real durations come in.
        Self {
            avg_advance_ns: 1_000.0,
            avg_save_ns: 100_000.0,
            avg_load_ns: 100_000.0,
            seeded_advance: false,
            seeded_save: false,
            seeded_load: false,
        }
    }

    fn update(avg: &mut f64, seeded: &mut bool, sample: Duration) {
        let ns = sample.as_nanos() as f64;
        if *seeded {
            *avg = *avg * (1.0 - EMA_ALPHA) + ns * EMA_ALPHA;
        } else {
            *avg = ns;
            *seeded = true;
        }
    }

    /// Record one frame-advance duration
    pub fn record_advance(&mut self, sample: Duration) {
        Self::update(&mut self.avg_advance_ns, &mut self.seeded_advance, sample);
    }

    /// Record one state-save duration
    pub fn record_save(&mut self, sample: Duration) {
        Self::update(&mut self.avg_save_ns, &mut self.seeded_save, sample);
    }

    /// Record one state-load duration
    pub fn record_load(&mut self, sample: Duration) {
        Self::update(&mut self.avg_load_ns, &mut self.seeded_load, sample);
    }

    /// Whether saving now beats replaying the gap later
    ///
    /// True when re-advancing `frames_since_save` frames is predicted to cost
    /// more than one save plus one load.
    #[must_use]
    pub fn should_save(&self, frames_since_save: u64) -> bool {
        frames_since_save as f64 * self.avg_advance_ns > self.avg_save_ns + self.avg_load_ns
    }

    /// Whether jumping to a snapshot beats advancing the skipped frames
    #[must_use]
    pub fn should_load(&self, frames_skipped: u64) -> bool {
        frames_skipped as f64 * self.avg_advance_ns > self.avg_load_ns
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque, byte-budgeted storage for serialized simulation states
///
/// Evicts least-recently-used snapshots once the budget is exceeded; evicted
/// handles simply stop validating, they are never reused.
pub struct SlotStore {
    slots: HashMap<u64, SlotEntry>,
    order: VecDeque<u64>,
    next_id: u64,
    budget_bytes: usize,
    used_bytes: usize,
    costs: CostModel,
}

impl SlotStore {
    /// Create a store with a byte budget
    #[must_use]
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            slots: HashMap::new(),
            order: VecDeque::new(),
            next_id: 0,
            budget_bytes,
            used_bytes: 0,
            costs: CostModel::new(),
        }
    }

    /// Store a snapshot blob, evicting oldest entries to stay in budget
    pub fn save(&mut self, blob: Vec<u8>) -> SlotHandle {
        while self.used_bytes + blob.len() > self.budget_bytes && self.evict_oldest() {}
        let id = self.next_id;
        self.next_id += 1;
        self.used_bytes += blob.len();
        self.slots.insert(id, SlotEntry { blob });
        self.order.push_back(id);
        SlotHandle { id }
    }

    /// Fetch a snapshot blob, refreshing its recency
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SnapshotInvalid`] if the slot was evicted.
    pub fn load(&mut self, handle: &SlotHandle) -> CoreResult<&[u8]> {
        if !self.slots.contains_key(&handle.id) {
            return Err(CoreError::SnapshotInvalid {
                reason: format!("slot {} was evicted", handle.id),
            });
        }
        self.touch(handle.id);
        // Checked above
        self.slots
            .get(&handle.id)
            .map(|entry| entry.blob.as_slice())
            .ok_or(CoreError::Internal {
                message: "slot vanished during load".to_string(),
            })
    }

    /// Whether the handle still refers to a stored snapshot
    #[must_use]
    pub fn is_valid(&self, handle: &SlotHandle) -> bool {
        self.slots.contains_key(&handle.id)
    }

    /// Release a snapshot, reclaiming its bytes
    pub fn free(&mut self, handle: SlotHandle) {
        if let Some(entry) = self.slots.remove(&handle.id) {
            self.used_bytes -= entry.blob.len();
            self.order.retain(|id| *id != handle.id);
        }
    }

    /// Evict the least-recently-used snapshot, if any
    pub fn evict_oldest(&mut self) -> bool {
        let Some(id) = self.order.pop_front() else {
            return false;
        };
        if let Some(entry) = self.slots.remove(&id) {
            self.used_bytes -= entry.blob.len();
            debug!(slot = id, freed = entry.blob.len(), "evicted snapshot");
        }
        true
    }

    /// Number of live snapshots
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the store holds no snapshots
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bytes currently stored
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// The cost model
    #[must_use]
    pub fn costs(&self) -> &CostModel {
        &self.costs
    }

    /// Mutable cost model, for recording operation durations
    pub fn costs_mut(&mut self) -> &mut CostModel {
        &mut self.costs
    }

    fn touch(&mut self, id: u64) {
        self.order.retain(|entry| *entry != id);
        self.order.push_back(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_round_trip() {
        let mut store = SlotStore::new(1024);
        let handle = store.save(vec![1, 2, 3]);
        assert!(store.is_valid(&handle));
        assert_eq!(store.load(&handle).unwrap(), &[1, 2, 3]);
        assert_eq!(store.used_bytes(), 3);
    }

    #[test]
    fn test_budget_evicts_lru() {
        let mut store = SlotStore::new(10);
        let a = store.save(vec![0; 4]);
        let b = store.save(vec![0; 4]);
        // Touch a so b becomes the eviction candidate
        store.load(&a).unwrap();
        let c = store.save(vec![0; 4]);
        assert!(store.is_valid(&a));
        assert!(!store.is_valid(&b));
        assert!(store.is_valid(&c));
        assert!(store.used_bytes() <= 10);
    }

    #[test]
    fn test_load_evicted_slot_fails() {
        let mut store = SlotStore::new(4);
        let a = store.save(vec![0; 4]);
        let _b = store.save(vec![0; 4]);
        let err = store.load(&a).unwrap_err();
        assert!(matches!(err, CoreError::SnapshotInvalid { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_free_reclaims_bytes() {
        let mut store = SlotStore::new(100);
        let a = store.save(vec![0; 40]);
        store.free(a);
        assert_eq!(store.used_bytes(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_oversized_blob_still_stored() {
        // The budget is advisory for a single blob larger than the whole
        // budget; everything else gets evicted first.
        let mut store = SlotStore::new(8);
        let _small = store.save(vec![0; 4]);
        let big = store.save(vec![0; 64]);
        assert!(store.is_valid(&big));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_cost_predicates() {
        let mut costs = CostModel::new();
        costs.record_advance(Duration::from_micros(1));
        costs.record_save(Duration::from_micros(100));
        costs.record_load(Duration::from_micros(100));
        assert!(!costs.should_save(10));
        assert!(costs.should_save(500));
        assert!(!costs.should_load(50));
        assert!(costs.should_load(5000));
    }

    #[test]
    fn test_ema_tracks_samples() {
        let mut costs = CostModel::new();
        costs.record_advance(Duration::from_nanos(1000));
        for _ in 0..100 {
            costs.record_advance(Duration::from_nanos(2000));
        }
        // Converged near the newer sample
        assert!(costs.avg_advance_ns > 1900.0);
    }
}
