//! Deduplicating block pool.
//!
//! A block pairs a state fingerprint with the best fitness any lineage has
//! reached for that fingerprint. Pools are open-addressed tables keyed by the
//! masked fingerprint hash; collision probing rehashes the hash value itself,
//! and a lookup gives up after a fixed probe bound rather than scanning the
//! whole table.

use ricochet_core::{ByteMask, Fingerprint, rehash};

/// Probes attempted before a lookup or insert reports the pool as full.
pub const MAX_PROBES: usize = 100;

/// One deduplicated search state.
#[derive(Debug, Clone, PartialEq)]
pub struct Block<T> {
    /// Masked byte summary of the deduplicated state.
    pub fingerprint: Fingerprint,
    /// Best fitness any lineage has reached for this state.
    pub fitness: f32,
    /// Tail segment whose replay reconstitutes this state.
    pub tail: T,
}

/// Result of offering a candidate state to a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// Fingerprint not seen before; a new block was created.
    Novel,
    /// Fingerprint known, candidate fitness won; block redirected.
    Improved,
    /// Fingerprint known, incumbent fitness won; candidate dropped.
    Redundant,
    /// Probe bound exhausted; candidate dropped.
    Full,
}

/// Open-addressed fingerprint table.
///
/// The tail type is generic so worker-local pools can reference unmerged
/// local segments while the shared pool references the shared arena directly.
#[derive(Debug)]
pub struct BlockPool<T> {
    blocks: Vec<Block<T>>,
    table: Vec<Option<u32>>,
    mask: ByteMask,
    accept_equal: bool,
}

impl<T: Copy> BlockPool<T> {
    /// Creates a pool sized for roughly `capacity` distinct blocks.
    pub fn new(capacity: usize, mask: ByteMask, accept_equal: bool) -> Self {
        let table_len = capacity.saturating_mul(2).max(16);
        Self {
            blocks: Vec::new(),
            table: vec![None; table_len],
            mask,
            accept_equal,
        }
    }

    /// Distinct blocks held.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the pool holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Byte mask applied to fingerprints on hashing and comparison.
    pub fn mask(&self) -> &ByteMask {
        &self.mask
    }

    /// Block by insertion index.
    pub fn get(&self, index: usize) -> Option<&Block<T>> {
        self.blocks.get(index)
    }

    /// All blocks in insertion order.
    pub fn blocks(&self) -> &[Block<T>] {
        &self.blocks
    }

    /// Insertion index of the block matching `fingerprint`, if present within
    /// the probe bound.
    pub fn find(&self, fingerprint: &Fingerprint) -> Option<usize> {
        let mut hash = fingerprint.masked_hash(&self.mask);
        for _ in 0..MAX_PROBES {
            let slot = (hash % self.table.len() as u64) as usize;
            let index = self.table[slot]? as usize;
            if self.blocks[index].fingerprint.masked_eq(fingerprint, &self.mask) {
                return Some(index);
            }
            hash = rehash(hash);
        }
        None
    }

    /// Offers a candidate state to the pool.
    ///
    /// A tie on fitness counts as an improvement only when the pool was built
    /// with `accept_equal`.
    pub fn upsert(&mut self, fingerprint: Fingerprint, fitness: f32, tail: T) -> Upsert {
        let mut hash = fingerprint.masked_hash(&self.mask);
        for _ in 0..MAX_PROBES {
            let slot = (hash % self.table.len() as u64) as usize;
            match self.table[slot] {
                None => {
                    let index = self.blocks.len() as u32;
                    self.blocks.push(Block { fingerprint, fitness, tail });
                    self.table[slot] = Some(index);
                    return Upsert::Novel;
                }
                Some(index) => {
                    let block = &mut self.blocks[index as usize];
                    if block.fingerprint.masked_eq(&fingerprint, &self.mask) {
                        let wins = fitness > block.fitness
                            || (self.accept_equal && fitness == block.fitness);
                        if wins {
                            block.fitness = fitness;
                            block.tail = tail;
                            return Upsert::Improved;
                        }
                        return Upsert::Redundant;
                    }
                    hash = rehash(hash);
                }
            }
        }
        Upsert::Full
    }

    /// Tails of every block, for lineage collection.
    pub fn tails(&self) -> Vec<T> {
        self.blocks.iter().map(|block| block.tail).collect()
    }

    /// Drains all blocks, leaving an empty table of the same geometry.
    pub fn drain(&mut self) -> Vec<Block<T>> {
        self.table.fill(None);
        std::mem::take(&mut self.blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(bytes: &[u8]) -> Fingerprint {
        Fingerprint::from_bytes(bytes.to_vec())
    }

    fn pool(capacity: usize) -> BlockPool<usize> {
        BlockPool::new(capacity, ByteMask::all(4), false)
    }

    #[test]
    fn test_novel_then_redundant() {
        let mut pool = pool(8);
        assert_eq!(pool.upsert(fp(&[1, 2, 3, 4]), 1.0, 10), Upsert::Novel);
        assert_eq!(pool.upsert(fp(&[1, 2, 3, 4]), 0.5, 11), Upsert::Redundant);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(0).unwrap().tail, 10);
    }

    #[test]
    fn test_improvement_redirects_tail() {
        let mut pool = pool(8);
        pool.upsert(fp(&[1, 2, 3, 4]), 1.0, 10);
        assert_eq!(pool.upsert(fp(&[1, 2, 3, 4]), 2.0, 42), Upsert::Improved);
        let block = pool.get(0).unwrap();
        assert_eq!(block.fitness, 2.0);
        assert_eq!(block.tail, 42);
    }

    #[test]
    fn test_equal_fitness_is_redundant_by_default() {
        let mut pool = pool(8);
        pool.upsert(fp(&[9, 9, 9, 9]), 3.0, 1);
        assert_eq!(pool.upsert(fp(&[9, 9, 9, 9]), 3.0, 2), Upsert::Redundant);

        let mut tied = BlockPool::new(8, ByteMask::all(4), true);
        tied.upsert(fp(&[9, 9, 9, 9]), 3.0, 1);
        assert_eq!(tied.upsert(fp(&[9, 9, 9, 9]), 3.0, 2), Upsert::Improved);
        assert_eq!(tied.get(0).unwrap().tail, 2);
    }

    #[test]
    fn test_find_matches_upsert() {
        let mut pool = pool(32);
        for i in 0..20u8 {
            pool.upsert(fp(&[i, 0, 0, 0]), f32::from(i), usize::from(i));
        }
        for i in 0..20u8 {
            let index = pool.find(&fp(&[i, 0, 0, 0])).unwrap();
            assert_eq!(pool.get(index).unwrap().tail, usize::from(i));
        }
        assert_eq!(pool.find(&fp(&[99, 0, 0, 0])), None);
    }

    #[test]
    fn test_masked_bytes_collapse_to_one_block() {
        // Byte 3 tracks the filler, so probing excludes it.
        let mask = ByteMask::probe(|filler| Ok(fp(&[1, 2, 3, filler]))).unwrap();
        let mut pool = BlockPool::new(8, mask, false);
        assert_eq!(pool.upsert(fp(&[5, 6, 7, 0x11]), 1.0, 0), Upsert::Novel);
        assert_eq!(pool.upsert(fp(&[5, 6, 7, 0x22]), 0.9, 1), Upsert::Redundant);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_saturated_table_reports_full() {
        // A tiny table fills up; once every reachable slot within the probe
        // bound is taken, distinct fingerprints must report Full rather than
        // loop forever.
        let mut pool: BlockPool<usize> = BlockPool::new(1, ByteMask::all(2), false);
        let mut outcomes = Vec::new();
        for i in 0..=u8::MAX {
            for j in 0..=u8::MAX {
                outcomes.push(pool.upsert(fp(&[i, j]), 0.0, 0));
            }
        }
        assert!(outcomes.contains(&Upsert::Full));
        assert!(pool.len() <= 16);
    }

    #[test]
    fn test_drain_empties_table() {
        let mut pool = pool(8);
        pool.upsert(fp(&[1, 2, 3, 4]), 1.0, 7);
        let drained = pool.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].tail, 7);
        assert!(pool.is_empty());
        assert_eq!(pool.find(&fp(&[1, 2, 3, 4])), None);
        // Reusable after draining.
        assert_eq!(pool.upsert(fp(&[1, 2, 3, 4]), 1.0, 8), Upsert::Novel);
    }
}
