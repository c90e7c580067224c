//! Per-thread shot loop and merge rounds.

use std::sync::atomic::Ordering;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use ricochet_core::{ByteMask, CoreError, CoreResult, Fingerprint, Simulation};
use ricochet_replay::ReplayEngine;
use tracing::{debug, info, warn};

use crate::block::{BlockPool, Upsert};
use crate::config::SearchConfig;
use crate::counters::RunCounters;
use crate::engine::{Shared, relock};
use crate::rng::{SeedStream, mix};
use crate::script::{SearchScript, Solution};
use crate::segment::{LocalArena, ParentRef, SegmentArena, SegmentStep, TailRef};

/// Replay recipe for a selected base block.
struct Base {
    tail: usize,
    fingerprint: Fingerprint,
    chain: Vec<SegmentStep>,
}

/// One search thread.
///
/// A worker owns a private simulation, engine, and script, plus local lineage
/// and block buffers. It only touches shared state when claiming shots, when
/// recording solutions, and during merge rounds.
pub(crate) struct Worker<'a, S: Simulation, T: SearchScript<S>> {
    thread_index: usize,
    engine: ReplayEngine<S>,
    script: T,
    config: &'a SearchConfig,
    shared: &'a Shared,
    mask: ByteMask,
    local_pool: BlockPool<TailRef>,
    local_arena: LocalArena,
    select_rng: ChaCha8Rng,
    tallies: RunCounters,
    accepted: u64,
}

impl<'a, S: Simulation, T: SearchScript<S>> Worker<'a, S, T> {
    pub(crate) fn new(
        thread_index: usize,
        engine: ReplayEngine<S>,
        script: T,
        config: &'a SearchConfig,
        shared: &'a Shared,
        mask: ByteMask,
    ) -> Self {
        // Local pools only hold one merge round's worth of blocks.
        let local_capacity = (config.shots_per_merge as usize)
            .saturating_mul(config.pellets_per_shot as usize)
            .max(16);
        Self {
            thread_index,
            engine,
            script,
            config,
            shared,
            mask: mask.clone(),
            local_pool: BlockPool::new(local_capacity, mask, config.accept_equal_fitness),
            local_arena: LocalArena::new(),
            select_rng: ChaCha8Rng::seed_from_u64(mix(&[
                config.seed,
                0x5e1ec7,
                thread_index as u64,
            ])),
            tallies: RunCounters::new(),
            accepted: 0,
        }
    }

    /// Runs until the shared stop flag is observed after a merge round.
    ///
    /// Every thread passes both barriers exactly once per round, even after a
    /// fatal fault, so the round structure never deadlocks.
    pub(crate) fn run(mut self) -> CoreResult<()> {
        let mut fatal: Option<CoreError> = None;
        loop {
            if fatal.is_none() {
                for _ in 0..self.config.shots_per_merge {
                    if self.shared.stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let shot = self.shared.shots_fired.fetch_add(1, Ordering::Relaxed);
                    if shot >= self.config.max_shots {
                        break;
                    }
                    if let Err(error) = self.fire(shot) {
                        warn!(thread = self.thread_index, %error, "worker stopping on fault");
                        self.shared.stop.store(true, Ordering::Relaxed);
                        fatal = Some(error);
                        break;
                    }
                }
            }
            self.merge();
            let round = self.shared.barrier.wait();
            if round.is_leader() {
                lead_round(self.shared, self.config);
            }
            self.shared.barrier.wait();
            if self.shared.stop.load(Ordering::Relaxed) {
                return match fatal {
                    Some(error) => Err(error),
                    None => Ok(()),
                };
            }
        }
    }

    /// One shot: pick a base, reconstitute it, then extend with pellets.
    fn fire(&mut self, shot: u64) -> CoreResult<()> {
        self.tallies.shots += 1;
        let base = self.select_base(shot)?;
        if !self.reconstitute(&base)? {
            return Ok(());
        }

        let mut tail = TailRef::Shared(base.tail);
        let mut stream = SeedStream::for_lineage(mix(&[
            self.config.seed,
            self.thread_index as u64,
            shot,
        ]));
        let mut attempt = 0u32;
        let mut consecutive_failed = 0u32;

        for _ in 0..self.config.pellets_per_shot {
            let frame_before = self.engine.current_frame();
            let segment_seed = stream.state();
            let mut rng = stream.scratch(attempt);
            self.tallies.pellets += 1;

            let valid = self.script.pellet(&mut self.engine, &mut rng)?;
            let fitness = if valid {
                self.script.fitness(&mut self.engine)?
            } else {
                f32::NAN
            };
            if !valid || !fitness.is_finite() {
                self.engine.rollback(frame_before)?;
                self.tallies.failed += 1;
                consecutive_failed += 1;
                attempt += 1;
                if consecutive_failed > self.config.max_consecutive_failed_pellets {
                    break;
                }
                continue;
            }

            stream.commit();
            attempt = 0;
            consecutive_failed = 0;

            let parent = match tail {
                TailRef::Shared(index) => ParentRef::Shared(index),
                TailRef::Local(index) => ParentRef::Local(index),
            };
            let local = self.local_arena.alloc(parent, segment_seed, 1);
            tail = TailRef::Local(local);

            let fingerprint = self.script.fingerprint(&mut self.engine)?;
            match self.local_pool.upsert(fingerprint.clone(), fitness, tail) {
                Upsert::Novel => self.tallies.novel += 1,
                Upsert::Improved => self.tallies.improved += 1,
                Upsert::Redundant => {
                    self.tallies.redundant += 1;
                    continue;
                }
                Upsert::Full => {
                    self.tallies.failed += 1;
                    continue;
                }
            }
            self.accepted += 1;

            if self.script.is_solution(&mut self.engine)? {
                self.record_solution(fitness, fingerprint)?;
                if self.shared.stop.load(Ordering::Relaxed) {
                    break;
                }
            }
            self.maybe_sample(shot)?;
        }
        Ok(())
    }

    /// Draws a base block, forcing the root periodically and re-drawing past
    /// over-deep lineages.
    fn select_base(&mut self, shot: u64) -> CoreResult<Base> {
        let pool = relock(&self.shared.pool);
        let arena = relock(&self.shared.arena);

        let mut index = 0;
        if shot % self.config.base_root_period != 0 && pool.len() > 1 {
            for _ in 0..=self.config.max_base_retries {
                let candidate = (self.select_rng.next_u64() % pool.len() as u64) as usize;
                let Some(block) = pool.get(candidate) else {
                    continue;
                };
                let depth = arena.get(block.tail).map_or(0, |segment| segment.depth);
                if depth <= self.config.max_segment_depth {
                    index = candidate;
                    break;
                }
            }
        }

        let block = pool.get(index).ok_or_else(|| CoreError::Internal {
            message: format!("block pool has no entry {index}"),
        })?;
        Ok(Base {
            tail: block.tail,
            fingerprint: block.fingerprint.clone(),
            chain: arena.chain(block.tail),
        })
    }

    /// Replays a base's lineage from the start frame and verifies its
    /// fingerprint. A mismatch means the lineage no longer reproduces the
    /// recorded state; the shot is abandoned.
    fn reconstitute(&mut self, base: &Base) -> CoreResult<bool> {
        let start = self.engine.start_frame();
        self.engine.rollback(start)?;
        for step in &base.chain {
            if !self.replay_segment(step)? {
                self.tallies.failed += 1;
                return Ok(false);
            }
        }
        let fingerprint = self.script.fingerprint(&mut self.engine)?;
        if !fingerprint.masked_eq(&base.fingerprint, &self.mask) {
            warn!(
                thread = self.thread_index,
                expected = %base.fingerprint.to_hex(),
                actual = %fingerprint.to_hex(),
                "base replay diverged"
            );
            self.tallies.failed += 1;
            return Ok(false);
        }
        Ok(true)
    }

    /// Replays one segment's committed steps, reproducing the original
    /// rejected attempts so the scratch generators line up exactly.
    fn replay_segment(&mut self, step: &SegmentStep) -> CoreResult<bool> {
        let mut stream = SeedStream::from_state(step.seed);
        for _ in 0..step.steps {
            let mut attempt = 0u32;
            loop {
                let frame_before = self.engine.current_frame();
                let mut rng = stream.scratch(attempt);
                let valid = self.script.pellet(&mut self.engine, &mut rng)?
                    && self.script.fitness(&mut self.engine)?.is_finite();
                if valid {
                    stream.commit();
                    break;
                }
                self.engine.rollback(frame_before)?;
                attempt += 1;
                if attempt > self.config.max_consecutive_failed_pellets {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn record_solution(&mut self, fitness: f32, fingerprint: Fingerprint) -> CoreResult<()> {
        let frame = self.engine.current_frame();
        let start = self.engine.start_frame();
        let inputs = self.engine.resolved_diff(start, frame)?;

        let mut solutions = relock(&self.shared.solutions);
        if solutions.len() >= self.config.max_solutions {
            return Ok(());
        }
        info!(
            thread = self.thread_index,
            frame,
            fitness,
            fingerprint = %fingerprint.to_hex(),
            "solution found"
        );
        solutions.push(Solution { inputs, frame, fitness, fingerprint });
        self.tallies.solutions += 1;
        if solutions.len() >= self.config.max_solutions {
            self.shared.stop.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    fn maybe_sample(&mut self, shot: u64) -> CoreResult<()> {
        let Some(csv) = &self.config.csv else {
            return Ok(());
        };
        if (self.accepted - 1) % csv.sample_period != 0 {
            return Ok(());
        }
        let values = self.script.sample_values(&mut self.engine)?;
        let frame = self.engine.current_frame();
        if let Some(sink) = relock(&self.shared.csv).as_mut() {
            sink.record(shot, frame, self.accepted, &values);
        }
        Ok(())
    }

    /// Folds this round's lineage, blocks, and tallies into shared state.
    fn merge(&mut self) {
        let mut pool = relock(&self.shared.pool);
        let mut arena = relock(&self.shared.arena);
        merge_local(&mut pool, &mut arena, &mut self.local_pool, &mut self.local_arena);
        drop(arena);
        drop(pool);

        relock(&self.shared.counters).merge(&self.tallies);
        self.tallies = RunCounters::new();
    }
}

/// Drains one worker's local lineage and blocks into the shared structures.
///
/// Local segments are appended parent-first, so one forward pass remaps
/// every local index to its new shared slot. Blocks then go through the
/// shared pool's upsert, which keeps the higher-fitness lineage whenever two
/// workers reached the same fingerprint.
pub(crate) fn merge_local(
    pool: &mut BlockPool<usize>,
    arena: &mut SegmentArena,
    local_pool: &mut BlockPool<TailRef>,
    local_arena: &mut LocalArena,
) {
    let locals: Vec<_> = local_arena.drain().collect();
    let mut remap = Vec::with_capacity(locals.len());
    for segment in locals {
        let parent = match segment.parent {
            ParentRef::Shared(index) => index,
            ParentRef::Local(index) => remap[index],
        };
        remap.push(arena.alloc(Some(parent), segment.seed, segment.steps));
    }
    for block in local_pool.drain() {
        let tail = match block.tail {
            TailRef::Shared(index) => index,
            TailRef::Local(index) => remap[index],
        };
        pool.upsert(block.fingerprint, block.fitness, tail);
    }
}

/// Leader duties between the two barriers of a merge round: lineage
/// collection on cadence, progress logging, and the stop decision.
pub(crate) fn lead_round(shared: &Shared, config: &SearchConfig) {
    let merge_round = shared.merges.fetch_add(1, Ordering::Relaxed) + 1;

    let pool = relock(&shared.pool);
    let mut arena = relock(&shared.arena);
    if merge_round % config.merges_per_gc == 0 {
        let tails = pool.tails();
        let freed = arena.collect(&tails);
        debug!(merge_round, freed, "lineage collection");
    }
    let blocks = pool.len();
    let segments = arena.len();
    drop(arena);
    drop(pool);

    relock(&shared.counters).log_summary(blocks, segments);
    if let Some(sink) = relock(&shared.csv).as_mut() {
        sink.flush();
    }

    let budget_spent = shared.shots_fired.load(Ordering::Relaxed) >= config.max_shots;
    let solved = relock(&shared.solutions).len() >= config.max_solutions;
    if budget_spent || solved {
        shared.stop.store(true, Ordering::Relaxed);
    }
}

/// Round loop for a thread whose setup failed: keeps servicing barriers so
/// the remaining threads can wind down, doing no work of its own.
pub(crate) fn idle_until_stop(shared: &Shared, config: &SearchConfig) {
    loop {
        let round = shared.barrier.wait();
        if round.is_leader() {
            lead_round(shared, config);
        }
        shared.barrier.wait();
        if shared.stop.load(Ordering::Relaxed) {
            return;
        }
    }
}
