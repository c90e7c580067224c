//! Run orchestration.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Barrier, Mutex, MutexGuard, PoisonError};
use std::thread;

use ricochet_core::{CoreError, CoreResult, Simulation};
use ricochet_replay::ReplayEngine;
use tracing::info;

use crate::block::BlockPool;
use crate::config::{ConfigError, SearchConfig};
use crate::counters::RunCounters;
use crate::csv::CsvSink;
use crate::script::{SearchScript, Solution};
use crate::segment::SegmentArena;
use crate::thread::{Worker, idle_until_stop};

/// Locks a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared across worker threads for one run.
pub(crate) struct Shared {
    pub pool: Mutex<BlockPool<usize>>,
    pub arena: Mutex<SegmentArena>,
    pub counters: Mutex<RunCounters>,
    pub solutions: Mutex<Vec<Solution>>,
    pub csv: Mutex<Option<CsvSink>>,
    pub barrier: Barrier,
    pub stop: AtomicBool,
    pub shots_fired: AtomicU64,
    pub merges: AtomicU64,
}

/// Final state of a completed run.
#[derive(Debug)]
pub struct SearchOutcome {
    /// Summed tallies from every worker.
    pub counters: RunCounters,
    /// Solutions collected, at most `max_solutions`.
    pub solutions: Vec<Solution>,
    /// Distinct blocks in the shared pool at shutdown.
    pub blocks: usize,
    /// Live segments in the shared arena at shutdown.
    pub segments: usize,
}

/// A configured scattershot run.
pub struct SearchEngine {
    config: SearchConfig,
}

impl SearchEngine {
    /// Validates the configuration up front.
    pub fn new(config: SearchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The validated configuration.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Runs the search to completion.
    ///
    /// `factory` builds one engine and script pair per worker thread, indexed
    /// 0 to `threads - 1`. Index 0 is also invoked once up front to probe the
    /// byte mask and seed the root block from the initial state.
    ///
    /// # Errors
    ///
    /// Returns the first fatal fault raised by any worker; the run is wound
    /// down cleanly before returning.
    pub fn run<S, T, F>(&self, factory: F) -> CoreResult<SearchOutcome>
    where
        S: Simulation,
        T: SearchScript<S>,
        F: Fn(usize) -> CoreResult<(ReplayEngine<S>, T)> + Sync,
    {
        let (mut probe_engine, mut probe_script) = factory(0)?;
        let mask = probe_script.byte_mask(&mut probe_engine)?;
        let root_fingerprint = probe_script.fingerprint(&mut probe_engine)?;
        let root_fitness = probe_script.fitness(&mut probe_engine)?;
        drop(probe_engine);
        drop(probe_script);

        let mut arena = SegmentArena::new();
        let root = arena.alloc(None, 0, 0);
        let mut pool = BlockPool::new(
            self.config.pool_capacity,
            mask.clone(),
            self.config.accept_equal_fitness,
        );
        pool.upsert(root_fingerprint, root_fitness, root);

        info!(
            threads = self.config.threads,
            max_shots = self.config.max_shots,
            mask_bytes = mask.included_len(),
            seed = self.config.seed,
            "search starting"
        );

        let shared = Shared {
            pool: Mutex::new(pool),
            arena: Mutex::new(arena),
            counters: Mutex::new(RunCounters::new()),
            solutions: Mutex::new(Vec::new()),
            csv: Mutex::new(self.config.csv.as_ref().map(CsvSink::create)),
            barrier: Barrier::new(self.config.threads),
            stop: AtomicBool::new(false),
            shots_fired: AtomicU64::new(0),
            merges: AtomicU64::new(0),
        };

        let results: Vec<CoreResult<()>> = thread::scope(|scope| {
            let shared = &shared;
            let config = &self.config;
            let factory = &factory;
            let mask = &mask;
            let handles: Vec<_> = (0..config.threads)
                .map(|index| {
                    scope.spawn(move || match factory(index) {
                        Ok((engine, script)) => {
                            Worker::new(index, engine, script, config, shared, mask.clone())
                                .run()
                        }
                        Err(error) => {
                            shared.stop.store(true, Ordering::Relaxed);
                            idle_until_stop(shared, config);
                            Err(error)
                        }
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .map_err(|_| CoreError::Internal {
                            message: "search worker panicked".to_string(),
                        })
                        .and_then(|result| result)
                })
                .collect()
        });

        if let Some(sink) = relock(&shared.csv).as_mut() {
            sink.flush();
        }
        let counters = *relock(&shared.counters);
        let solutions = std::mem::take(&mut *relock(&shared.solutions));
        let blocks = relock(&shared.pool).len();
        let segments = relock(&shared.arena).len();

        for result in results {
            result?;
        }

        info!(
            shots = counters.shots,
            blocks,
            solutions = solutions.len(),
            "search finished"
        );
        Ok(SearchOutcome { counters, solutions, blocks, segments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CsvConfig;
    use rand::Rng;
    use rand_chacha::ChaCha8Rng;
    use ricochet_core::{Fingerprint, Input, InputDiff, MemorySim, buttons};
    use ricochet_replay::EngineConfig;

    /// Walks the point toward positive x; solved at x >= 40.
    struct WalkEast {
        goal: i64,
    }

    impl WalkEast {
        fn read_i64(engine: &mut ReplayEngine<MemorySim>, field: &str) -> CoreResult<i64> {
            let bytes = engine.read(field)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            Ok(i64::from_le_bytes(raw))
        }
    }

    impl SearchScript<MemorySim> for WalkEast {
        fn fingerprint(&mut self, engine: &mut ReplayEngine<MemorySim>) -> CoreResult<Fingerprint> {
            Ok(engine.sim().state_bin())
        }

        fn pellet(
            &mut self,
            engine: &mut ReplayEngine<MemorySim>,
            rng: &mut ChaCha8Rng,
        ) -> CoreResult<bool> {
            let frame = engine.current_frame();
            let x: i8 = rng.gen_range(-10..=10);
            let pressed = if rng.gen_bool(0.5) { buttons::A } else { 0 };
            engine.set_inputs(frame, Input::new(pressed, x, 0));
            engine.load(frame + 1)?;
            // Westward motion is rejected outright.
            Ok(x >= 0)
        }

        fn fitness(&mut self, engine: &mut ReplayEngine<MemorySim>) -> CoreResult<f32> {
            Ok(Self::read_i64(engine, "pos_x")? as f32)
        }

        fn is_solution(&mut self, engine: &mut ReplayEngine<MemorySim>) -> CoreResult<bool> {
            Ok(Self::read_i64(engine, "pos_x")? >= self.goal)
        }

        fn sample_values(&mut self, engine: &mut ReplayEngine<MemorySim>) -> CoreResult<Vec<f64>> {
            Ok(vec![Self::read_i64(engine, "pos_x")? as f64])
        }
    }

    fn factory(goal: i64) -> impl Fn(usize) -> CoreResult<(ReplayEngine<MemorySim>, WalkEast)> + Sync
    {
        move |_| {
            let engine =
                ReplayEngine::new(MemorySim::new(), InputDiff::new(), EngineConfig::default())?;
            Ok((engine, WalkEast { goal }))
        }
    }

    #[test]
    fn test_single_thread_finds_solution() {
        let config = SearchConfig::new()
            .with_threads(1)
            .with_max_shots(2_000)
            .with_pellets_per_shot(4)
            .with_shots_per_merge(16)
            .with_seed(11);
        let engine = SearchEngine::new(config).unwrap();
        let outcome = engine.run(factory(40)).unwrap();

        assert_eq!(outcome.solutions.len(), 1);
        let solution = outcome.solutions[0].clone();
        assert!(solution.fitness >= 40.0);

        // The solution's inputs replay to the recorded fingerprint.
        let mut sim = MemorySim::new();
        for frame in 0..solution.frame {
            let input = solution.inputs.get(frame).unwrap_or(Input::neutral());
            sim.advance(input).unwrap();
        }
        assert_eq!(sim.state_bin(), solution.fingerprint);
    }

    #[test]
    fn test_multi_thread_run_completes() {
        let config = SearchConfig::new()
            .with_threads(3)
            .with_max_shots(600)
            .with_pellets_per_shot(3)
            .with_shots_per_merge(8)
            .with_max_solutions(0)
            .with_seed(5);
        let engine = SearchEngine::new(config).unwrap();
        // max_solutions of 0 stops the run at the first merge round, which
        // still exercises the full barrier protocol across threads.
        let outcome = engine.run(factory(i64::MAX)).unwrap();
        assert!(outcome.solutions.is_empty());
        assert!(outcome.blocks >= 1);
    }

    #[test]
    fn test_shot_budget_bounds_run() {
        let config = SearchConfig::new()
            .with_threads(2)
            .with_max_shots(100)
            .with_pellets_per_shot(2)
            .with_shots_per_merge(10)
            .with_seed(3);
        let engine = SearchEngine::new(config).unwrap();
        let outcome = engine.run(factory(i64::MAX)).unwrap();
        assert!(outcome.counters.shots <= 100);
        assert!(outcome.solutions.is_empty());
    }

    #[test]
    fn test_identical_configs_reproduce_counters() {
        let config = SearchConfig::new()
            .with_threads(1)
            .with_max_shots(200)
            .with_pellets_per_shot(3)
            .with_shots_per_merge(25)
            .with_seed(77);
        let first = SearchEngine::new(config.clone()).unwrap().run(factory(i64::MAX)).unwrap();
        let second = SearchEngine::new(config).unwrap().run(factory(i64::MAX)).unwrap();
        assert_eq!(first.counters, second.counters);
        assert_eq!(first.blocks, second.blocks);
    }

    #[test]
    fn test_csv_rows_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.csv");
        let config = SearchConfig::new()
            .with_threads(1)
            .with_max_shots(300)
            .with_pellets_per_shot(3)
            .with_shots_per_merge(30)
            .with_seed(2)
            .with_csv(CsvConfig::new(&path).with_sample_period(5).with_labels(["PosX"]));
        let engine = SearchEngine::new(config).unwrap();
        let outcome = engine.run(factory(i64::MAX)).unwrap();
        assert!(outcome.counters.novel > 0);

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Shot,Frame,Sampled,PosX"));
        assert!(lines.next().is_some());
    }

    #[test]
    fn test_factory_failure_propagates() {
        let config = SearchConfig::new().with_threads(2).with_max_shots(10);
        let engine = SearchEngine::new(config).unwrap();
        let result = engine.run(|_| -> CoreResult<(ReplayEngine<MemorySim>, WalkEast)> {
            Err(CoreError::ModuleLoad { reason: "missing image".to_string() })
        });
        assert!(result.is_err());
    }
}
