//! Search run parameters.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration rejected before a run starts.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No worker threads were requested.
    #[error("thread count must be at least 1")]
    ZeroThreads,

    /// Shots would take no speculative steps.
    #[error("pellets_per_shot must be at least 1")]
    ZeroPellets,

    /// Workers would never reach a merge round.
    #[error("shots_per_merge must be at least 1")]
    ZeroMergeCadence,

    /// Lineage collection would never run.
    #[error("merges_per_gc must be at least 1")]
    ZeroGcCadence,

    /// The shared pool could hold no blocks.
    #[error("pool_capacity must be at least 1")]
    ZeroPoolCapacity,

    /// Base selection could never force the root.
    #[error("base_root_period must be at least 1")]
    ZeroRootPeriod,

    /// The telemetry sink could never sample.
    #[error("csv sample_period must be at least 1")]
    ZeroSamplePeriod,
}

/// Sampling sink for per-shot telemetry rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvConfig {
    /// Destination file, truncated on open.
    pub path: PathBuf,
    /// Write one row per this many accepted pellets (per worker).
    pub sample_period: u64,
    /// Column labels appended after the fixed `Shot,Frame,Sampled` prefix.
    pub labels: Vec<String>,
}

impl CsvConfig {
    /// Sink writing to `path`, sampling every accepted pellet, no labels.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), sample_period: 1, labels: Vec::new() }
    }

    /// Sets the sampling period.
    #[must_use]
    pub fn with_sample_period(mut self, period: u64) -> Self {
        self.sample_period = period;
        self
    }

    /// Sets the value column labels.
    #[must_use]
    pub fn with_labels<I, L>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }
}

/// Tuning knobs for a scattershot run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Worker threads, each with its own simulation instance.
    pub threads: usize,
    /// Global shot budget; the run stops once this many shots are claimed.
    pub max_shots: u64,
    /// Speculative steps attempted per shot.
    pub pellets_per_shot: u32,
    /// Shots each worker fires between merges into the shared pool.
    pub shots_per_merge: u64,
    /// Merge rounds between lineage garbage collections.
    pub merges_per_gc: u64,
    /// Bases deeper than this are re-drawn during selection.
    pub max_segment_depth: u32,
    /// Every Nth shot starts from the root block regardless of the draw.
    pub base_root_period: u64,
    /// Re-draws allowed before selection falls back to the root.
    pub max_base_retries: u32,
    /// Consecutive rejected pellets that abandon the rest of a shot.
    pub max_consecutive_failed_pellets: u32,
    /// The run stops once this many solutions are collected.
    pub max_solutions: usize,
    /// Accept candidates whose fitness ties the incumbent block.
    pub accept_equal_fitness: bool,
    /// Upper bound on distinct blocks in the shared pool.
    pub pool_capacity: usize,
    /// Root seed; every stream in the run derives from it.
    pub seed: u64,
    /// Optional telemetry sink.
    pub csv: Option<CsvConfig>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            max_shots: 100_000,
            pellets_per_shot: 8,
            shots_per_merge: 64,
            merges_per_gc: 4,
            max_segment_depth: 1024,
            base_root_period: 32,
            max_base_retries: 8,
            max_consecutive_failed_pellets: 16,
            max_solutions: 1,
            accept_equal_fitness: false,
            pool_capacity: 65_536,
            seed: 0,
            csv: None,
        }
    }
}

impl SearchConfig {
    /// Default tuning, suitable as a builder starting point.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker thread count.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the global shot budget.
    #[must_use]
    pub fn with_max_shots(mut self, shots: u64) -> Self {
        self.max_shots = shots;
        self
    }

    /// Sets the steps attempted per shot.
    #[must_use]
    pub fn with_pellets_per_shot(mut self, pellets: u32) -> Self {
        self.pellets_per_shot = pellets;
        self
    }

    /// Sets the merge cadence.
    #[must_use]
    pub fn with_shots_per_merge(mut self, shots: u64) -> Self {
        self.shots_per_merge = shots;
        self
    }

    /// Sets the lineage collection cadence.
    #[must_use]
    pub fn with_merges_per_gc(mut self, merges: u64) -> Self {
        self.merges_per_gc = merges;
        self
    }

    /// Sets the base selection depth cutoff.
    #[must_use]
    pub fn with_max_segment_depth(mut self, depth: u32) -> Self {
        self.max_segment_depth = depth;
        self
    }

    /// Sets how often a shot is forced to start from the root.
    #[must_use]
    pub fn with_base_root_period(mut self, period: u64) -> Self {
        self.base_root_period = period;
        self
    }

    /// Sets the solution count that stops the run.
    #[must_use]
    pub fn with_max_solutions(mut self, solutions: usize) -> Self {
        self.max_solutions = solutions;
        self
    }

    /// Sets whether fitness ties replace the incumbent block.
    #[must_use]
    pub fn with_accept_equal_fitness(mut self, accept: bool) -> Self {
        self.accept_equal_fitness = accept;
        self
    }

    /// Sets the shared pool capacity.
    #[must_use]
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Sets the root seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Enables the telemetry sink.
    #[must_use]
    pub fn with_csv(mut self, csv: CsvConfig) -> Self {
        self.csv = Some(csv);
        self
    }

    /// Rejects parameter combinations that cannot make progress.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if self.pellets_per_shot == 0 {
            return Err(ConfigError::ZeroPellets);
        }
        if self.shots_per_merge == 0 {
            return Err(ConfigError::ZeroMergeCadence);
        }
        if self.merges_per_gc == 0 {
            return Err(ConfigError::ZeroGcCadence);
        }
        if self.pool_capacity == 0 {
            return Err(ConfigError::ZeroPoolCapacity);
        }
        if self.base_root_period == 0 {
            return Err(ConfigError::ZeroRootPeriod);
        }
        if let Some(csv) = &self.csv
            && csv.sample_period == 0
        {
            return Err(ConfigError::ZeroSamplePeriod);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(SearchConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_zero_threads_rejected() {
        let config = SearchConfig::default().with_threads(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroThreads));
    }

    #[test]
    fn test_zero_pool_rejected() {
        let config = SearchConfig::default().with_pool_capacity(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroPoolCapacity));
    }

    #[test]
    fn test_zero_sample_period_rejected() {
        let csv = CsvConfig::new("/tmp/out.csv").with_sample_period(0);
        let config = SearchConfig::default().with_csv(csv);
        assert_eq!(config.validate(), Err(ConfigError::ZeroSamplePeriod));
    }

    #[test]
    fn test_builders_round_trip_through_json() {
        let config = SearchConfig::new()
            .with_threads(2)
            .with_max_shots(500)
            .with_seed(99)
            .with_csv(CsvConfig::new("run.csv").with_labels(["X", "Y"]));
        let text = serde_json::to_string(&config).unwrap();
        let back: SearchConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
