//! RICOCHET Search Engine
//!
//! Multi-threaded stochastic scattershot over a deterministic simulation.
//! Each worker repeatedly reconstitutes a known state from its recorded
//! lineage, extends it with randomized speculative steps, and deduplicates
//! the resulting states into a shared fingerprint pool that keeps the best
//! fitness seen per state. Workers merge at barrier-synchronized rounds, and
//! unreachable lineage segments are collected on a fixed cadence.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod config;
pub mod counters;
pub mod csv;
pub mod engine;
pub mod options;
pub mod rng;
pub mod script;
pub mod segment;
mod thread;

pub use block::{Block, BlockPool, MAX_PROBES, Upsert};
pub use config::{ConfigError, CsvConfig, SearchConfig};
pub use counters::RunCounters;
pub use csv::CsvSink;
pub use engine::{SearchEngine, SearchOutcome};
pub use options::{InputOptions, WeightedSet};
pub use rng::{SEED_MULTIPLIER, SEED_OFFSET, SeedStream, mix};
pub use script::{SearchScript, Solution};
pub use segment::{Segment, SegmentArena, SegmentStep};
