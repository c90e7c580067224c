//! Run statistics.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Tallies accumulated across a run.
///
/// Workers keep a private copy and fold it into the shared copy at each
/// merge, so reading the shared counters never contends with the shot loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    /// Shots claimed from the global budget.
    pub shots: u64,
    /// Pellet attempts, accepted or not.
    pub pellets: u64,
    /// Pellets rejected by the script or by a non-finite fitness.
    pub failed: u64,
    /// Accepted pellets whose state lost to an incumbent block.
    pub redundant: u64,
    /// Accepted pellets that created a new block.
    pub novel: u64,
    /// Accepted pellets that improved an existing block.
    pub improved: u64,
    /// Solutions collected.
    pub solutions: u64,
}

impl RunCounters {
    /// Creates a zeroed tally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds another tally into this one.
    pub fn merge(&mut self, other: &RunCounters) {
        self.shots += other.shots;
        self.pellets += other.pellets;
        self.failed += other.failed;
        self.redundant += other.redundant;
        self.novel += other.novel;
        self.improved += other.improved;
        self.solutions += other.solutions;
    }

    fn percent(part: u64, whole: u64) -> f64 {
        if whole == 0 {
            0.0
        } else {
            part as f64 * 100.0 / whole as f64
        }
    }

    /// Share of pellet attempts that were rejected.
    pub fn futility_percent(&self) -> f64 {
        Self::percent(self.failed, self.pellets)
    }

    /// Share of pellet attempts that duplicated a known state.
    pub fn redundancy_percent(&self) -> f64 {
        Self::percent(self.redundant, self.pellets)
    }

    /// Share of pellet attempts that yielded a new or improved block.
    pub fn discovery_percent(&self) -> f64 {
        Self::percent(self.novel + self.improved, self.pellets)
    }

    /// Emits a one-line progress summary.
    pub fn log_summary(&self, blocks: usize, segments: usize) {
        info!(
            shots = self.shots,
            pellets = self.pellets,
            blocks,
            segments,
            solutions = self.solutions,
            futile = %format_args!("{:.1}%", self.futility_percent()),
            redundant = %format_args!("{:.1}%", self.redundancy_percent()),
            discovery = %format_args!("{:.1}%", self.discovery_percent()),
            "search progress"
        );
    }
}
