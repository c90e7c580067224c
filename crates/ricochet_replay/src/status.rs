//! Three-stage run status for transactional operations.

use ricochet_core::InputDiff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stage a transaction is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Not yet started
    Uninitialized,
    /// Running the validation stage
    Validating,
    /// Running the execution stage
    Executing,
    /// Running the assertion stage
    Asserting,
    /// All stages finished (pass or fail)
    Complete,
}

/// Outcome of a validate/execute/assert transaction
///
/// Faults raised inside a stage are caught at that stage and recorded here;
/// they never become control flow at the interface boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    /// Validation stage passed
    pub validated: bool,
    /// Execution stage passed
    pub executed: bool,
    /// Assertion stage passed
    pub asserted: bool,
    /// Validation stage raised a fault
    pub validation_faulted: bool,
    /// Execution stage raised a fault
    pub execution_faulted: bool,
    /// Assertion stage raised a fault
    pub assertion_faulted: bool,
    /// Wall-clock time spent validating
    pub validation_duration: Duration,
    /// Wall-clock time spent executing
    pub execution_duration: Duration,
    /// Wall-clock time spent asserting
    pub assertion_duration: Duration,
    /// Frame advances performed under this transaction
    pub frame_advances: u64,
    /// Snapshots taken under this transaction
    pub saves: u64,
    /// Snapshot restores performed under this transaction
    pub loads: u64,
}

impl RunStatus {
    /// Create a fresh status
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether all three stages passed without faulting
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.validated && self.executed && self.asserted
    }

    /// Whether any stage raised a fault
    #[must_use]
    pub fn faulted(&self) -> bool {
        self.validation_faulted || self.execution_faulted || self.assertion_faulted
    }

    /// Fold a nested transaction's operation counters into this one
    pub fn absorb_counters(&mut self, child: &RunStatus) {
        self.frame_advances += child.frame_advances;
        self.saves += child.saves;
        self.loads += child.loads;
    }
}

/// What a transactional operation hands back to its caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Stage outcomes and counters
    pub status: RunStatus,
    /// The input overrides the operation produced
    ///
    /// Already applied to the caller for a committed modify; cleared for a
    /// dry-run test.
    pub diff: InputDiff,
}

impl RunReport {
    /// Whether the transaction succeeded
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status.succeeded()
    }
}
