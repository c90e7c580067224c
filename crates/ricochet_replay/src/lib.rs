//! RICOCHET Replay Engine
//!
//! Transactional Execute/Modify/Test over nested speculation levels, with
//! cost-aware lazy snapshotting, rollback, and desync detection.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compare;
pub mod engine;
pub mod script;
pub mod slot;
pub mod status;
pub mod tracker;

pub use compare::Comparison;
pub use engine::{EngineConfig, InputSource, InputsMeta, ReplayEngine};
pub use script::{Adhoc, Script};
pub use slot::{CostModel, SlotHandle, SlotStore};
pub use status::{RunReport, RunStatus, Stage};
pub use tracker::{FrameCache, Tracker};
