//! RICOCHET core types
//!
//! Controller inputs, sparse input diffs, state fingerprints, stick mapping
//! tables, and the simulation capability contract shared by the replay and
//! search engines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diff;
pub mod error;
pub mod fingerprint;
pub mod input;
pub mod sim;
pub mod stick;

pub use diff::InputDiff;
pub use error::{CoreError, CoreResult};
pub use fingerprint::{ByteMask, Fingerprint, rehash};
pub use input::{Input, buttons};
pub use sim::{MemorySim, Simulation};
pub use stick::{Rotation, StickMap, hau_equals, stick_map};
