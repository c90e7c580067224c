//! The search's view of a problem.

use rand_chacha::ChaCha8Rng;
use ricochet_core::{ByteMask, CoreResult, Fingerprint, InputDiff, Simulation};
use ricochet_replay::ReplayEngine;

/// Problem definition driven by the search.
///
/// Implementations own the domain knowledge: how to summarize a state into a
/// fingerprint, how to take one speculative step, and what counts as good.
/// Every worker thread constructs its own script instance, so implementations
/// never need to be thread-safe.
pub trait SearchScript<S: Simulation> {
    /// Byte summary of the current state used for deduplication.
    fn fingerprint(&mut self, engine: &mut ReplayEngine<S>) -> CoreResult<Fingerprint>;

    /// Byte inclusion mask for fingerprint hashing, probed once at startup.
    ///
    /// The default includes every byte of the initial fingerprint.
    fn byte_mask(&mut self, engine: &mut ReplayEngine<S>) -> CoreResult<ByteMask> {
        let width = self.fingerprint(engine)?.len();
        Ok(ByteMask::all(width))
    }

    /// Takes one speculative step: draw choices from `rng`, write inputs, and
    /// advance the simulation.
    ///
    /// `Ok(false)` rejects the candidate; the engine is rolled back to the
    /// step's starting frame and the step is re-drawn under a fresh generator.
    fn pellet(&mut self, engine: &mut ReplayEngine<S>, rng: &mut ChaCha8Rng) -> CoreResult<bool>;

    /// Fitness of the current state. Higher is better; non-finite values
    /// reject the candidate.
    fn fitness(&mut self, engine: &mut ReplayEngine<S>) -> CoreResult<f32>;

    /// Whether the current state satisfies the goal predicate.
    fn is_solution(&mut self, engine: &mut ReplayEngine<S>) -> CoreResult<bool> {
        let _ = engine;
        Ok(false)
    }

    /// Values for one telemetry row, matching the configured CSV labels.
    fn sample_values(&mut self, engine: &mut ReplayEngine<S>) -> CoreResult<Vec<f64>> {
        let _ = engine;
        Ok(Vec::new())
    }
}

/// Input sequence satisfying the goal predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Fully resolved inputs from the start frame to the solving frame.
    pub inputs: InputDiff,
    /// Frame at which the predicate held.
    pub frame: u64,
    /// Fitness of the solving state.
    pub fitness: f32,
    /// Fingerprint of the solving state, for replay verification.
    pub fingerprint: Fingerprint,
}
