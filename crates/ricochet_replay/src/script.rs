//! The three-stage transactional script contract.

use crate::engine::ReplayEngine;
use ricochet_core::{CoreResult, Simulation};

/// A transactional operation body with a validate/execute/assert contract
///
/// Each stage returns `Ok(true)` to pass, `Ok(false)` to fail the stage, or
/// an error. Non-fatal errors are caught at the stage that raised them and
/// recorded as a fault; fatal simulation errors abort the run. Whatever the
/// outcome, the engine rolls state back per the operation that ran the
/// script.
pub trait Script<S: Simulation> {
    /// Check preconditions; a failure skips execution entirely
    ///
    /// # Errors
    ///
    /// Non-fatal errors fail the validation stage.
    fn validate(&mut self, _engine: &mut ReplayEngine<S>) -> CoreResult<bool> {
        Ok(true)
    }

    /// Perform the operation's speculative work
    ///
    /// # Errors
    ///
    /// Non-fatal errors fail the execution stage.
    fn execute(&mut self, engine: &mut ReplayEngine<S>) -> CoreResult<bool>;

    /// Check postconditions on the state execution produced
    ///
    /// # Errors
    ///
    /// Non-fatal errors fail the assertion stage.
    fn assert(&mut self, _engine: &mut ReplayEngine<S>) -> CoreResult<bool> {
        Ok(true)
    }
}

/// Closure adapter for one-off script bodies
///
/// Validation and assertion pass trivially; the closure is the execution
/// stage.
pub struct Adhoc<F>(pub F);

impl<S, F> Script<S> for Adhoc<F>
where
    S: Simulation,
    F: FnMut(&mut ReplayEngine<S>) -> CoreResult<bool>,
{
    fn execute(&mut self, engine: &mut ReplayEngine<S>) -> CoreResult<bool> {
        (self.0)(engine)
    }
}
