//! Candidate comparison over transactional scripts.
//!
//! Runs a family of candidate scripts against the same entry state, asks a
//! caller-supplied comparator which outcome is preferable, and optionally
//! commits the winner. A terminator predicate ends the sweep at the first
//! acceptable outcome, skipping the remaining candidates.

use crate::engine::ReplayEngine;
use crate::script::Script;
use crate::status::RunReport;
use ricochet_core::{CoreResult, Simulation};
use tracing::debug;

/// Winner of a comparison sweep
#[derive(Debug, Clone)]
pub struct Comparison {
    /// Index of the winning candidate
    pub index: usize,
    /// The winner's report
    pub report: RunReport,
    /// Whether the terminator ended the sweep early
    pub terminated: bool,
}

impl<S: Simulation> ReplayEngine<S> {
    /// Run every candidate from the current state and keep the best
    ///
    /// Each candidate runs under [`execute`](Self::execute) semantics, so
    /// the entry state is restored between candidates and afterwards.
    /// Candidates that do not pass all three stages are skipped. `better`
    /// decides whether a passing report beats the incumbent winner;
    /// `terminal` ends the sweep at the first report it accepts. Returns
    /// `None` when no candidate passed.
    ///
    /// # Errors
    ///
    /// Propagates fatal simulation faults.
    pub fn compare<T, B, Q>(
        &mut self,
        candidates: &mut [T],
        mut better: B,
        mut terminal: Q,
    ) -> CoreResult<Option<Comparison>>
    where
        T: Script<S>,
        B: FnMut(&RunReport, &RunReport) -> bool,
        Q: FnMut(&RunReport) -> bool,
    {
        let mut winner: Option<Comparison> = None;
        for (index, candidate) in candidates.iter_mut().enumerate() {
            let report = self.execute(candidate)?;
            if !report.succeeded() {
                continue;
            }
            if terminal(&report) {
                debug!(index, "comparison terminated early");
                return Ok(Some(Comparison { index, report, terminated: true }));
            }
            if winner.as_ref().is_none_or(|best| better(&report, &best.report)) {
                winner = Some(Comparison { index, report, terminated: false });
            }
        }
        Ok(winner)
    }

    /// Run every candidate, then commit the winner into this level
    ///
    /// The sweep itself works like [`compare`](Self::compare); the winning
    /// candidate is then re-run under [`modify`](Self::modify) semantics to
    /// splice its diff in. Candidates must therefore behave identically when
    /// re-run from the same state. Returns `None`, committing nothing, when
    /// no candidate passed.
    ///
    /// # Errors
    ///
    /// Propagates fatal simulation faults.
    pub fn modify_compare<T, B, Q>(
        &mut self,
        candidates: &mut [T],
        better: B,
        terminal: Q,
    ) -> CoreResult<Option<Comparison>>
    where
        T: Script<S>,
        B: FnMut(&RunReport, &RunReport) -> bool,
        Q: FnMut(&RunReport) -> bool,
    {
        let Some(won) = self.compare(candidates, better, terminal)? else {
            return Ok(None);
        };
        let report = self.modify(&mut candidates[won.index])?;
        Ok(Some(Comparison {
            index: won.index,
            report,
            terminated: won.terminated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use ricochet_core::{Input, InputDiff, MemorySim};

    fn engine() -> ReplayEngine<MemorySim> {
        ReplayEngine::new(MemorySim::new(), InputDiff::new(), EngineConfig::default()).unwrap()
    }

    /// Pushes the point east by `x` per frame for three frames
    struct Push {
        x: i8,
    }

    impl Script<MemorySim> for Push {
        fn execute(&mut self, engine: &mut ReplayEngine<MemorySim>) -> CoreResult<bool> {
            for frame in 0..3 {
                engine.set_inputs(frame, Input::new(0, self.x, 0));
            }
            engine.load(3)?;
            Ok(true)
        }

        fn assert(&mut self, _engine: &mut ReplayEngine<MemorySim>) -> CoreResult<bool> {
            Ok(self.x >= 0)
        }
    }

    fn reach(report: &RunReport) -> i64 {
        (0..3)
            .filter_map(|f| report.diff.get(f))
            .map(|input| i64::from(input.stick_x))
            .sum()
    }

    #[test]
    fn test_compare_picks_comparator_winner() {
        let mut engine = engine();
        let mut candidates = [Push { x: 5 }, Push { x: 20 }, Push { x: 10 }];
        let won = engine
            .compare(&mut candidates, |a, b| reach(a) > reach(b), |_| false)
            .unwrap()
            .unwrap();
        assert_eq!(won.index, 1);
        assert!(!won.terminated);
        assert_eq!(reach(&won.report), 60);
        // The sweep left the caller untouched
        assert_eq!(engine.current_frame(), 0);
        assert!(engine.diff().is_empty());
    }

    #[test]
    fn test_compare_skips_failed_candidates() {
        let mut engine = engine();
        // The westward candidate fails its assertion and never wins
        let mut candidates = [Push { x: -100 }, Push { x: 1 }];
        let won = engine
            .compare(&mut candidates, |a, b| reach(a) > reach(b), |_| false)
            .unwrap()
            .unwrap();
        assert_eq!(won.index, 1);
    }

    #[test]
    fn test_compare_with_no_passing_candidate() {
        let mut engine = engine();
        let mut candidates = [Push { x: -1 }, Push { x: -2 }];
        let won = engine
            .compare(&mut candidates, |_, _| true, |_| false)
            .unwrap();
        assert!(won.is_none());
    }

    #[test]
    fn test_terminator_ends_sweep_early() {
        let mut engine = engine();
        let mut candidates = [Push { x: 2 }, Push { x: 8 }, Push { x: 30 }];
        let won = engine
            .compare(
                &mut candidates,
                |a, b| reach(a) > reach(b),
                |report| reach(report) >= 24,
            )
            .unwrap()
            .unwrap();
        // The middle candidate satisfied the terminator; the last never ran
        assert_eq!(won.index, 1);
        assert!(won.terminated);
    }

    #[test]
    fn test_modify_compare_commits_winner() {
        let mut engine = engine();
        let mut candidates = [Push { x: 5 }, Push { x: 20 }];
        let won = engine
            .modify_compare(&mut candidates, |a, b| reach(a) > reach(b), |_| false)
            .unwrap()
            .unwrap();
        assert_eq!(won.index, 1);
        // The winner's inputs are spliced in and applied
        assert_eq!(engine.current_frame(), 3);
        assert_eq!(engine.diff().len(), 3);
        let bytes = engine.read("pos_x").unwrap();
        let x = i64::from_le_bytes(bytes.as_slice().try_into().unwrap());
        assert_eq!(x, 60);
    }
}
