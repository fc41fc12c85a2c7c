use crate::run_id::RunId;
use serde::Serialize;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Precondition,
    Conversion,
    ExternalStep,
    Store,
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Precondition => "precondition",
            FailureKind::Conversion => "conversion",
            FailureKind::ExternalStep => "external step",
            FailureKind::Store => "store",
        }
    }
}

/// Per-run demultiplexing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Discovered,
    Validated,
    Configuring,
    RunningPipeline,
    Archiving,
    Locked,
    Recorded,
    Failed(FailureKind),
}

impl RunState {
    fn rank(&self) -> Option<u8> {
        match self {
            RunState::Discovered => Some(0),
            RunState::Validated => Some(1),
            RunState::Configuring => Some(2),
            RunState::RunningPipeline => Some(3),
            RunState::Archiving => Some(4),
            RunState::Locked => Some(5),
            RunState::Recorded => Some(6),
            RunState::Failed(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Recorded | RunState::Failed(_))
    }

    /// Forward moves only. Staying in the same phase is allowed so several
    /// steps can share one phase; `Failed` is reachable from any
    /// non-terminal state.
    pub fn can_advance_to(&self, next: RunState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to >= from,
            (None, Some(_)) => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Discovered => write!(f, "discovered"),
            RunState::Validated => write!(f, "validated"),
            RunState::Configuring => write!(f, "configuring"),
            RunState::RunningPipeline => write!(f, "running pipeline"),
            RunState::Archiving => write!(f, "archiving"),
            RunState::Locked => write!(f, "locked read-only"),
            RunState::Recorded => write!(f, "recorded"),
            RunState::Failed(kind) => write!(f, "failed ({})", kind.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: RunState,
    pub to: RunState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid run state transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// Tracks one run through the state machine and keeps the visited states.
#[derive(Debug, Clone)]
pub struct RunLifecycle {
    run_id: RunId,
    history: Vec<RunState>,
}

impl RunLifecycle {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            history: vec![RunState::Discovered],
        }
    }

    pub fn state(&self) -> RunState {
        // history always starts with Discovered
        self.history[self.history.len() - 1]
    }

    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn advance(&mut self, next: RunState) -> Result<(), InvalidTransition> {
        let current = self.state();
        if !current.can_advance_to(next) {
            return Err(InvalidTransition {
                from: current,
                to: next,
            });
        }
        if current != next {
            debug!(run_id = %self.run_id, from = %current, to = %next, "run state");
            self.history.push(next);
        }
        Ok(())
    }

    pub fn fail(&mut self, kind: FailureKind) {
        if !self.state().is_terminal() {
            self.history.push(RunState::Failed(kind));
        }
    }

    pub fn into_history(self) -> Vec<RunState> {
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> RunLifecycle {
        RunLifecycle::new(RunId::from_stored("150408_NB500892_0002_AH3LNMBGXX"))
    }

    #[test]
    fn test_full_forward_path() {
        let mut lc = lifecycle();
        for next in [
            RunState::Validated,
            RunState::Configuring,
            RunState::RunningPipeline,
            RunState::Archiving,
            RunState::Archiving,
            RunState::Locked,
            RunState::Recorded,
        ] {
            lc.advance(next).unwrap();
        }
        assert_eq!(lc.state(), RunState::Recorded);
        assert_eq!(lc.history().len(), 7, "repeated phase is recorded once");
    }

    #[test]
    fn test_backwards_move_rejected() {
        let mut lc = lifecycle();
        lc.advance(RunState::Validated).unwrap();
        lc.advance(RunState::RunningPipeline).unwrap();
        let err = lc.advance(RunState::Configuring).unwrap_err();
        assert_eq!(err.from, RunState::RunningPipeline);
        assert_eq!(lc.state(), RunState::RunningPipeline);
    }

    #[test]
    fn test_failed_absorbs() {
        let mut lc = lifecycle();
        lc.advance(RunState::Validated).unwrap();
        lc.fail(FailureKind::Conversion);
        assert_eq!(lc.state(), RunState::Failed(FailureKind::Conversion));
        assert!(lc.advance(RunState::Configuring).is_err());
        lc.fail(FailureKind::Store);
        assert_eq!(lc.state(), RunState::Failed(FailureKind::Conversion));
    }

    #[test]
    fn test_recorded_is_terminal() {
        assert!(!RunState::Recorded.can_advance_to(RunState::Failed(FailureKind::Store)));
        assert!(RunState::Discovered.can_advance_to(RunState::Failed(FailureKind::Precondition)));
    }
}
