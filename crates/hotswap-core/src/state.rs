//! Per-request pipeline state machine
//!
//! `REQUESTED → VALIDATING → (REJECTED | REDEFINING) → (FAILED | MIGRATING) → COMPLETED`

use crate::error::HotSwapError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline state of one hot-swap request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Requested,
    Validating,
    Rejected,
    Redefining,
    Failed,
    Migrating,
    Completed,
}

impl PipelineState {
    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Failed | Self::Completed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Validating => "VALIDATING",
            Self::Rejected => "REJECTED",
            Self::Redefining => "REDEFINING",
            Self::Failed => "FAILED",
            Self::Migrating => "MIGRATING",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: PipelineState) -> &'static [PipelineState] {
    use PipelineState::{Completed, Failed, Migrating, Redefining, Rejected, Requested, Validating};
    match from {
        Requested => &[Validating],
        Validating => &[Rejected, Redefining],
        Redefining => &[Failed, Migrating],
        Migrating => &[Completed],
        Rejected | Failed | Completed => &[],
    }
}

/// Validate a state transition
///
/// # Errors
/// [`HotSwapError::IllegalTransition`] if `to` is not reachable from `from`.
pub fn validate_transition(from: PipelineState, to: PipelineState) -> Result<(), HotSwapError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(HotSwapError::IllegalTransition { from, to })
    }
}

/// One recorded state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub state: PipelineState,
    pub at: DateTime<Utc>,
}

/// Current state plus history of a request
#[derive(Debug, Clone)]
pub(crate) struct StateTracker {
    current: PipelineState,
    history: Vec<StateChange>,
}

impl StateTracker {
    pub(crate) fn new() -> Self {
        Self {
            current: PipelineState::Requested,
            history: vec![StateChange {
                state: PipelineState::Requested,
                at: Utc::now(),
            }],
        }
    }

    pub(crate) fn current(&self) -> PipelineState {
        self.current
    }

    /// Move to `to`, returning the previous state
    pub(crate) fn advance(&mut self, to: PipelineState) -> Result<PipelineState, HotSwapError> {
        validate_transition(self.current, to)?;
        let from = self.current;
        self.current = to;
        self.history.push(StateChange { state: to, at: Utc::now() });
        Ok(from)
    }

    pub(crate) fn into_history(self) -> Vec<StateChange> {
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [PipelineState; 7] = [
        PipelineState::Requested,
        PipelineState::Validating,
        PipelineState::Rejected,
        PipelineState::Redefining,
        PipelineState::Failed,
        PipelineState::Migrating,
        PipelineState::Completed,
    ];

    #[test]
    fn no_transition_skips_a_state() {
        assert!(validate_transition(PipelineState::Requested, PipelineState::Redefining).is_err());
        assert!(validate_transition(PipelineState::Validating, PipelineState::Migrating).is_err());
        assert!(validate_transition(PipelineState::Redefining, PipelineState::Completed).is_err());
        assert!(validate_transition(PipelineState::Migrating, PipelineState::Completed).is_ok());
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for state in ALL.into_iter().filter(|s| s.is_terminal()) {
            assert!(allowed_transitions(state).is_empty());
            for to in ALL {
                assert!(validate_transition(state, to).is_err());
            }
        }
    }

    #[test]
    fn tracker_records_history() {
        let mut tracker = StateTracker::new();
        assert_eq!(tracker.advance(PipelineState::Validating).unwrap(), PipelineState::Requested);
        assert!(tracker.advance(PipelineState::Completed).is_err());
        tracker.advance(PipelineState::Rejected).unwrap();
        assert_eq!(tracker.current(), PipelineState::Rejected);

        let states: Vec<PipelineState> = tracker.into_history().iter().map(|c| c.state).collect();
        assert_eq!(
            states,
            vec![PipelineState::Requested, PipelineState::Validating, PipelineState::Rejected]
        );
    }
}
