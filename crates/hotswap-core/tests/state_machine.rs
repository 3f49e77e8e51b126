//! Pipeline state machine properties

use hotswap_core::{allowed_transitions, validate_transition, PipelineState};
use proptest::prelude::*;

const ALL: [PipelineState; 7] = [
    PipelineState::Requested,
    PipelineState::Validating,
    PipelineState::Rejected,
    PipelineState::Redefining,
    PipelineState::Failed,
    PipelineState::Migrating,
    PipelineState::Completed,
];

fn state() -> impl Strategy<Value = PipelineState> {
    prop::sample::select(ALL.to_vec())
}

proptest! {
    #[test]
    fn validation_agrees_with_table(from in state(), to in state()) {
        let allowed = allowed_transitions(from).contains(&to);
        prop_assert_eq!(validate_transition(from, to).is_ok(), allowed);
    }

    #[test]
    fn walks_never_leave_terminal_states(steps in prop::collection::vec(state(), 0..20)) {
        let mut current = PipelineState::Requested;
        for next in steps {
            if validate_transition(current, next).is_ok() {
                prop_assert!(!current.is_terminal());
                current = next;
            }
        }
    }

    #[test]
    fn no_state_transitions_to_itself(s in state()) {
        prop_assert!(validate_transition(s, s).is_err());
    }
}

#[test]
fn every_path_ends_in_a_terminal_state() {
    fn walk(state: PipelineState, depth: usize) {
        assert!(depth < ALL.len(), "cycle through {state}");
        let next = allowed_transitions(state);
        if next.is_empty() {
            assert!(state.is_terminal());
        }
        for &n in next {
            walk(n, depth + 1);
        }
    }
    walk(PipelineState::Requested, 0);
}
