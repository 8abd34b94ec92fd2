//! Property-based tests for the form state machine

use super::state::{transition, CompletedPolicy, Event, FormState};
use proptest::prelude::*;

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        Just(Event::TurnRequested),
        any::<bool>().prop_map(|is_valid| Event::TurnFinished { is_valid }),
    ]
}

fn arb_policy() -> impl Strategy<Value = CompletedPolicy> {
    prop_oneof![
        Just(CompletedPolicy::AllowFurtherTurns),
        Just(CompletedPolicy::Reject),
    ]
}

/// Apply events in order, treating a rejected event as a no-op
fn run_events(start: FormState, policy: CompletedPolicy, events: &[Event]) -> Vec<FormState> {
    let mut state = start;
    let mut seen = vec![state];
    for event in events {
        if let Ok(next) = transition(state, policy, *event) {
            state = next;
        }
        seen.push(state);
    }
    seen
}

proptest! {
    #[test]
    fn prop_completed_is_terminal(
        policy in arb_policy(),
        events in prop::collection::vec(arb_event(), 0..40)
    ) {
        let states = run_events(FormState::Completed, policy, &events);
        prop_assert!(states.iter().all(|s| *s == FormState::Completed));
    }

    #[test]
    fn prop_never_leaves_completed_once_reached(
        policy in arb_policy(),
        events in prop::collection::vec(arb_event(), 0..40)
    ) {
        let states = run_events(FormState::InProgress, policy, &events);
        if let Some(first) = states.iter().position(|s| s.is_completed()) {
            prop_assert!(states[first..].iter().all(|s| s.is_completed()));
        }
    }

    #[test]
    fn prop_completion_requires_valid_turn(
        policy in arb_policy(),
        events in prop::collection::vec(arb_event(), 0..40)
    ) {
        let completes = events.contains(&Event::TurnFinished { is_valid: true });
        let states = run_events(FormState::InProgress, policy, &events);
        prop_assert_eq!(states.last().copied() == Some(FormState::Completed), completes);
    }

    #[test]
    fn prop_only_reject_policy_errors(
        state in prop_oneof![Just(FormState::InProgress), Just(FormState::Completed)],
        policy in arb_policy(),
        event in arb_event()
    ) {
        let rejected = transition(state, policy, event).is_err();
        let expected = state == FormState::Completed
            && policy == CompletedPolicy::Reject
            && event == Event::TurnRequested;
        prop_assert_eq!(rejected, expected);
    }
}
