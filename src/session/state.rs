//! Form completion state machine
//!
//! A session is either still collecting answers or done. The transition
//! function is pure; the session applies its result.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of one form dialogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormState {
    #[default]
    InProgress,
    /// The model confirmed the form. Terminal.
    Completed,
}

impl FormState {
    pub fn is_completed(self) -> bool {
        matches!(self, FormState::Completed)
    }
}

/// What happens when a turn is requested on a completed form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletedPolicy {
    /// Keep talking; the form stays completed
    #[default]
    AllowFurtherTurns,
    /// Refuse the turn before calling the backend
    Reject,
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A caller asked for another turn
    TurnRequested,
    /// The model replied and the reply was interpreted
    TurnFinished { is_valid: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Form is already completed")]
    FormCompleted,
}

/// Pure transition function
pub fn transition(
    state: FormState,
    policy: CompletedPolicy,
    event: Event,
) -> Result<FormState, TransitionError> {
    match (state, event) {
        (FormState::InProgress, Event::TurnRequested) => Ok(FormState::InProgress),
        (FormState::InProgress, Event::TurnFinished { is_valid: true }) => {
            Ok(FormState::Completed)
        }
        (FormState::InProgress, Event::TurnFinished { is_valid: false }) => {
            Ok(FormState::InProgress)
        }

        (FormState::Completed, Event::TurnRequested) => match policy {
            CompletedPolicy::AllowFurtherTurns => Ok(FormState::Completed),
            CompletedPolicy::Reject => Err(TransitionError::FormCompleted),
        },
        // No way back once completed
        (FormState::Completed, Event::TurnFinished { .. }) => Ok(FormState::Completed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_turn_completes() {
        let next = transition(
            FormState::InProgress,
            CompletedPolicy::default(),
            Event::TurnFinished { is_valid: true },
        );
        assert_eq!(next, Ok(FormState::Completed));
    }

    #[test]
    fn test_plain_turn_stays_in_progress() {
        for event in [Event::TurnRequested, Event::TurnFinished { is_valid: false }] {
            assert_eq!(
                transition(FormState::InProgress, CompletedPolicy::Reject, event),
                Ok(FormState::InProgress)
            );
        }
    }

    #[test]
    fn test_completed_policy() {
        assert_eq!(
            transition(
                FormState::Completed,
                CompletedPolicy::AllowFurtherTurns,
                Event::TurnRequested
            ),
            Ok(FormState::Completed)
        );
        assert_eq!(
            transition(FormState::Completed, CompletedPolicy::Reject, Event::TurnRequested),
            Err(TransitionError::FormCompleted)
        );
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&FormState::InProgress).unwrap(),
            "\"in_progress\""
        );
        let parsed: CompletedPolicy = serde_json::from_str("\"reject\"").unwrap();
        assert_eq!(parsed, CompletedPolicy::Reject);
    }
}
