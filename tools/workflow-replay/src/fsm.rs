use crate::errors::ReplayError;
use crate::types::StepState;
use serde::Serialize;

/// Inputs that drive one step through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "observed")]
pub enum StepEvent {
    Begin,
    /// The executor returned, whether it acted, skipped, or failed.
    ActionDispatched,
    NoCondition,
    ConditionObserved(bool),
    RetryReady,
}

/// Pure transition function. `attempts_made` counts executions so far,
/// including the one whose condition was just observed.
pub fn next_state(
    state: StepState,
    event: StepEvent,
    attempts_made: u32,
    max_attempts: u32,
) -> Result<StepState, ReplayError> {
    use StepEvent as E;
    use StepState as S;

    let next = match (state, event) {
        (S::Pending, E::Begin) => Some(S::Executing),
        (S::Executing, E::ActionDispatched) => Some(S::AwaitingCondition),
        (S::AwaitingCondition, E::NoCondition) => Some(S::Satisfied),
        (S::AwaitingCondition, E::ConditionObserved(true)) => Some(S::Satisfied),
        (S::AwaitingCondition, E::ConditionObserved(false)) => {
            if attempts_made < max_attempts.max(1) {
                Some(S::Retry)
            } else {
                Some(S::Exhausted)
            }
        }
        (S::Retry, E::RetryReady) => Some(S::Executing),
        _ => None,
    };

    next.ok_or_else(|| {
        ReplayError::Process(format!(
            "illegal step transition: {} on {:?}",
            state.as_str(),
            event
        ))
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepMachine {
    pub state: StepState,
    pub attempts_made: u32,
    pub max_attempts: u32,
}

impl StepMachine {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: StepState::Pending,
            attempts_made: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Entering `Executing` counts as one attempt.
    pub fn apply(&mut self, event: StepEvent) -> Result<StepState, ReplayError> {
        let next = next_state(self.state, event, self.attempts_made, self.max_attempts)?;
        if next == StepState::Executing {
            self.attempts_made = self.attempts_made.saturating_add(1);
        }
        self.state = next;
        Ok(next)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
