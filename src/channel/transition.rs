//! Application independent rules every pair of consecutive states has to
//! follow.

use super::{ChannelConstants, State, StateVariables};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("expected turn number {expected}, got {actual}")]
    InvalidTurnNum { expected: u64, actual: u64 },
    #[error("turn number {0} has no successor")]
    TurnNumOverflow(u64),
    #[error("states belong to different channels")]
    ChannelMismatch,
    #[error("the outcome must not change when finalizing")]
    OutcomeChangedOnFinalize,
    #[error("outcome and app data must not change during setup")]
    SetupPhaseViolation,
}

/// Check that `next` may follow `prev`.
///
/// Rules, checked in this order:
/// 1. `next.turnNum == prev.turnNum + 1`
/// 2. Both states have the same channel constants.
/// 3. A final state keeps the outcome of its predecessor.
/// 4. During setup (`next.turnNum < 2 * participants`) outcome and app data
///    stay unchanged.
///
/// Application specific rules are not covered here, see
/// [crate::app::AppRegistry::valid_transition].
pub fn valid_transition(prev: &State, next: &State) -> Result<(), TransitionError> {
    check_turn_num(&prev.vars, &next.vars)?;
    if prev.constants != next.constants {
        return Err(TransitionError::ChannelMismatch);
    }
    check_vars(&next.constants, &prev.vars, &next.vars)
}

/// [valid_transition] for two states of a channel that is already known
/// to be the same, for example inside the channel store.
pub fn valid_vars_transition(
    constants: &ChannelConstants,
    prev: &StateVariables,
    next: &StateVariables,
) -> Result<(), TransitionError> {
    check_turn_num(prev, next)?;
    check_vars(constants, prev, next)
}

fn check_turn_num(prev: &StateVariables, next: &StateVariables) -> Result<(), TransitionError> {
    let expected = prev
        .turn_num
        .checked_add(1)
        .ok_or(TransitionError::TurnNumOverflow(prev.turn_num))?;
    if next.turn_num != expected {
        return Err(TransitionError::InvalidTurnNum {
            expected,
            actual: next.turn_num,
        });
    }
    Ok(())
}

fn check_vars(
    constants: &ChannelConstants,
    prev: &StateVariables,
    next: &StateVariables,
) -> Result<(), TransitionError> {
    if next.is_final && next.outcome != prev.outcome {
        return Err(TransitionError::OutcomeChangedOnFinalize);
    }
    if next.turn_num < constants.app_phase_start()
        && (next.outcome != prev.outcome || next.app_data != prev.app_data)
    {
        return Err(TransitionError::SetupPhaseViolation);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_utils::{constants, outcome, signers, vars};

    fn state(turn_num: u64, amounts: &[u64]) -> State {
        let c = constants(&signers(2));
        let o = outcome(&c, amounts);
        State {
            constants: c,
            vars: vars(turn_num, o),
        }
    }

    #[test]
    fn consecutive_turns_are_valid() {
        assert_eq!(valid_transition(&state(0, &[1, 2]), &state(1, &[1, 2])), Ok(()));
        // App phase (n = 2): the outcome may change.
        assert_eq!(valid_transition(&state(4, &[1, 2]), &state(5, &[2, 1])), Ok(()));
    }

    #[test]
    fn turn_must_increment_by_one() {
        assert_eq!(
            valid_transition(&state(0, &[1, 2]), &state(2, &[1, 2])),
            Err(TransitionError::InvalidTurnNum {
                expected: 1,
                actual: 2
            })
        );
        assert!(valid_transition(&state(3, &[1, 2]), &state(3, &[1, 2])).is_err());
    }

    #[test]
    fn last_turn_has_no_successor() {
        let last = state(u64::MAX, &[1, 2]);
        assert_eq!(
            valid_transition(&last, &state(0, &[1, 2])),
            Err(TransitionError::TurnNumOverflow(u64::MAX))
        );
    }

    #[test]
    fn constants_must_match() {
        let prev = state(4, &[1, 2]);
        let mut next = state(5, &[1, 2]);
        next.constants.channel_nonce += 1;
        assert_eq!(
            valid_transition(&prev, &next),
            Err(TransitionError::ChannelMismatch)
        );
    }

    #[test]
    fn turn_is_checked_before_constants() {
        let prev = state(4, &[1, 2]);
        let mut next = state(7, &[1, 2]);
        next.constants.channel_nonce += 1;
        assert!(matches!(
            valid_transition(&prev, &next),
            Err(TransitionError::InvalidTurnNum { .. })
        ));
    }

    #[test]
    fn final_state_keeps_outcome() {
        let prev = state(6, &[1, 2]);
        let mut next = state(7, &[2, 1]);
        next.vars.is_final = true;
        assert_eq!(
            valid_transition(&prev, &next),
            Err(TransitionError::OutcomeChangedOnFinalize)
        );

        let mut next = state(7, &[1, 2]);
        next.vars.is_final = true;
        assert_eq!(valid_transition(&prev, &next), Ok(()));
    }

    #[test]
    fn setup_phase_is_frozen() {
        assert_eq!(
            valid_transition(&state(1, &[1, 2]), &state(2, &[2, 1])),
            Err(TransitionError::SetupPhaseViolation)
        );

        let prev = state(2, &[1, 2]);
        let mut next = state(3, &[1, 2]);
        next.vars.app_data = vec![1];
        assert_eq!(
            valid_transition(&prev, &next),
            Err(TransitionError::SetupPhaseViolation)
        );
    }
}
