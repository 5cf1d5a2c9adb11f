//! Fixtures shared by the tests of all channel related modules.

use super::{AllocationItem, ChannelConstants, Outcome, Participant, SignedState, State, StateVariables};
use crate::{
    abiencode::types::{Address, U256},
    sig::Signer,
};
use rand::{rngs::StdRng, SeedableRng};

pub const ASSET_HOLDER: Address = Address([0x55; 20]);

/// Deterministic signers, participant `i` of [constants] signs with
/// `signers(n)[i]`.
pub fn signers(n: usize) -> Vec<Signer> {
    // Do not use that on any real device, this is just for testing.
    let mut rng = StdRng::seed_from_u64(1337);
    (0..n).map(|_| Signer::new(&mut rng)).collect()
}

pub fn constants(signers: &[Signer]) -> ChannelConstants {
    ChannelConstants {
        chain_id: U256::from(9001u64),
        participants: signers
            .iter()
            .enumerate()
            .map(|(i, s)| Participant {
                signing_address: s.address(),
                destination: s.address().into(),
                participant_id: format!("participant-{i}"),
            })
            .collect(),
        channel_nonce: 5,
        app_definition: Address([0xaa; 20]),
        challenge_duration: 60,
    }
}

/// Allocation of `amounts[i]` to participant `i`.
pub fn outcome(constants: &ChannelConstants, amounts: &[u64]) -> Outcome {
    Outcome::simple(
        ASSET_HOLDER,
        constants
            .participants
            .iter()
            .zip(amounts)
            .map(|(p, a)| AllocationItem {
                destination: p.destination,
                amount: U256::from(*a),
            })
            .collect(),
    )
}

pub fn vars(turn_num: u64, outcome: Outcome) -> StateVariables {
    StateVariables {
        turn_num,
        is_final: false,
        app_data: vec![],
        outcome,
    }
}

/// `vars` signed by every signer in `by`.
pub fn signed(constants: &ChannelConstants, vars: StateVariables, by: &[&Signer]) -> SignedState {
    let state = State {
        constants: constants.clone(),
        vars,
    };
    let mut signed = SignedState::new(state);
    for signer in by {
        let entry = signed.state.sign(signer).unwrap();
        signed.add_signature(entry);
    }
    signed
}
