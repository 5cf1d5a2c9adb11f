use super::{ChannelConstants, Outcome};
use crate::{
    abiencode::{
        as_hex, hash_tokens,
        types::{Address, Hash, Signature},
        Token,
    },
    sig::{self, recover_signer, Signer},
};
use serde::{Deserialize, Serialize};

/// The part of a state that changes from turn to turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateVariables {
    pub turn_num: u64,
    pub is_final: bool,
    #[serde(with = "as_hex")]
    pub app_data: Vec<u8>,
    pub outcome: Outcome,
}

impl StateVariables {
    /// Create the state for the following turn with everything else
    /// unchanged.
    ///
    /// Going through this method keeps the turn number consistent, the
    /// caller only has to modify what the application actually changes.
    /// The turn number saturates at `u64::MAX`, a state no transition
    /// accepts as a successor.
    pub fn make_next_state(&self) -> Self {
        StateVariables {
            turn_num: self.turn_num.saturating_add(1),
            is_final: self.is_final,
            app_data: self.app_data.clone(),
            outcome: self.outcome.clone(),
        }
    }
}

/// Hash of the state as the adjudicator computes it.
///
/// ```solidity
/// appPartHash = keccak256(abi.encode(challengeDuration, appDefinition, appData));
/// stateHash = keccak256(abi.encode(State(turnNum, isFinal, channelId, appPartHash, outcomeHash)));
/// ```
pub fn state_hash(constants: &ChannelConstants, vars: &StateVariables) -> Hash {
    let app_part_hash = hash_tokens(&[
        Token::uint(constants.challenge_duration),
        Token::Address(constants.app_definition),
        Token::Bytes(vars.app_data.clone()),
    ]);
    hash_tokens(&[Token::Tuple(vec![
        Token::uint(vars.turn_num),
        Token::Bool(vars.is_final),
        Token::FixedBytes(constants.channel_id().into()),
        Token::FixedBytes(app_part_hash.into()),
        Token::FixedBytes(vars.outcome.hash().into()),
    ])])
}

/// Full state of a channel at one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    #[serde(flatten)]
    pub constants: ChannelConstants,
    #[serde(flatten)]
    pub vars: StateVariables,
}

impl State {
    pub fn channel_id(&self) -> Hash {
        self.constants.channel_id()
    }

    pub fn hash(&self) -> Hash {
        state_hash(&self.constants, &self.vars)
    }

    pub fn turn_num(&self) -> u64 {
        self.vars.turn_num
    }

    pub fn is_final(&self) -> bool {
        self.vars.is_final
    }

    pub fn sign(&self, signer: &Signer) -> Result<SignatureEntry, sig::Error> {
        Ok(SignatureEntry {
            signer: signer.address(),
            signature: signer.sign_eth(self.hash())?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature claims {claimed} but recovers to {recovered}")]
    WrongSigner { claimed: Address, recovered: Address },
    #[error(transparent)]
    Recovery(#[from] sig::Error),
}

/// A signature together with the address that is supposed to have produced
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub signer: Address,
    pub signature: Signature,
}

impl SignatureEntry {
    /// Check that `signature` over `state_hash` recovers to `signer`.
    pub fn verify(&self, state_hash: Hash) -> Result<(), SignatureError> {
        let recovered = recover_signer(state_hash, self.signature)?;
        if recovered != self.signer {
            return Err(SignatureError::WrongSigner {
                claimed: self.signer,
                recovered,
            });
        }
        Ok(())
    }
}

/// A state and the signatures collected for it so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedState {
    #[serde(flatten)]
    pub state: State,
    pub signatures: Vec<SignatureEntry>,
}

impl SignedState {
    pub fn new(state: State) -> Self {
        SignedState {
            state,
            signatures: Vec::new(),
        }
    }

    pub fn channel_id(&self) -> Hash {
        self.state.channel_id()
    }

    pub fn turn_num(&self) -> u64 {
        self.state.turn_num()
    }

    pub fn is_signed_by(&self, addr: &Address) -> bool {
        self.signatures.iter().any(|s| &s.signer == addr)
    }

    /// Add `entry` unless a signature by the same signer is already present.
    pub fn add_signature(&mut self, entry: SignatureEntry) {
        if !self.is_signed_by(&entry.signer) {
            self.signatures.push(entry);
        }
    }

    /// Verify every signature against the state hash.
    pub fn verify_signatures(&self) -> Result<(), SignatureError> {
        let hash = self.state.hash();
        self.signatures.iter().try_for_each(|s| s.verify(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_utils::{constants, outcome, signers, vars};

    #[test]
    fn hash_covers_every_field() {
        let s = signers(2);
        let c = constants(&s);
        let base = vars(3, outcome(&c, &[1, 2]));
        let h = state_hash(&c, &base);

        let mut v = base.clone();
        v.turn_num += 1;
        assert_ne!(state_hash(&c, &v), h);

        let mut v = base.clone();
        v.is_final = true;
        assert_ne!(state_hash(&c, &v), h);

        let mut v = base.clone();
        v.app_data = vec![1];
        assert_ne!(state_hash(&c, &v), h);

        let v = StateVariables {
            outcome: outcome(&c, &[2, 1]),
            ..base.clone()
        };
        assert_ne!(state_hash(&c, &v), h);

        let mut c2 = c.clone();
        c2.challenge_duration += 1;
        assert_ne!(state_hash(&c2, &base), h);
    }

    #[test]
    fn sign_and_verify() {
        let s = signers(2);
        let state = State {
            constants: constants(&s),
            vars: vars(0, outcome(&constants(&s), &[1, 2])),
        };
        let mut signed = SignedState::new(state.clone());
        signed.add_signature(state.sign(&s[0]).unwrap());
        signed.add_signature(state.sign(&s[0]).unwrap());
        signed.add_signature(state.sign(&s[1]).unwrap());

        assert_eq!(signed.signatures.len(), 2);
        assert!(signed.is_signed_by(&s[1].address()));
        signed.verify_signatures().unwrap();

        // Claiming someone else's signature is caught.
        signed.signatures[1].signer = s[0].address();
        assert!(matches!(
            signed.verify_signatures(),
            Err(SignatureError::WrongSigner { .. })
        ));
    }

    #[test]
    fn next_state_only_bumps_turn() {
        let c = constants(&signers(2));
        let v = vars(7, outcome(&c, &[1, 2]));
        let next = v.make_next_state();
        assert_eq!(next.turn_num, 8);
        assert_eq!(next.outcome, v.outcome);
        assert_eq!(next.app_data, v.app_data);
    }

    #[test]
    fn json_roundtrip() {
        let s = signers(2);
        let state = State {
            constants: constants(&s),
            vars: vars(2, outcome(&constants(&s), &[1, 2])),
        };
        let mut signed = SignedState::new(state.clone());
        signed.add_signature(state.sign(&s[0]).unwrap());

        let json = serde_json::to_value(&signed).unwrap();
        assert_eq!(json["turnNum"], 2);
        assert_eq!(json["appData"], "0x");
        let back: SignedState = serde_json::from_value(json).unwrap();
        assert_eq!(back, signed);
    }
}
